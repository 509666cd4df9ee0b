// ============================================================================
// Store Commands
// ============================================================================
//
// A `Command` is what a unit of work sends to its connection: the SQL text a
// relational backend would execute, the bound parameters, and the logical
// operation the text encodes. Interceptors see and may rewrite all three
// before the command reaches the store.
//
// ============================================================================

pub mod render;

use crate::core::{Row, Value};
use std::fmt;

pub use render::CommandBuilder;

/// A bound parameter. Values never end up inside the command text.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: Value,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let name = if name.starts_with('@') {
            name
        } else {
            format!("@{}", name)
        };
        Self {
            name,
            value: value.into(),
        }
    }
}

/// Where an inserted row gets its key from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// A non-zero key in the row is kept, zero asks the table identity.
    Identity,
    /// Keys are pulled from a named sequence, ignoring the row's key value.
    /// With `restart_from_max` the sequence is first reset to `max(key) + 1`.
    Sequence { name: String, restart_from_max: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    Select {
        table: String,
        columns: Vec<String>,
    },
    Insert {
        table: String,
        columns: Vec<String>,
        rows: Vec<Row>,
        key_source: KeySource,
    },
    Update {
        table: String,
        key_column: String,
        key: i64,
        columns: Vec<String>,
        values: Row,
    },
    Delete {
        table: String,
        key_column: String,
        key: i64,
    },
    ListBaseTables,
    DisableConstraints {
        table: String,
    },
    ClearTable {
        table: String,
    },
    EnableConstraints {
        table: String,
    },
    Procedure {
        name: String,
    },
}

impl CommandKind {
    pub fn table(&self) -> Option<&str> {
        match self {
            Self::Select { table, .. }
            | Self::Insert { table, .. }
            | Self::Update { table, .. }
            | Self::Delete { table, .. }
            | Self::DisableConstraints { table }
            | Self::ClearTable { table }
            | Self::EnableConstraints { table } => Some(table),
            Self::ListBaseTables | Self::Procedure { .. } => None,
        }
    }

    /// Whether the command modifies data.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Insert { .. } | Self::Update { .. } | Self::Delete { .. } | Self::ClearTable { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub text: String,
    pub parameters: Vec<Parameter>,
    pub kind: CommandKind,
}

impl Command {
    pub fn new(text: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            text: text.into(),
            parameters: Vec::new(),
            kind,
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<Parameter>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&Value> {
        let wanted = name.trim_start_matches('@');
        self.parameters
            .iter()
            .find(|p| p.name.trim_start_matches('@').eq_ignore_ascii_case(wanted))
            .map(|p| &p.value)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_names_are_prefixed() {
        assert_eq!(Parameter::new("userId", 1i64).name, "@userId");
        assert_eq!(Parameter::new("@userId", 1i64).name, "@userId");
    }

    #[test]
    fn test_parameter_lookup() {
        let cmd = Command::new("EXEC [GetPeople] @Min = @Min", CommandKind::Procedure {
            name: "GetPeople".into(),
        })
        .with_parameters(vec![Parameter::new("Min", 3i64)]);

        assert_eq!(cmd.parameter("min"), Some(&Value::Integer(3)));
        assert_eq!(cmd.parameter("@Min"), Some(&Value::Integer(3)));
        assert!(cmd.kind.table().is_none());
    }
}
