//! T-SQL rendering for store commands.
//!
//! The layout follows what an ORM batch writer emits: one statement keyword
//! line, then one line per inserted row, rows separated by `),` and the last
//! one terminated by `);`. The sequence interceptor depends on that layout.

use super::{Command, CommandKind, KeySource, Parameter};
use crate::core::Row;

pub const DEFAULT_SYSTEM_TABLES: &[&str] = &["__MigrationHistory", "__EFMigrationsHistory", "sysdiagrams"];

/// Quotes an identifier as `[name]`, doubling embedded `]`.
pub fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Builds commands with sequential `@pN` parameter names.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    insert_batch_size: usize,
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl CommandBuilder {
    pub fn new(insert_batch_size: usize) -> Self {
        Self {
            insert_batch_size: insert_batch_size.max(1),
        }
    }

    pub fn select(&self, table: &str, columns: &[&str]) -> Command {
        let column_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let text = format!("SELECT {}\nFROM {}", column_list, quote_ident(table));

        Command::new(
            text,
            CommandKind::Select {
                table: table.to_string(),
                columns: columns.iter().map(|c| c.to_string()).collect(),
            },
        )
    }

    /// One multi-row insert per batch of at most `insert_batch_size` rows.
    pub fn insert(&self, table: &str, columns: &[&str], rows: Vec<Row>) -> Vec<Command> {
        let mut commands = Vec::new();
        let mut rows = rows.into_iter().peekable();

        while rows.peek().is_some() {
            let batch: Vec<Row> = rows.by_ref().take(self.insert_batch_size).collect();
            commands.push(self.insert_batch(table, columns, batch));
        }

        commands
    }

    fn insert_batch(&self, table: &str, columns: &[&str], rows: Vec<Row>) -> Command {
        let mut parameters = Vec::with_capacity(rows.len() * columns.len());
        let mut lines = vec![
            "SET NOCOUNT ON;".to_string(),
            format!(
                "INSERT INTO {} ({})",
                quote_ident(table),
                columns
                    .iter()
                    .map(|c| quote_ident(c))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        ];

        let last = rows.len().saturating_sub(1);
        for (row_idx, row) in rows.iter().enumerate() {
            let placeholders = row
                .iter()
                .map(|value| {
                    let name = format!("@p{}", parameters.len());
                    parameters.push(Parameter::new(name.clone(), value.clone()));
                    name
                })
                .collect::<Vec<_>>()
                .join(", ");

            let prefix = if row_idx == 0 { "VALUES " } else { "" };
            let terminator = if row_idx == last { ");" } else { ")," };
            lines.push(format!("{}({}{}", prefix, placeholders, terminator));
        }

        Command::new(
            lines.join("\n"),
            CommandKind::Insert {
                table: table.to_string(),
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows,
                key_source: KeySource::Identity,
            },
        )
        .with_parameters(parameters)
    }

    pub fn update(&self, table: &str, columns: &[&str], row: Row) -> Command {
        let key = row.first().and_then(|v| v.as_i64()).unwrap_or_default();
        let key_column = columns[0];
        let mut parameters = Vec::with_capacity(row.len());

        let assignments = columns
            .iter()
            .zip(row.iter())
            .skip(1)
            .map(|(column, value)| {
                let name = format!("@p{}", parameters.len());
                parameters.push(Parameter::new(name.clone(), value.clone()));
                format!("{} = {}", quote_ident(column), name)
            })
            .collect::<Vec<_>>()
            .join(", ");

        let key_param = format!("@p{}", parameters.len());
        parameters.push(Parameter::new(key_param.clone(), key));

        let text = format!(
            "SET NOCOUNT ON;\nUPDATE {} SET {}\nWHERE {} = {};\nSELECT @@ROWCOUNT;",
            quote_ident(table),
            assignments,
            quote_ident(key_column),
            key_param
        );

        Command::new(
            text,
            CommandKind::Update {
                table: table.to_string(),
                key_column: key_column.to_string(),
                key,
                columns: columns[1..].iter().map(|c| c.to_string()).collect(),
                values: row.into_iter().skip(1).collect(),
            },
        )
        .with_parameters(parameters)
    }

    pub fn delete(&self, table: &str, key_column: &str, key: i64) -> Command {
        let text = format!(
            "SET NOCOUNT ON;\nDELETE FROM {}\nWHERE {} = @p0;\nSELECT @@ROWCOUNT;",
            quote_ident(table),
            quote_ident(key_column)
        );

        Command::new(
            text,
            CommandKind::Delete {
                table: table.to_string(),
                key_column: key_column.to_string(),
                key,
            },
        )
        .with_parameters(vec![Parameter::new("@p0", key)])
    }

    pub fn list_base_tables(&self, system_tables: &[String]) -> Command {
        let mut text = String::from(
            "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_TYPE = 'BASE TABLE'",
        );
        for table in system_tables {
            text.push_str(&format!(" AND TABLE_NAME <> {}", quote_literal(table)));
        }
        Command::new(text, CommandKind::ListBaseTables)
    }

    pub fn disable_constraints(&self, table: &str) -> Command {
        Command::new(
            format!("ALTER TABLE {} NOCHECK CONSTRAINT ALL", quote_ident(table)),
            CommandKind::DisableConstraints {
                table: table.to_string(),
            },
        )
    }

    pub fn clear_table(&self, table: &str) -> Command {
        Command::new(
            format!(
                "DELETE FROM {}; DBCC CHECKIDENT ({}, RESEED, 0)",
                quote_ident(table),
                quote_literal(table)
            ),
            CommandKind::ClearTable {
                table: table.to_string(),
            },
        )
    }

    pub fn enable_constraints(&self, table: &str) -> Command {
        Command::new(
            format!(
                "ALTER TABLE {} WITH CHECK CHECK CONSTRAINT ALL",
                quote_ident(table)
            ),
            CommandKind::EnableConstraints {
                table: table.to_string(),
            },
        )
    }

    /// `EXEC [name] @a = @a, ...` with every entry bound as a parameter.
    pub fn procedure(&self, name: &str, parameters: Vec<Parameter>) -> Command {
        let mut text = format!("EXEC {}", quote_ident(name));
        let bindings = parameters
            .iter()
            .map(|p| format!("{} = {}", p.name, p.name))
            .collect::<Vec<_>>()
            .join(", ");
        if !bindings.is_empty() {
            text.push(' ');
            text.push_str(&bindings);
        }

        Command::new(
            text,
            CommandKind::Procedure {
                name: name.to_string(),
            },
        )
        .with_parameters(parameters)
    }
}
