use crate::command::render::DEFAULT_SYSTEM_TABLES;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Deployment environment the process runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum Environment {
    #[default]
    Development,
    Testing,
    Staging,
    Production,
}

impl Environment {
    /// Destructive bulk operations are refused in protected environments.
    pub fn is_protected(&self) -> bool {
        matches!(self, Self::Staging | Self::Production)
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "debug" => Ok(Self::Development),
            "testing" | "test" => Ok(Self::Testing),
            "staging" => Ok(Self::Staging),
            "production" | "prod" | "release" => Ok(Self::Production),
            other => Err(format!("Unknown environment '{}'", other)),
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Development => "Development",
            Self::Testing => "Testing",
            Self::Staging => "Staging",
            Self::Production => "Production",
        };
        write!(f, "{}", name)
    }
}

/// What a stored procedure call does when the store fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum ProcedureFailureMode {
    /// Return the error to the caller.
    #[default]
    Propagate,
    /// Log the error and return an empty result.
    LogAndReturnEmpty,
}

/// Persistence settings, read once at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PersistenceConfig {
    /// Connection target name
    pub database: String,

    pub environment: Environment,

    /// Maximum rows per multi-row insert
    pub insert_batch_size: usize,

    /// Tables bulk operations never touch
    pub system_tables: Vec<String>,

    pub procedure_failure_mode: ProcedureFailureMode,

    /// Applied to stored procedure and bulk calls
    #[serde(rename = "CommandTimeoutMs", deserialize_with = "deserialize_millis")]
    pub command_timeout: Option<Duration>,

    /// Notify change observers after `commit`
    pub notify_on_commit: bool,
}

fn deserialize_millis<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
}

impl PersistenceConfig {
    pub fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            environment: Environment::Development,
            insert_batch_size: 1000,
            system_tables: DEFAULT_SYSTEM_TABLES.iter().map(|t| t.to_string()).collect(),
            procedure_failure_mode: ProcedureFailureMode::Propagate,
            command_timeout: None,
            notify_on_commit: true,
        }
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn insert_batch_size(mut self, size: usize) -> Self {
        self.insert_batch_size = size;
        self
    }

    pub fn system_table(mut self, table: &str) -> Self {
        self.system_tables.push(table.to_string());
        self
    }

    pub fn procedure_failure_mode(mut self, mode: ProcedureFailureMode) -> Self {
        self.procedure_failure_mode = mode;
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    pub fn notify_on_commit(mut self, notify: bool) -> Self {
        self.notify_on_commit = notify;
        self
    }

    /// Reads the `Persistence` section of an appsettings-style JSON document,
    /// or the whole document when there is no such section.
    ///
    /// # Examples
    ///
    /// ```
    /// # use rustuow::connection::{Environment, PersistenceConfig};
    /// let config = PersistenceConfig::from_json(
    ///     r#"{ "Persistence": { "Database": "blogging", "Environment": "Staging" } }"#,
    /// ).unwrap();
    ///
    /// assert_eq!(config.database, "blogging");
    /// assert_eq!(config.environment, Environment::Staging);
    /// ```
    pub fn from_json(text: &str) -> Result<Self, String> {
        let document: serde_json::Value =
            serde_json::from_str(text).map_err(|e| format!("Invalid settings JSON: {}", e))?;
        let section = document
            .get("Persistence")
            .cloned()
            .unwrap_or(document);

        let config: Self = serde_json::from_value(section)
            .map_err(|e| format!("Invalid persistence settings: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn is_system_table(&self, table: &str) -> bool {
        self.system_tables
            .iter()
            .any(|t| t.eq_ignore_ascii_case(table))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.database.trim().is_empty() {
            return Err("Database cannot be empty".to_string());
        }

        if self.insert_batch_size == 0 {
            return Err("InsertBatchSize must be > 0".to_string());
        }

        if self.command_timeout == Some(Duration::ZERO) {
            return Err("CommandTimeoutMs must be > 0".to_string());
        }

        Ok(())
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self::new("default")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PersistenceConfig::default();
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.insert_batch_size, 1000);
        assert!(config.is_system_table("__efmigrationshistory"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = PersistenceConfig::new("blogging")
            .environment(Environment::Testing)
            .insert_batch_size(50)
            .system_table("AuditLog")
            .command_timeout(Duration::from_secs(5));

        assert_eq!(config.database, "blogging");
        assert_eq!(config.insert_batch_size, 50);
        assert!(config.is_system_table("auditlog"));
        assert_eq!(config.command_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("Release".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!(" staging ".parse::<Environment>().unwrap(), Environment::Staging);
        assert!("moon".parse::<Environment>().is_err());
        assert!(Environment::Production.is_protected());
        assert!(!Environment::Testing.is_protected());
    }

    #[test]
    fn test_from_json() {
        let config = PersistenceConfig::from_json(
            r#"{
                "Logging": { "LogLevel": "Debug" },
                "Persistence": {
                    "Database": "blogging",
                    "Environment": "production",
                    "InsertBatchSize": 200,
                    "ProcedureFailureMode": "LogAndReturnEmpty",
                    "CommandTimeoutMs": 1500
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.insert_batch_size, 200);
        assert_eq!(config.procedure_failure_mode, ProcedureFailureMode::LogAndReturnEmpty);
        assert_eq!(config.command_timeout, Some(Duration::from_millis(1500)));
        assert!(config.notify_on_commit);
    }

    #[test]
    fn test_malformed_settings() {
        assert!(PersistenceConfig::from_json("{").is_err());
        assert!(PersistenceConfig::from_json(r#"{ "Environment": "moon" }"#).is_err());
        assert!(PersistenceConfig::from_json(r#"{ "Database": "" }"#).is_err());
        assert!(PersistenceConfig::new("x").insert_batch_size(0).validate().is_err());
    }
}
