//! Application log entries stored in the `Logging` table.
//!
//! The table is shared with another writer, so keys come from a sequence:
//! entries are staged with id `0` and [`SequenceKeyInterceptor`] swaps the
//! placeholder for `NEXT VALUE FOR` when the insert is flushed.
//!
//! [`SequenceKeyInterceptor`]: crate::interceptor::SequenceKeyInterceptor

use crate::core::{DataType, DbError, FromValue, Result, Value};
use crate::storage::TableSchema;
use crate::uow::UnitOfWork;
use chrono::{DateTime, Utc};
use std::fmt;
use tracing::error;

pub const LOG_TABLE: &str = "Logging";

/// Stored as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogType {
    #[default]
    Unknown,
    BlogAdded,
    BlogUpdated,
}

impl LogType {
    pub fn code(&self) -> i64 {
        match self {
            LogType::Unknown => 0,
            LogType::BlogAdded => 1,
            LogType::BlogUpdated => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(LogType::Unknown),
            1 => Some(LogType::BlogAdded),
            2 => Some(LogType::BlogUpdated),
            _ => None,
        }
    }
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogType::Unknown => write!(f, "Unknown"),
            LogType::BlogAdded => write!(f, "BlogAdded"),
            LogType::BlogUpdated => write!(f, "BlogUpdated"),
        }
    }
}

impl From<LogType> for Value {
    fn from(log_type: LogType) -> Self {
        Value::Integer(log_type.code())
    }
}

impl FromValue for LogType {
    fn from_value(value: Value) -> Result<Self> {
        let code = i64::from_value(value)?;
        LogType::from_code(code)
            .ok_or_else(|| DbError::TypeMismatch(format!("unknown log type code {}", code)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub id: i64,
    pub logged_at: DateTime<Utc>,
    pub log_type: LogType,
    pub log_value: String,
    pub log_text: Option<String>,
    pub user_id: Option<i64>,
}

crate::impl_entity!(
    LogEntry,
    table = "Logging",
    key = id,
    columns { logged_at, log_type, log_value, log_text, user_id }
);

impl LogEntry {
    /// New unsaved entry stamped with the current time.
    pub fn new(log_type: LogType, log_value: impl Into<String>) -> Self {
        Self {
            id: 0,
            logged_at: Utc::now(),
            log_type,
            log_value: log_value.into(),
            log_text: None,
            user_id: None,
        }
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.log_text = Some(text.into());
        self
    }

    pub fn user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Store schema matching the entity mapping.
    pub fn schema() -> TableSchema {
        TableSchema::new(LOG_TABLE, "id")
            .required("logged_at", DataType::Timestamp)
            .required("log_type", DataType::Integer)
            .required("log_value", DataType::Text)
            .column("log_text", DataType::Text)
            .column("user_id", DataType::Integer)
    }
}

/// Writes log entries through a unit of work.
///
/// Failures are logged and reported as `false`; logging never fails the
/// caller's operation.
pub struct AuditLog<'a> {
    uow: &'a mut UnitOfWork,
}

impl<'a> AuditLog<'a> {
    pub fn new(uow: &'a mut UnitOfWork) -> Self {
        Self { uow }
    }

    /// Stages `entry` and commits the unit of work.
    pub async fn save_log(&mut self, entry: LogEntry) -> bool {
        if !self.save_log_no_commit(entry) {
            return false;
        }
        match self.uow.commit().await {
            Ok(_) => true,
            Err(e) => {
                error!(parent: self.uow.span(), error = %e, "saving log entry failed");
                false
            }
        }
    }

    /// Stages `entry` only. It is written by the next commit of the unit of
    /// work, together with whatever else is staged.
    pub fn save_log_no_commit(&mut self, mut entry: LogEntry) -> bool {
        entry.id = 0;
        match self.uow.add(&entry) {
            Ok(_) => true,
            Err(e) => {
                error!(parent: self.uow.span(), error = %e, "staging log entry failed");
                false
            }
        }
    }
}
