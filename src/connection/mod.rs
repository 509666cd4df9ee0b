pub mod config;

use crate::command::Command;
use crate::core::{QueryResult, Result};
use async_trait::async_trait;
use std::ops::{Deref, DerefMut};

pub use config::{Environment, PersistenceConfig, ProcedureFailureMode};

/// Result of a write command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecuteOutcome {
    pub rows_affected: u64,
    /// Keys assigned by the store to inserted rows, in row order.
    pub generated_keys: Vec<i64>,
}

impl ExecuteOutcome {
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            generated_keys: Vec::new(),
        }
    }
}

/// A session against the entity store.
///
/// A connection is owned by exactly one unit of work and is never shared.
/// `close` must be idempotent and must abandon (roll back) an open native
/// transaction, since it is also called from `Drop` paths.
#[async_trait]
pub trait Connection: Send {
    fn id(&self) -> u64;

    fn is_open(&self) -> bool;

    async fn open(&mut self) -> Result<()>;

    fn close(&mut self);

    fn in_transaction(&self) -> bool;

    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Runs a write or administrative command.
    async fn execute(&mut self, command: &Command) -> Result<ExecuteOutcome>;

    /// Runs a command that returns rows.
    async fn query(&mut self, command: &Command) -> Result<QueryResult>;
}

/// Hands out connections, one per unit of work.
#[async_trait]
pub trait Store: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>>;
}

/// Opens a connection for the duration of one operation.
///
/// If the connection was closed when the guard was created, it is closed
/// again when the guard drops, on every exit path including cancellation.
pub struct ConnectionGuard<'a> {
    connection: &'a mut dyn Connection,
    opened_here: bool,
}

impl<'a> ConnectionGuard<'a> {
    pub async fn open(connection: &'a mut dyn Connection) -> Result<Self> {
        let opened_here = !connection.is_open();
        if opened_here {
            connection.open().await?;
        }
        Ok(Self {
            connection,
            opened_here,
        })
    }

    pub fn opened_here(&self) -> bool {
        self.opened_here
    }
}

impl<'a> Deref for ConnectionGuard<'a> {
    type Target = dyn Connection + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.connection
    }
}

impl<'a> DerefMut for ConnectionGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.connection
    }
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        if self.opened_here {
            self.connection.close();
        }
    }
}
