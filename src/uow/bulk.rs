//! Destructive bulk operations: wipe every table, or a named set.
//!
//! Both run the same three passes over the whole table set: disable
//! constraints everywhere, delete rows and reseed identity, re-enable
//! constraints everywhere. Deleting with constraints off means tables can be
//! cleared in any order. A failure on one table is logged and recorded in
//! the [`BulkReport`]; the remaining tables are still processed.

use super::{Shared, UnitOfWork, run_execute, run_query, until, with_timeout};
use crate::command::{Command, CommandBuilder};
use crate::connection::{Connection, ConnectionGuard};
use crate::core::{DbError, Result};
use std::future::Future;
use std::sync::Arc;
use tracing::{Instrument, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkPhase {
    DisableConstraints,
    ClearRows,
    EnableConstraints,
}

impl std::fmt::Display for BulkPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BulkPhase::DisableConstraints => write!(f, "disable constraints"),
            BulkPhase::ClearRows => write!(f, "clear rows"),
            BulkPhase::EnableConstraints => write!(f, "enable constraints"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFailure {
    pub table: String,
    pub phase: BulkPhase,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkReport {
    /// Tables the operation ran against, in processing order.
    pub tables: Vec<String>,
    pub failures: Vec<TableFailure>,
}

impl BulkReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_tables(&self) -> Vec<&str> {
        let mut tables: Vec<&str> = Vec::new();
        for failure in &self.failures {
            if !tables.contains(&failure.table.as_str()) {
                tables.push(&failure.table);
            }
        }
        tables
    }
}

type Render = fn(&CommandBuilder, &str) -> Command;

const PHASES: [(BulkPhase, Render); 3] = [
    (BulkPhase::DisableConstraints, CommandBuilder::disable_constraints),
    (BulkPhase::ClearRows, CommandBuilder::clear_table),
    (BulkPhase::EnableConstraints, CommandBuilder::enable_constraints),
];

impl UnitOfWork {
    /// Empties every base table except system tables and `excluded`, and
    /// resets their identity counters.
    ///
    /// # Errors
    /// `ProtectedEnvironment` in Staging or Production, before anything is
    /// sent to the store. Per-table failures are not errors; see
    /// [`BulkReport::failures`].
    pub async fn clear_all_tables(&mut self, excluded: &[&str]) -> Result<BulkReport> {
        let span = self.span.clone();
        let limit = self.shared.config.command_timeout;
        with_timeout(limit, "clear all tables", self.clear_all_inner(excluded))
            .instrument(span)
            .await
    }

    /// [`UnitOfWork::clear_all_tables`] that stops when `signal` completes.
    pub async fn clear_all_tables_until<S>(&mut self, excluded: &[&str], signal: S) -> Result<BulkReport>
    where
        S: Future<Output = ()>,
    {
        until("clear all tables", self.clear_all_tables(excluded), signal).await
    }

    /// Same three passes as [`UnitOfWork::clear_all_tables`], restricted to
    /// `names`. System tables are skipped even when listed.
    pub async fn truncate_tables(&mut self, names: &[&str]) -> Result<BulkReport> {
        let span = self.span.clone();
        let limit = self.shared.config.command_timeout;
        with_timeout(limit, "truncate tables", self.truncate_inner(names))
            .instrument(span)
            .await
    }

    pub async fn truncate_tables_until<S>(&mut self, names: &[&str], signal: S) -> Result<BulkReport>
    where
        S: Future<Output = ()>,
    {
        until("truncate tables", self.truncate_tables(names), signal).await
    }

    fn guard_environment(&self, operation: &'static str) -> Result<()> {
        let environment = self.shared.config.environment;
        if environment.is_protected() {
            return Err(DbError::ProtectedEnvironment {
                operation,
                environment: environment.to_string(),
            });
        }
        Ok(())
    }

    async fn clear_all_inner(&mut self, excluded: &[&str]) -> Result<BulkReport> {
        self.ensure_usable()?;
        self.guard_environment("clear all tables")?;

        let shared = Arc::clone(&self.shared);
        let conn = self.connection.as_deref_mut().ok_or(DbError::Disposed)?;
        let mut guard = ConnectionGuard::open(conn).await?;

        let tables: Vec<String> = discover_tables(&mut *guard, &shared)
            .await?
            .into_iter()
            .filter(|table| !excluded.iter().any(|e| e.eq_ignore_ascii_case(table)))
            .collect();

        Ok(run_phases(&mut *guard, &shared, tables).await)
    }

    async fn truncate_inner(&mut self, names: &[&str]) -> Result<BulkReport> {
        self.ensure_usable()?;
        self.guard_environment("truncate tables")?;

        let shared = Arc::clone(&self.shared);
        let mut tables: Vec<String> = Vec::with_capacity(names.len());
        for name in names {
            if shared.config.is_system_table(name)
                || tables.iter().any(|t| t.eq_ignore_ascii_case(name))
            {
                continue;
            }
            tables.push(name.to_string());
        }

        let conn = self.connection.as_deref_mut().ok_or(DbError::Disposed)?;
        let mut guard = ConnectionGuard::open(conn).await?;
        Ok(run_phases(&mut *guard, &shared, tables).await)
    }
}

/// Base tables of the store, minus the configured system tables.
pub(crate) async fn discover_tables(conn: &mut dyn Connection, shared: &Shared) -> Result<Vec<String>> {
    let command = shared.builder.list_base_tables(&shared.config.system_tables);
    let result = run_query(conn, shared, command).await?;

    Ok(result
        .rows
        .iter()
        .filter_map(|row| row.first().and_then(|v| v.as_str()).map(str::to_string))
        .filter(|table| !shared.config.is_system_table(table))
        .collect())
}

async fn run_phases(conn: &mut dyn Connection, shared: &Shared, tables: Vec<String>) -> BulkReport {
    let mut failures = Vec::new();

    for (phase, render) in PHASES {
        for table in &tables {
            let command = render(&shared.builder, table);
            if let Err(e) = run_execute(conn, shared, command).await {
                warn!(table = %table, phase = %phase, error = %e, "bulk table step failed");
                failures.push(TableFailure {
                    table: table.clone(),
                    phase,
                    error: e.to_string(),
                });
            }
        }
    }

    info!(tables = tables.len(), failures = failures.len(), "bulk table operation finished");
    BulkReport { tables, failures }
}
