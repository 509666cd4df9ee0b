use super::table::{Table, TableSchema};
use super::undo::UndoEntry;
use crate::command::{Command, CommandKind, KeySource, Parameter};
use crate::connection::{Connection, ExecuteOutcome, Store};
use crate::core::{DbError, QueryResult, Result, Row, Value};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Handler behind a registered stored procedure.
pub type ProcedureFn = Arc<dyn Fn(&ProcedureContext<'_>) -> Result<QueryResult> + Send + Sync>;

/// What a stored procedure handler can see: its bound parameters and a
/// read-only view of the tables.
pub struct ProcedureContext<'a> {
    db: &'a Database,
    parameters: &'a [Parameter],
}

impl ProcedureContext<'_> {
    pub fn parameters(&self) -> &[Parameter] {
        self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&Value> {
        let wanted = name.trim_start_matches('@');
        self.parameters
            .iter()
            .find(|p| p.name.trim_start_matches('@').eq_ignore_ascii_case(wanted))
            .map(|p| &p.value)
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.db.table(name)
    }

    /// All rows of a table with every column, in key order.
    pub fn scan(&self, name: &str) -> Result<QueryResult> {
        let table = self.db.table(name)?;
        let columns = table
            .schema()
            .columns()
            .iter()
            .map(|c| c.name.clone())
            .collect();
        let rows = table.rows().map(|(_, row)| row.clone()).collect();
        Ok(QueryResult::new(columns, rows))
    }
}

#[derive(Default)]
struct Database {
    /// Keyed by lower-cased table name
    tables: BTreeMap<String, Table>,
    /// Last value issued by each sequence, keyed by lower-cased name
    sequences: HashMap<String, i64>,
    procedures: HashMap<String, ProcedureFn>,
    /// Tables whose writes fail, for exercising failure paths
    failing: HashSet<String>,
}

impl Database {
    fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(&name.to_ascii_lowercase())
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    fn check_writable(&self, table: &str) -> Result<()> {
        if self.failing.contains(&table.to_ascii_lowercase()) {
            return Err(DbError::ExecutionError(format!(
                "Write to '{}' rejected by the store",
                table
            )));
        }
        Ok(())
    }

    fn next_sequence_value(&mut self, name: &str, restart_at: Option<i64>) -> Result<i64> {
        let last = self
            .sequences
            .get_mut(&name.to_ascii_lowercase())
            .ok_or_else(|| DbError::ExecutionError(format!("Sequence '{}' not found", name)))?;
        if let Some(start) = restart_at {
            *last = start - 1;
        }
        *last += 1;
        Ok(*last)
    }

    /// Every parent key a row points at must exist while the row's table has
    /// its constraints enabled.
    fn check_references(&self, table: &Table, row: &Row) -> Result<()> {
        if !table.constraints_enabled() {
            return Ok(());
        }
        self.check_parent_keys(table, row)
    }

    fn check_parent_keys(&self, table: &Table, row: &Row) -> Result<()> {
        for fk in table.schema().foreign_keys() {
            let Some(idx) = table.schema().find_column_index(&fk.column) else {
                continue;
            };
            let Some(parent_key) = row[idx].as_i64() else {
                continue;
            };
            let parent = self.table(&fk.references)?;
            if !parent.contains_key(parent_key) {
                return Err(DbError::ConstraintViolation(format!(
                    "{}.{} = {} has no matching row in '{}'",
                    table.name(),
                    fk.column,
                    parent_key,
                    parent.name()
                )));
            }
        }
        Ok(())
    }

    /// Fails when an enabled child table still points at one of `keys` in
    /// `parent`. `keys = None` means every row of the parent.
    fn check_not_referenced(&self, parent: &str, keys: Option<&[i64]>) -> Result<()> {
        for child in self.tables.values() {
            if !child.constraints_enabled() {
                continue;
            }
            for fk in child.schema().foreign_keys() {
                if !fk.references.eq_ignore_ascii_case(parent) {
                    continue;
                }
                let referenced = child.referenced_keys(&fk.column);
                let blocked = match keys {
                    Some(keys) => referenced.iter().find(|k| keys.contains(*k)),
                    None => referenced.first(),
                };
                if let Some(key) = blocked {
                    return Err(DbError::ConstraintViolation(format!(
                        "Row {} of '{}' is referenced by {}.{}",
                        key,
                        parent,
                        child.name(),
                        fk.column
                    )));
                }
            }
        }
        Ok(())
    }

    fn revert(&mut self, entry: UndoEntry) {
        match self.table_mut(entry.table_name()) {
            Ok(table) => entry.revert(table),
            Err(e) => warn!(error = %e, "could not revert change"),
        }
    }

    fn apply(&mut self, kind: &CommandKind, undo: &mut Vec<UndoEntry>) -> Result<ExecuteOutcome> {
        match kind {
            CommandKind::Insert {
                table,
                columns,
                rows,
                key_source,
            } => self.insert(table, columns, rows, key_source, undo),
            CommandKind::Update {
                table,
                key,
                columns,
                values,
                ..
            } => self.update(table, *key, columns, values, undo),
            CommandKind::Delete { table, key, .. } => {
                self.check_writable(table)?;
                self.check_not_referenced(table, Some(&[*key]))?;
                let t = self.table_mut(table)?;
                let old_row = t.remove(*key)?;
                undo.push(UndoEntry::DeleteRow {
                    table: t.name().to_string(),
                    key: *key,
                    old_row,
                });
                Ok(ExecuteOutcome::affected(1))
            }
            CommandKind::DisableConstraints { table } => {
                let t = self.table_mut(table)?;
                undo.push(UndoEntry::Constraints {
                    table: t.name().to_string(),
                    was_enabled: t.constraints_enabled(),
                });
                t.set_constraints_enabled(false);
                Ok(ExecuteOutcome::default())
            }
            CommandKind::EnableConstraints { table } => {
                let t = self.table(table)?;
                let was_enabled = t.constraints_enabled();
                for (_, row) in t.rows() {
                    self.check_parent_keys(t, row)?;
                }

                let t = self.table_mut(table)?;
                undo.push(UndoEntry::Constraints {
                    table: t.name().to_string(),
                    was_enabled,
                });
                t.set_constraints_enabled(true);
                Ok(ExecuteOutcome::default())
            }
            CommandKind::ClearTable { table } => {
                self.check_writable(table)?;
                self.check_not_referenced(table, None)?;
                let t = self.table_mut(table)?;
                let rows = t.take_rows();
                let cleared = rows.len() as u64;
                t.reseed(0);
                undo.push(UndoEntry::ClearTable {
                    table: t.name().to_string(),
                    rows,
                });
                Ok(ExecuteOutcome::affected(cleared))
            }
            other => Err(DbError::ExecutionError(format!(
                "{:?} returns rows and cannot be executed as a write",
                other
            ))),
        }
    }

    fn insert(
        &mut self,
        table_name: &str,
        columns: &[String],
        rows: &[Row],
        key_source: &KeySource,
        undo: &mut Vec<UndoEntry>,
    ) -> Result<ExecuteOutcome> {
        self.check_writable(table_name)?;
        let mut generated_keys = Vec::with_capacity(rows.len());

        for (idx, values) in rows.iter().enumerate() {
            let row = self.table(table_name)?.build_row(columns, values)?;

            let key = match key_source {
                KeySource::Identity => match row[0].as_i64() {
                    Some(explicit) if explicit != 0 => {
                        let table = self.table_mut(table_name)?;
                        table.observe_explicit_key(explicit);
                        explicit
                    }
                    _ => self.table_mut(table_name)?.next_identity(),
                },
                KeySource::Sequence {
                    name,
                    restart_from_max,
                } => {
                    // restart once per statement, before the first row
                    let restart_at = if *restart_from_max && idx == 0 {
                        Some(self.table(table_name)?.max_key() + 1)
                    } else {
                        None
                    };
                    self.next_sequence_value(name, restart_at)?
                }
            };

            let mut row = row;
            row[0] = Value::Integer(key);
            self.check_references(self.table(table_name)?, &row)?;

            let table = self.table_mut(table_name)?;
            table.insert(key, row)?;
            undo.push(UndoEntry::InsertRow {
                table: table.name().to_string(),
                key,
            });
            generated_keys.push(key);
        }

        Ok(ExecuteOutcome {
            rows_affected: generated_keys.len() as u64,
            generated_keys,
        })
    }

    fn update(
        &mut self,
        table_name: &str,
        key: i64,
        columns: &[String],
        values: &[Value],
        undo: &mut Vec<UndoEntry>,
    ) -> Result<ExecuteOutcome> {
        self.check_writable(table_name)?;
        let table = self.table(table_name)?;
        let Some(current) = table.get(key) else {
            return Err(DbError::ExecutionError(format!(
                "Expected to affect 1 row in '{}', but actually affected 0",
                table.name()
            )));
        };

        let patch = table.build_row(columns, values)?;
        let mut row = current.clone();
        for column in columns {
            if let Some(idx) = table.schema().find_column_index(column) {
                row[idx] = patch[idx].clone();
            }
        }
        self.check_references(table, &row)?;

        let table = self.table_mut(table_name)?;
        let old_row = table.replace(key, row)?;
        undo.push(UndoEntry::UpdateRow {
            table: table.name().to_string(),
            key,
            old_row,
        });
        Ok(ExecuteOutcome::affected(1))
    }

    fn query(&self, command: &Command) -> Result<QueryResult> {
        match &command.kind {
            CommandKind::Select { table, columns } => {
                let t = self.table(table)?;
                let rows = t
                    .rows()
                    .map(|(_, row)| t.project(row, columns))
                    .collect::<Result<Vec<_>>>()?;
                Ok(QueryResult::new(columns.clone(), rows))
            }
            CommandKind::ListBaseTables => {
                let rows = self
                    .tables
                    .values()
                    .map(|t| vec![Value::Text(t.name().to_string())])
                    .collect();
                Ok(QueryResult::new(vec!["TABLE_NAME".to_string()], rows))
            }
            CommandKind::Procedure { name } => {
                let handler = self
                    .procedures
                    .get(&name.to_ascii_lowercase())
                    .ok_or_else(|| DbError::ProcedureNotFound(name.clone()))?;
                let ctx = ProcedureContext {
                    db: self,
                    parameters: &command.parameters,
                };
                handler(&ctx)
            }
            other => Err(DbError::ExecutionError(format!(
                "{:?} does not return rows",
                other
            ))),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    created: AtomicU64,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// Connection counters of a [`MemoryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    pub connections_created: u64,
    pub opened: usize,
    pub closed: usize,
}

impl StoreStats {
    pub fn open_connections(&self) -> usize {
        self.opened.saturating_sub(self.closed)
    }
}

/// Reference entity store kept in memory.
///
/// Behaves like a small relational database: integer keys with an identity
/// counter per table, named sequences, foreign keys that can be switched off
/// per table, stored procedures, and native transactions backed by an undo
/// log. Identity and sequence values are never rolled back.
///
/// Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    db: Arc<RwLock<Database>>,
    counters: Arc<Counters>,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every command by `latency` before it runs.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn create_table(&self, schema: TableSchema) -> Result<()> {
        schema.validate()?;
        let mut db = self.db.write()?;
        let key = schema.name().to_ascii_lowercase();
        if db.tables.contains_key(&key) {
            return Err(DbError::ExecutionError(format!(
                "Table '{}' already exists",
                schema.name()
            )));
        }
        db.tables.insert(key, Table::new(schema));
        Ok(())
    }

    pub fn create_sequence(&self, name: &str) -> Result<()> {
        self.db
            .write()?
            .sequences
            .entry(name.to_ascii_lowercase())
            .or_insert(0);
        Ok(())
    }

    pub fn register_procedure<F>(&self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(&ProcedureContext<'_>) -> Result<QueryResult> + Send + Sync + 'static,
    {
        self.db
            .write()?
            .procedures
            .insert(name.to_ascii_lowercase(), Arc::new(handler));
        Ok(())
    }

    /// Writes a full row with an explicit key the way a second application
    /// sharing the database would: identity and sequences are not consulted
    /// or advanced.
    pub fn seed(&self, table: &str, row: Row) -> Result<i64> {
        let mut db = self.db.write()?;
        let t = db.table_mut(table)?;
        let key = row
            .first()
            .and_then(Value::as_i64)
            .filter(|k| *k != 0)
            .ok_or_else(|| {
                DbError::ExecutionError(format!("Seeded row for '{}' needs an explicit key", table))
            })?;
        t.insert(key, row)?;
        Ok(key)
    }

    pub fn rows(&self, table: &str) -> Result<Vec<Row>> {
        let db = self.db.read()?;
        Ok(db.table(table)?.rows().map(|(_, row)| row.clone()).collect())
    }

    pub fn row_count(&self, table: &str) -> Result<usize> {
        Ok(self.db.read()?.table(table)?.row_count())
    }

    pub fn last_identity(&self, table: &str) -> Result<i64> {
        Ok(self.db.read()?.table(table)?.last_identity())
    }

    pub fn constraints_enabled(&self, table: &str) -> Result<bool> {
        Ok(self.db.read()?.table(table)?.constraints_enabled())
    }

    /// Last value issued by a sequence, `0` before the first.
    pub fn sequence_value(&self, name: &str) -> Option<i64> {
        self.db
            .read()
            .ok()?
            .sequences
            .get(&name.to_ascii_lowercase())
            .copied()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.db
            .read()
            .map(|db| db.tables.values().map(|t| t.name().to_string()).collect())
            .unwrap_or_default()
    }

    /// Makes every write to `table` fail until [`MemoryStore::clear_failures`].
    pub fn fail_writes_to(&self, table: &str) -> Result<()> {
        self.db.write()?.failing.insert(table.to_ascii_lowercase());
        Ok(())
    }

    pub fn clear_failures(&self) -> Result<()> {
        self.db.write()?.failing.clear();
        Ok(())
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            connections_created: self.counters.created.load(Ordering::SeqCst),
            opened: self.counters.opened.load(Ordering::SeqCst),
            closed: self.counters.closed.load(Ordering::SeqCst),
        }
    }

    pub fn connection(&self) -> MemoryConnection {
        let id = self.counters.created.fetch_add(1, Ordering::SeqCst) + 1;
        MemoryConnection {
            id,
            store: self.clone(),
            open: false,
            undo: None,
        }
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("tables", &self.table_names())
            .field("stats", &self.stats())
            .finish()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        Ok(Box::new(self.connection()))
    }
}

/// A session against a [`MemoryStore`].
pub struct MemoryConnection {
    id: u64,
    store: MemoryStore,
    open: bool,
    /// `Some` while a native transaction is active
    undo: Option<Vec<UndoEntry>>,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(DbError::ConnectionClosed)
        }
    }

    async fn delay(&self) {
        if let Some(latency) = self.store.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn revert_all(&mut self, entries: Vec<UndoEntry>) -> Result<()> {
        let mut db = self.store.db.write()?;
        for entry in entries.into_iter().rev() {
            db.revert(entry);
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn open(&mut self) -> Result<()> {
        if !self.open {
            self.open = true;
            self.store.counters.opened.fetch_add(1, Ordering::SeqCst);
            trace!(connection = self.id, "connection opened");
        }
        Ok(())
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        if let Some(entries) = self.undo.take() {
            debug!(connection = self.id, "closing with an active transaction, rolling back");
            if let Err(e) = self.revert_all(entries) {
                warn!(connection = self.id, error = %e, "rollback on close failed");
            }
        }
        self.open = false;
        self.store.counters.closed.fetch_add(1, Ordering::SeqCst);
        trace!(connection = self.id, "connection closed");
    }

    fn in_transaction(&self) -> bool {
        self.undo.is_some()
    }

    async fn begin(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.undo.is_some() {
            return Err(DbError::ExecutionError(
                "Connection already has an active transaction".to_string(),
            ));
        }
        self.undo = Some(Vec::new());
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.undo
            .take()
            .map(|_| ())
            .ok_or_else(|| DbError::ExecutionError("No active transaction".to_string()))
    }

    async fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        let entries = self
            .undo
            .take()
            .ok_or_else(|| DbError::ExecutionError("No active transaction".to_string()))?;
        self.revert_all(entries)
    }

    async fn execute(&mut self, command: &Command) -> Result<ExecuteOutcome> {
        self.ensure_open()?;
        self.delay().await;
        trace!(connection = self.id, sql = %command.text, "execute");

        let mut local = Vec::new();
        let mut db = self.store.db.write()?;
        match db.apply(&command.kind, &mut local) {
            Ok(outcome) => {
                if let Some(undo) = self.undo.as_mut() {
                    undo.extend(local);
                }
                Ok(outcome)
            }
            Err(e) => {
                // a failed statement leaves no partial rows behind
                for entry in local.into_iter().rev() {
                    db.revert(entry);
                }
                Err(e)
            }
        }
    }

    async fn query(&mut self, command: &Command) -> Result<QueryResult> {
        self.ensure_open()?;
        self.delay().await;
        trace!(connection = self.id, sql = %command.text, "query");
        self.store.db.read()?.query(command)
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.close();
    }
}
