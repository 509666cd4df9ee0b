// ============================================================================
// Unit of Work
// ============================================================================
//
// One `UnitOfWork` per logical operation. It owns one store connection, one
// change set and at most one open transaction, and every method takes
// `&mut self`, so an instance cannot be shared between concurrent callers.
//
// Write path:
//   stage (add/update/remove) -> commit -> interceptors -> connection
//
// A flush outside an explicit transaction runs inside an implicit native
// transaction. A failed flush rolls back, reverts the change set and is
// reported as `DbError::CommitFailed` carrying the store error.
//
// ============================================================================

mod bulk;
mod factory;
mod procedure;
mod query;
mod transactions;

pub use bulk::{BulkPhase, BulkReport, TableFailure};
pub use factory::{UnitOfWorkFactory, UnitOfWorkFactoryBuilder};
pub use procedure::{ColumnMap, FromRecord, map_rows};
pub use query::Query;

use crate::command::{Command, CommandBuilder};
use crate::connection::{Connection, ConnectionGuard, ExecuteOutcome, PersistenceConfig};
use crate::core::{DbError, QueryResult, Result};
use crate::entity::{Entity, EntityRegistry, short_type_name};
use crate::interceptor::InterceptorChain;
use crate::notify::{ChangeNotification, ChangeObserver};
use crate::transaction::{
    ChangeTracker, EntryHandle, EntryState, TrackedEntry, TransactionState, UnitId,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, Span, debug, error, info_span, warn};

/// Everything a factory hands to the units of work it creates.
pub(crate) struct Shared {
    pub(crate) config: PersistenceConfig,
    pub(crate) registry: EntityRegistry,
    pub(crate) interceptors: InterceptorChain,
    pub(crate) observers: Vec<Arc<dyn ChangeObserver>>,
    pub(crate) builder: CommandBuilder,
    pub(crate) parent_span: Option<Span>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOptions {
    /// Notify change observers after a successful flush.
    pub notify: bool,
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self { notify: true }
    }
}

/// What a successful `commit` wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Distinct entity type names, in staging order.
    pub changed_types: Vec<&'static str>,
    /// Store-assigned keys of added entities.
    pub generated_keys: Vec<(EntryHandle, i64)>,
    pub rows_affected: u64,
}

impl CommitSummary {
    pub fn is_empty(&self) -> bool {
        self.changed_types.is_empty()
    }

    /// Key the store assigned to the entity staged under `handle`.
    pub fn key_of(&self, handle: EntryHandle) -> Option<i64> {
        self.generated_keys
            .iter()
            .find(|(h, _)| *h == handle)
            .map(|(_, key)| *key)
    }

    /// Writes the key generated for `handle` into `entity`. Returns false
    /// when the commit assigned no key to that handle.
    pub fn assign_key<T: Entity>(&self, handle: EntryHandle, entity: &mut T) -> bool {
        match self.key_of(handle) {
            Some(key) => {
                entity.set_id(key);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Default)]
struct FlushOutcome {
    keys: Vec<(EntryHandle, i64)>,
    rows_affected: u64,
}

pub struct UnitOfWork {
    id: UnitId,
    shared: Arc<Shared>,
    /// `None` once disposed
    connection: Option<Box<dyn Connection>>,
    /// `begin_transaction` opened the connection and closes it when the
    /// transaction ends
    opened_for_transaction: bool,
    tracker: ChangeTracker,
    state: TransactionState,
    span: Span,
}

impl UnitOfWork {
    pub(crate) fn new(shared: Arc<Shared>, connection: Box<dyn Connection>) -> Self {
        let id = UnitId::new();
        let span = match &shared.parent_span {
            Some(parent) => info_span!(parent: parent, "uow", id = %id, connection = connection.id()),
            None => info_span!(
                "uow",
                id = %id,
                connection = connection.id(),
                database = %shared.config.database
            ),
        };

        Self {
            id,
            shared,
            connection: Some(connection),
            opened_for_transaction: false,
            tracker: ChangeTracker::new(),
            state: TransactionState::Idle,
            span,
        }
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.shared.config
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn is_disposed(&self) -> bool {
        self.connection.is_none()
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.connection.is_none() {
            return Err(DbError::Disposed);
        }
        Ok(())
    }

    fn ensure_mapped<T: Entity>(&self) -> Result<()> {
        self.shared.registry.mapping::<T>().map(|_| ())
    }

    // ------------------------------------------------------------------
    // Staging
    // ------------------------------------------------------------------

    /// Stages a new entity. Its key is assigned on commit, see
    /// [`CommitSummary::key_of`].
    pub fn add<T: Entity>(&mut self, entity: &T) -> Result<EntryHandle> {
        self.ensure_usable()?;
        self.ensure_mapped::<T>()?;
        Ok(self.tracker.add(entity))
    }

    pub fn update<T: Entity>(&mut self, entity: &T) -> Result<EntryHandle> {
        self.ensure_usable()?;
        self.ensure_mapped::<T>()?;
        Ok(self.tracker.update(entity))
    }

    pub fn remove<T: Entity>(&mut self, entity: &T) -> Result<()> {
        self.ensure_usable()?;
        self.ensure_mapped::<T>()?;
        self.tracker.remove(entity)
    }

    /// Tracks an entity as unchanged, e.g. one loaded elsewhere.
    pub fn attach<T: Entity>(&mut self, entity: &T) -> Result<EntryHandle> {
        self.ensure_usable()?;
        self.ensure_mapped::<T>()?;
        Ok(self.tracker.attach(entity))
    }

    pub fn entry_state<T: Entity>(&self, id: i64) -> Option<EntryState> {
        self.tracker.entry_state::<T>(id)
    }

    pub fn tracked<T: Entity>(&self, id: i64) -> Result<Option<T>> {
        self.tracker.tracked::<T>(id)
    }

    pub fn has_changes(&self) -> bool {
        self.tracker.has_changes()
    }

    /// Discards the change set without touching the store.
    pub fn clear_change_tracker(&mut self) {
        self.tracker.clear();
    }

    // ------------------------------------------------------------------
    // Commit
    // ------------------------------------------------------------------

    /// Flushes the change set to the store, whether or not a transaction is
    /// open, and notifies observers.
    pub async fn commit(&mut self) -> Result<CommitSummary> {
        self.commit_with(CommitOptions::default()).await
    }

    pub async fn commit_with(&mut self, options: CommitOptions) -> Result<CommitSummary> {
        let span = self.span.clone();
        self.commit_inner(options).instrument(span).await
    }

    async fn commit_inner(&mut self, options: CommitOptions) -> Result<CommitSummary> {
        self.ensure_usable()?;
        if !self.tracker.has_changes() {
            return Ok(CommitSummary::default());
        }

        let changed_types = self.changed_types();
        let outcome = match self.flush().await {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.commit_failure(e).await),
        };
        self.tracker.accept_changes(&outcome.keys);

        let summary = CommitSummary {
            changed_types,
            generated_keys: outcome.keys,
            rows_affected: outcome.rows_affected,
        };
        debug!(
            rows = summary.rows_affected,
            types = ?summary.changed_types,
            "changes committed"
        );

        if options.notify && self.shared.config.notify_on_commit {
            self.notify(&summary);
        }
        Ok(summary)
    }

    fn changed_types(&self) -> Vec<&'static str> {
        let mut types: Vec<&'static str> = Vec::new();
        for entry in self.tracker.changes() {
            let name = short_type_name(entry.type_name);
            if !types.contains(&name) {
                types.push(name);
            }
        }
        types
    }

    fn notify(&self, summary: &CommitSummary) {
        if summary.is_empty() || self.shared.observers.is_empty() {
            return;
        }
        let notification = ChangeNotification {
            unit: self.id,
            changed_types: summary.changed_types.clone(),
        };
        for observer in &self.shared.observers {
            observer.entities_changed(&notification);
        }
    }

    /// Writes the change set. Inside an explicit transaction the writes join
    /// it; otherwise they run in a transaction of their own.
    async fn flush(&mut self) -> Result<FlushOutcome> {
        let conn = self.connection.as_deref_mut().ok_or(DbError::Disposed)?;
        if self.state.is_active() {
            return flush_changes(conn, &self.shared, &self.tracker).await;
        }

        let mut guard = ConnectionGuard::open(conn).await?;
        guard.begin().await?;
        match flush_changes(&mut *guard, &self.shared, &self.tracker).await {
            Ok(outcome) => {
                guard.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback_err) = guard.rollback().await {
                    warn!(error = %rollback_err, "rollback of failed flush failed");
                }
                Err(e)
            }
        }
    }

    /// Rolls back an open transaction, reverts the change set and wraps the
    /// store error.
    async fn commit_failure(&mut self, cause: DbError) -> DbError {
        error!(error = %cause, "commit failed");

        if self.state.is_active() {
            if let Some(conn) = self.connection.as_deref_mut()
                && let Err(rollback_err) = conn.rollback().await
            {
                warn!(error = %rollback_err, "rollback after failed commit failed");
            }
            self.state = TransactionState::Idle;
            self.release_transaction_connection();
        }

        let failures = self.tracker.reject_changes();
        if failures > 0 {
            warn!(failures, "change set only partially reverted");
        }
        DbError::commit_failed(cause)
    }

    fn release_transaction_connection(&mut self) {
        if self.opened_for_transaction {
            if let Some(conn) = self.connection.as_deref_mut() {
                conn.close();
            }
            self.opened_for_transaction = false;
        }
    }

    // ------------------------------------------------------------------
    // Disposal
    // ------------------------------------------------------------------

    /// Rolls back an open transaction, then releases the connection.
    /// Calling it again does nothing.
    pub async fn dispose(&mut self) {
        let Some(mut conn) = self.connection.take() else {
            return;
        };

        if self.state.is_active() {
            if let Err(e) = conn.rollback().await {
                warn!(parent: &self.span, error = %e, "rollback on dispose failed");
            }
            self.state = TransactionState::Idle;
            self.tracker.clear();
        }
        conn.close();
        self.opened_for_transaction = false;
        debug!(parent: &self.span, "unit of work disposed");
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            if self.state.is_active() {
                warn!(parent: &self.span, "dropped with an open transaction, abandoning it");
            }
            // closing abandons the native transaction
            conn.close();
        }
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("tracked", &self.tracker.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------
// Command plumbing shared by the operations
// ----------------------------------------------------------------------

pub(crate) async fn run_execute(
    conn: &mut dyn Connection,
    shared: &Shared,
    mut command: Command,
) -> Result<ExecuteOutcome> {
    shared.interceptors.apply_async(&mut command).await;
    conn.execute(&command).await
}

pub(crate) async fn run_query(
    conn: &mut dyn Connection,
    shared: &Shared,
    mut command: Command,
) -> Result<QueryResult> {
    shared.interceptors.apply_async(&mut command).await;
    conn.query(&command).await
}

/// Inserts first, batched per run of one table, then updates, then deletes
/// newest-first.
async fn flush_changes(
    conn: &mut dyn Connection,
    shared: &Shared,
    tracker: &ChangeTracker,
) -> Result<FlushOutcome> {
    let pending: Vec<&TrackedEntry> = tracker.changes().collect();
    let mut outcome = FlushOutcome::default();

    let added: Vec<&TrackedEntry> = pending
        .iter()
        .copied()
        .filter(|e| e.state == EntryState::Added)
        .collect();
    for run in added.chunk_by(|a, b| a.table == b.table) {
        let rows = run.iter().map(|e| e.current.clone()).collect();
        let mut handles = run.iter().map(|e| e.handle());
        for command in shared.builder.insert(run[0].table, run[0].columns, rows) {
            let result = run_execute(conn, shared, command).await?;
            outcome.rows_affected += result.rows_affected;
            for key in result.generated_keys {
                if let Some(handle) = handles.next() {
                    outcome.keys.push((handle, key));
                }
            }
        }
    }

    for entry in pending.iter().filter(|e| e.state == EntryState::Modified) {
        let command = shared
            .builder
            .update(entry.table, entry.columns, entry.current.clone());
        outcome.rows_affected += run_execute(conn, shared, command).await?.rows_affected;
    }

    for entry in pending.iter().rev().filter(|e| e.state == EntryState::Deleted) {
        let command = shared
            .builder
            .delete(entry.table, entry.columns[0], entry.key());
        outcome.rows_affected += run_execute(conn, shared, command).await?.rows_affected;
    }

    Ok(outcome)
}

// ----------------------------------------------------------------------
// Cancellation
// ----------------------------------------------------------------------

pub(crate) async fn with_timeout<T>(
    limit: Option<Duration>,
    operation: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
            DbError::Cancelled(format!("{} timed out after {:?}", operation, limit))
        })?,
        None => fut.await,
    }
}

/// Runs `fut` until it finishes or `signal` fires. Dropping `fut` releases
/// any connection it opened.
pub(crate) async fn until<T>(
    operation: &str,
    fut: impl Future<Output = Result<T>>,
    signal: impl Future<Output = ()>,
) -> Result<T> {
    tokio::select! {
        biased;
        result = fut => result,
        _ = signal => Err(DbError::Cancelled(format!("{} cancelled", operation))),
    }
}
