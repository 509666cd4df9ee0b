// ============================================================================
// Transaction State
// ============================================================================
//
// A unit of work is either Idle or InTransaction. Only `begin` leaves Idle
// and only `end` (commit or rollback) returns to it; every other transition
// is a caller bug reported as a state-misuse error.
//
// ============================================================================

use crate::core::{DbError, Result};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_UNIT_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one unit of work in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub u64);

impl UnitId {
    pub fn new() -> Self {
        UnitId(NEXT_UNIT_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for UnitId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "uow_{}", self.0)
    }
}

/// ```text
/// Idle ──begin──> InTransaction
///   ^                  │
///   └──commit/rollback─┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    #[default]
    Idle,
    InTransaction,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::InTransaction)
    }

    /// Idle -> InTransaction.
    ///
    /// # Errors
    /// `AlreadyInTransaction` when a transaction is open; the state is left
    /// unchanged.
    pub fn begin(&mut self) -> Result<()> {
        if self.is_active() {
            return Err(DbError::AlreadyInTransaction);
        }
        *self = TransactionState::InTransaction;
        Ok(())
    }

    /// Checks that `end` would succeed without changing the state.
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(DbError::NotInTransaction)
        }
    }

    /// InTransaction -> Idle.
    pub fn end(&mut self) -> Result<()> {
        self.ensure_active()?;
        *self = TransactionState::Idle;
        Ok(())
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Idle => write!(f, "IDLE"),
            TransactionState::InTransaction => write!(f, "IN TRANSACTION"),
        }
    }
}
