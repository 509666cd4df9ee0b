// ============================================================================
// Change Tracking
// ============================================================================
//
// The in-memory side of a unit of work: which entities are staged as added,
// modified or deleted, and whether an explicit transaction is open. Nothing
// in this module talks to the store.
//
// ============================================================================

pub mod change;
pub mod state;
pub mod tracker;

pub use change::{EntryHandle, EntryState, TrackedEntry};
pub use state::{TransactionState, UnitId};
pub use tracker::ChangeTracker;
