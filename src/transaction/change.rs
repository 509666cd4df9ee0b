// ============================================================================
// Tracked entries
// ============================================================================
//
// The change tracker keeps values, not entity instances. Each entry holds the
// current row and, once the entity has been seen in the store, the original
// row it was loaded with. Reverting an entry means putting `original` back.
//
// ============================================================================

use crate::core::{Record, Row, Value};
use crate::entity::Entity;
use std::any::TypeId;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryState {
    Unchanged,
    Added,
    Modified,
    Deleted,
}

impl EntryState {
    /// Whether a flush has to write this entry.
    pub fn is_pending(&self) -> bool {
        !matches!(self, EntryState::Unchanged)
    }
}

impl std::fmt::Display for EntryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntryState::Unchanged => "Unchanged",
            EntryState::Added => "Added",
            EntryState::Modified => "Modified",
            EntryState::Deleted => "Deleted",
        };
        write!(f, "{}", name)
    }
}

/// Handle returned when an entity is staged, used to look up the key the
/// store assigned to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryHandle(pub(crate) u64);

#[derive(Debug, Clone)]
pub struct TrackedEntry {
    pub(crate) handle: EntryHandle,
    pub(crate) type_id: TypeId,
    pub type_name: &'static str,
    pub table: &'static str,
    pub columns: &'static [&'static str],
    pub state: EntryState,
    pub current: Row,
    /// Values as last seen in the store. `None` for added entities and for
    /// entities updated without being loaded first.
    pub original: Option<Row>,
}

impl TrackedEntry {
    pub(crate) fn new<T: Entity>(handle: EntryHandle, entity: &T, state: EntryState) -> Self {
        let current = entity.to_values();
        let original = match state {
            EntryState::Unchanged | EntryState::Deleted => Some(current.clone()),
            EntryState::Added | EntryState::Modified => None,
        };
        Self {
            handle,
            type_id: TypeId::of::<T>(),
            type_name: T::type_name(),
            table: T::TABLE,
            columns: T::COLUMNS,
            state,
            current,
            original,
        }
    }

    pub fn handle(&self) -> EntryHandle {
        self.handle
    }

    pub fn key(&self) -> i64 {
        self.current.first().and_then(Value::as_i64).unwrap_or(0)
    }

    pub(crate) fn is<T: Entity>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    pub(crate) fn set_key(&mut self, key: i64) {
        if let Some(slot) = self.current.first_mut() {
            *slot = Value::Integer(key);
        }
    }

    /// Rebuilds the entity from its current values.
    pub fn to_entity<T: Entity>(&self) -> crate::core::Result<T> {
        let columns: Arc<[String]> = self.columns.iter().map(|c| c.to_string()).collect();
        T::from_record(&Record::new(columns, self.current.clone()))
    }
}
