use super::change::{EntryHandle, EntryState, TrackedEntry};
use crate::core::{DbError, Result};
use crate::entity::Entity;
use std::collections::BTreeMap;
use tracing::warn;

/// The change set of one unit of work.
///
/// Entries are kept in staging order, which is also the order a flush
/// writes them in.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    entries: BTreeMap<EntryHandle, TrackedEntry>,
    next_handle: u64,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_handle(&mut self) -> EntryHandle {
        self.next_handle += 1;
        EntryHandle(self.next_handle)
    }

    fn find<T: Entity>(&self, key: i64) -> Option<EntryHandle> {
        if key == 0 {
            return None;
        }
        self.entries
            .values()
            .find(|e| e.is::<T>() && e.key() == key)
            .map(|e| e.handle)
    }

    fn insert<T: Entity>(&mut self, entity: &T, state: EntryState) -> EntryHandle {
        let handle = self.next_handle();
        self.entries
            .insert(handle, TrackedEntry::new(handle, entity, state));
        handle
    }

    /// Stages a new entity. Its key is assigned by the store on flush.
    /// Adding a key that is already tracked stages new values for that
    /// entry instead.
    pub fn add<T: Entity>(&mut self, entity: &T) -> EntryHandle {
        if entity.id() != 0 && self.find::<T>(entity.id()).is_some() {
            return self.update(entity);
        }
        self.insert(entity, EntryState::Added)
    }

    /// Stages new values for an entity. An entity without a key is treated
    /// as new.
    pub fn update<T: Entity>(&mut self, entity: &T) -> EntryHandle {
        if entity.id() == 0 {
            return self.add(entity);
        }

        match self.find::<T>(entity.id()) {
            Some(handle) => {
                if let Some(entry) = self.entries.get_mut(&handle) {
                    entry.current = entity.to_values();
                    if entry.state != EntryState::Added {
                        entry.state = EntryState::Modified;
                    }
                }
                handle
            }
            None => self.insert(entity, EntryState::Modified),
        }
    }

    /// Stages a deletion. Removing an entity that was only added detaches it.
    pub fn remove<T: Entity>(&mut self, entity: &T) -> Result<()> {
        match self.find::<T>(entity.id()) {
            Some(handle) => {
                let added = self
                    .entries
                    .get(&handle)
                    .is_some_and(|e| e.state == EntryState::Added);
                if added {
                    self.entries.remove(&handle);
                } else if let Some(entry) = self.entries.get_mut(&handle) {
                    entry.state = EntryState::Deleted;
                }
                Ok(())
            }
            None if entity.id() == 0 => Err(DbError::Mapping(format!(
                "cannot remove {} without a key",
                T::type_name()
            ))),
            None => {
                self.insert(entity, EntryState::Deleted);
                Ok(())
            }
        }
    }

    /// Starts tracking an entity as it exists in the store. An entity that
    /// is already tracked keeps its pending state.
    pub fn attach<T: Entity>(&mut self, entity: &T) -> EntryHandle {
        match self.find::<T>(entity.id()) {
            Some(handle) => handle,
            None => self.insert(entity, EntryState::Unchanged),
        }
    }

    pub fn entry_state<T: Entity>(&self, key: i64) -> Option<EntryState> {
        self.find::<T>(key)
            .and_then(|h| self.entries.get(&h))
            .map(|e| e.state)
    }

    pub fn entry(&self, handle: EntryHandle) -> Option<&TrackedEntry> {
        self.entries.get(&handle)
    }

    /// Current values of a tracked entity.
    pub fn tracked<T: Entity>(&self, key: i64) -> Result<Option<T>> {
        match self.find::<T>(key).and_then(|h| self.entries.get(&h)) {
            Some(entry) => entry.to_entity().map(Some),
            None => Ok(None),
        }
    }

    pub fn has_changes(&self) -> bool {
        self.entries.values().any(|e| e.state.is_pending())
    }

    /// Entries a flush has to write, in staging order.
    pub fn changes(&self) -> impl Iterator<Item = &TrackedEntry> {
        self.entries.values().filter(|e| e.state.is_pending())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Marks everything as persisted after a successful flush. `keys` holds
    /// the store-assigned key of each added entry.
    pub fn accept_changes(&mut self, keys: &[(EntryHandle, i64)]) {
        for (handle, key) in keys {
            if let Some(entry) = self.entries.get_mut(handle) {
                entry.set_key(*key);
            }
        }

        self.entries.retain(|_, e| e.state != EntryState::Deleted);
        for entry in self.entries.values_mut() {
            entry.state = EntryState::Unchanged;
            entry.original = Some(entry.current.clone());
        }
    }

    /// Puts every pending entry back to the state it had in the store:
    /// modified entries get their original values back, deletions are
    /// undone and added entries are detached.
    ///
    /// Never fails. Entries that cannot be reverted are logged and detached;
    /// the number of such entries is returned.
    pub fn reject_changes(&mut self) -> usize {
        let mut failures = 0;

        self.entries.retain(|_, entry| match entry.state {
            EntryState::Unchanged => true,
            EntryState::Added => false,
            EntryState::Deleted => {
                entry.state = EntryState::Unchanged;
                true
            }
            EntryState::Modified => match entry.original.clone() {
                Some(original) => {
                    entry.current = original;
                    entry.state = EntryState::Unchanged;
                    true
                }
                None => {
                    failures += 1;
                    warn!(
                        entity = entry.type_name,
                        key = entry.key(),
                        "original values unknown, detaching instead of reverting"
                    );
                    false
                }
            },
        });

        failures
    }

    /// Forgets every entry without touching the store.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
