// ============================================================================
// Entity contract
// ============================================================================
//
// Every persisted record type implements `Entity`: a table name, an ordered
// column list whose first entry is the numeric key, and conversions to and
// from store rows. There is exactly one identifier convention, `id: i64`.
//
// ============================================================================

use crate::core::{DbError, Record, Result, Row};
use std::any::TypeId;
use std::collections::HashMap;

pub trait Entity: Clone + Send + Sync + 'static {
    /// Table the entity is mapped to.
    const TABLE: &'static str;

    /// Column names in row order. The first column is the key.
    const COLUMNS: &'static [&'static str];

    fn id(&self) -> i64;

    fn set_id(&mut self, id: i64);

    /// Values in `COLUMNS` order.
    fn to_values(&self) -> Row;

    fn from_record(record: &Record) -> Result<Self>;

    fn key_column() -> &'static str {
        Self::COLUMNS[0]
    }

    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// `blog::model::Blog` -> `Blog`.
pub fn short_type_name(type_name: &'static str) -> &'static str {
    type_name.rsplit("::").next().unwrap_or(type_name)
}

/// Static description of a registered entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMapping {
    pub type_name: &'static str,
    pub table: &'static str,
    pub columns: &'static [&'static str],
}

impl EntityMapping {
    pub fn of<T: Entity>() -> Self {
        Self {
            type_name: T::type_name(),
            table: T::TABLE,
            columns: T::COLUMNS,
        }
    }

    pub fn key_column(&self) -> &'static str {
        self.columns[0]
    }

    /// Short type name without the module path.
    pub fn short_name(&self) -> &'static str {
        short_type_name(self.type_name)
    }

    fn validate(&self) -> Result<()> {
        if self.table.trim().is_empty() {
            return Err(DbError::Configuration(format!(
                "entity '{}' has an empty table name",
                self.type_name
            )));
        }
        if self.columns.is_empty() {
            return Err(DbError::Configuration(format!(
                "entity '{}' declares no columns",
                self.type_name
            )));
        }
        for (idx, column) in self.columns.iter().enumerate() {
            if self.columns[..idx]
                .iter()
                .any(|seen| seen.eq_ignore_ascii_case(column))
            {
                return Err(DbError::Configuration(format!(
                    "entity '{}' declares column '{}' twice",
                    self.type_name, column
                )));
            }
        }
        Ok(())
    }
}

/// The set of entity types a unit of work may query and stage.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    mappings: HashMap<TypeId, EntityMapping>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Entity>(&mut self) -> Result<()> {
        let mapping = EntityMapping::of::<T>();
        mapping.validate()?;

        if let Some(existing) = self
            .mappings
            .values()
            .find(|m| m.table.eq_ignore_ascii_case(mapping.table) && m.type_name != mapping.type_name)
        {
            return Err(DbError::Configuration(format!(
                "table '{}' is mapped by both '{}' and '{}'",
                mapping.table, existing.type_name, mapping.type_name
            )));
        }

        self.mappings.insert(TypeId::of::<T>(), mapping);
        Ok(())
    }

    pub fn mapping<T: Entity>(&self) -> Result<&EntityMapping> {
        self.mappings
            .get(&TypeId::of::<T>())
            .ok_or(DbError::EntityNotMapped(T::type_name()))
    }

    pub fn is_registered<T: Entity>(&self) -> bool {
        self.mappings.contains_key(&TypeId::of::<T>())
    }

    pub fn mappings(&self) -> impl Iterator<Item = &EntityMapping> + '_ {
        self.mappings.values()
    }

    pub fn tables(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.mappings.values().map(|m| m.table)
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}
