use super::{DbError, FromValue, Result, Value};
use std::sync::Arc;

pub type Row = Vec<Value>;

/// Normalises a column or field name for matching: lower case, `_` dropped.
///
/// `full_name`, `FullName` and `FULLNAME` all normalise to `fullname`.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Column set plus rows returned by a query or stored procedure.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        let wanted = normalize_name(name);
        self.columns
            .iter()
            .position(|column| normalize_name(column) == wanted)
    }

    /// Iterates the rows as [`Record`]s sharing one column list.
    pub fn records(&self) -> impl Iterator<Item = Record> + '_ {
        let columns: Arc<[String]> = self.columns.clone().into();
        self.rows
            .iter()
            .map(move |row| Record::new(Arc::clone(&columns), row.clone()))
    }
}

/// One result row together with its column names.
#[derive(Debug, Clone)]
pub struct Record {
    columns: Arc<[String]>,
    values: Row,
}

impl Record {
    pub fn new(columns: Arc<[String]>, values: Row) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Case-insensitive column lookup.
    pub fn get(&self, column: &str) -> Option<&Value> {
        let wanted = normalize_name(column);
        self.columns
            .iter()
            .position(|c| normalize_name(c) == wanted)
            .and_then(|idx| self.values.get(idx))
    }

    pub fn get_as<T: FromValue>(&self, column: &str) -> Result<T> {
        let value = self
            .get(column)
            .cloned()
            .ok_or_else(|| DbError::Mapping(format!("column '{}' missing from row", column)))?;
        T::from_value(value)
            .map_err(|e| DbError::Mapping(format!("column '{}': {}", column, e)))
    }
}
