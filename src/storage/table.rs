use crate::core::{DataType, DbError, Result, Row, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn validate(&self, value: &Value) -> Result<()> {
        if value.is_null() {
            if !self.nullable {
                return Err(DbError::ConstraintViolation(format!(
                    "Column '{}' cannot be NULL",
                    self.name
                )));
            }
            return Ok(());
        }

        if !self.data_type.is_compatible(value) {
            return Err(DbError::TypeMismatch(format!(
                "Column '{}' expects type {}, got {}",
                self.name,
                self.data_type,
                value.type_name()
            )));
        }

        Ok(())
    }
}

/// `column` holds keys of `references`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: String,
    pub references: String,
}

/// Table definition. The first column is always the integer key.
#[derive(Debug, Clone)]
pub struct TableSchema {
    name: String,
    columns: Vec<Column>,
    foreign_keys: Vec<ForeignKey>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, key_column: &str) -> Self {
        Self {
            name: name.into(),
            columns: vec![Column::new(key_column, DataType::Integer).not_null()],
            foreign_keys: Vec::new(),
        }
    }

    pub fn column(mut self, name: &str, data_type: DataType) -> Self {
        self.columns.push(Column::new(name, data_type));
        self
    }

    pub fn required(mut self, name: &str, data_type: DataType) -> Self {
        self.columns.push(Column::new(name, data_type).not_null());
        self
    }

    pub fn foreign_key(mut self, column: &str, references: &str) -> Self {
        self.foreign_keys.push(ForeignKey {
            column: column.to_string(),
            references: references.to_string(),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn key_column(&self) -> &str {
        &self.columns[0].name
    }

    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    pub fn find_column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|col| col.name.eq_ignore_ascii_case(name))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        for fk in &self.foreign_keys {
            if self.find_column_index(&fk.column).is_none() {
                return Err(DbError::Configuration(format!(
                    "Foreign key column '{}' not found in table '{}'",
                    fk.column, self.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    schema: TableSchema,
    rows: BTreeMap<i64, Row>,
    last_identity: i64,
    constraints_enabled: bool,
}

impl Table {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            last_identity: 0,
            constraints_enabled: true,
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> impl Iterator<Item = (&i64, &Row)> {
        self.rows.iter()
    }

    pub fn get(&self, key: i64) -> Option<&Row> {
        self.rows.get(&key)
    }

    pub fn contains_key(&self, key: i64) -> bool {
        self.rows.contains_key(&key)
    }

    pub fn max_key(&self) -> i64 {
        self.rows.keys().next_back().copied().unwrap_or(0)
    }

    pub fn last_identity(&self) -> i64 {
        self.last_identity
    }

    /// Issues the next identity value. Rows written around the identity
    /// (explicit keys from other writers) are not skipped.
    pub fn next_identity(&mut self) -> i64 {
        self.last_identity += 1;
        self.last_identity
    }

    pub fn observe_explicit_key(&mut self, key: i64) {
        self.last_identity = self.last_identity.max(key);
    }

    pub fn reseed(&mut self, value: i64) {
        self.last_identity = value;
    }

    pub fn constraints_enabled(&self) -> bool {
        self.constraints_enabled
    }

    pub fn set_constraints_enabled(&mut self, enabled: bool) {
        self.constraints_enabled = enabled;
    }

    /// Builds a full row in schema order from `(column, value)` pairs.
    /// Missing columns are NULL.
    pub fn build_row(&self, columns: &[String], values: &[Value]) -> Result<Row> {
        if columns.len() != values.len() {
            return Err(DbError::ExecutionError(format!(
                "Expected {} values, got {}",
                columns.len(),
                values.len()
            )));
        }

        let mut row = vec![Value::Null; self.schema.columns.len()];
        for (column, value) in columns.iter().zip(values) {
            let idx = self.schema.find_column_index(column).ok_or_else(|| {
                DbError::ExecutionError(format!(
                    "Column '{}' not found in table '{}'",
                    column,
                    self.name()
                ))
            })?;
            row[idx] = value.clone();
        }
        Ok(row)
    }

    pub fn project(&self, row: &Row, columns: &[String]) -> Result<Row> {
        columns
            .iter()
            .map(|column| {
                self.schema
                    .find_column_index(column)
                    .map(|idx| row[idx].clone())
                    .ok_or_else(|| {
                        DbError::ExecutionError(format!(
                            "Column '{}' not found in table '{}'",
                            column,
                            self.name()
                        ))
                    })
            })
            .collect()
    }

    pub fn validate_row(&self, row: &Row) -> Result<()> {
        let columns = self.schema.columns();
        if row.len() != columns.len() {
            return Err(DbError::ExecutionError(format!(
                "Expected {} columns, got {}",
                columns.len(),
                row.len()
            )));
        }
        for (column, value) in columns.iter().zip(row.iter()) {
            column.validate(value)?;
        }
        Ok(())
    }

    pub fn insert(&mut self, key: i64, mut row: Row) -> Result<()> {
        if self.rows.contains_key(&key) {
            return Err(DbError::ConstraintViolation(format!(
                "Duplicate key {} in table '{}'",
                key,
                self.name()
            )));
        }
        if let Some(slot) = row.first_mut() {
            *slot = Value::Integer(key);
        }
        self.validate_row(&row)?;
        self.rows.insert(key, row);
        Ok(())
    }

    /// Replaces a row, returning the previous version.
    pub fn replace(&mut self, key: i64, row: Row) -> Result<Row> {
        if !self.rows.contains_key(&key) {
            return Err(affected_none(self.name()));
        }
        self.validate_row(&row)?;
        self.rows.insert(key, row).ok_or_else(|| affected_none(self.name()))
    }

    pub fn remove(&mut self, key: i64) -> Result<Row> {
        self.rows.remove(&key).ok_or_else(|| affected_none(self.name()))
    }

    /// Writes a row without validation. Used to restore earlier versions.
    pub(crate) fn put_raw(&mut self, key: i64, row: Row) {
        self.rows.insert(key, row);
    }

    pub fn take_rows(&mut self) -> BTreeMap<i64, Row> {
        std::mem::take(&mut self.rows)
    }

    pub fn restore_rows(&mut self, rows: BTreeMap<i64, Row>) {
        self.rows = rows;
    }

    /// Keys held in `column`, skipping NULLs.
    pub fn referenced_keys(&self, column: &str) -> Vec<i64> {
        let Some(idx) = self.schema.find_column_index(column) else {
            return Vec::new();
        };
        self.rows
            .values()
            .filter_map(|row| row[idx].as_i64())
            .collect()
    }
}

fn affected_none(table: &str) -> DbError {
    DbError::ExecutionError(format!(
        "Expected to affect 1 row in '{}', but actually affected 0",
        table
    ))
}
