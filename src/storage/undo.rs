// ============================================================================
// Undo Log
// ============================================================================
//
// Every write made inside a native transaction records how to reverse it.
// Rollback replays the log newest-first. Identity and sequence counters are
// deliberately absent: like most relational stores, they do not roll back.
//
// ============================================================================

use super::table::Table;
use crate::core::Row;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub enum UndoEntry {
    InsertRow {
        table: String,
        key: i64,
    },
    UpdateRow {
        table: String,
        key: i64,
        old_row: Row,
    },
    DeleteRow {
        table: String,
        key: i64,
        old_row: Row,
    },
    ClearTable {
        table: String,
        rows: BTreeMap<i64, Row>,
    },
    Constraints {
        table: String,
        was_enabled: bool,
    },
}

impl UndoEntry {
    pub fn table_name(&self) -> &str {
        match self {
            Self::InsertRow { table, .. }
            | Self::UpdateRow { table, .. }
            | Self::DeleteRow { table, .. }
            | Self::ClearTable { table, .. }
            | Self::Constraints { table, .. } => table,
        }
    }

    /// Reverses this entry against `table`.
    pub fn revert(self, table: &mut Table) {
        match self {
            Self::InsertRow { key, .. } => {
                let _ = table.remove(key);
            }
            Self::UpdateRow { key, old_row, .. } | Self::DeleteRow { key, old_row, .. } => {
                table.put_raw(key, old_row);
            }
            Self::ClearTable { rows, .. } => table.restore_rows(rows),
            Self::Constraints { was_enabled, .. } => table.set_constraints_enabled(was_enabled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataType, Value};
    use crate::storage::TableSchema;

    #[test]
    fn test_revert_in_reverse_order() {
        let mut table = Table::new(TableSchema::new("Blogs", "id").column("url", DataType::Text));
        table.insert(1, vec![Value::Null, Value::Text("a".into())]).unwrap();

        let mut log = Vec::new();
        let old = table.replace(1, vec![Value::Integer(1), Value::Text("b".into())]).unwrap();
        log.push(UndoEntry::UpdateRow { table: "Blogs".into(), key: 1, old_row: old });
        table.insert(2, vec![Value::Null, Value::Text("c".into())]).unwrap();
        log.push(UndoEntry::InsertRow { table: "Blogs".into(), key: 2 });

        for entry in log.into_iter().rev() {
            assert_eq!(entry.table_name(), "Blogs");
            entry.revert(&mut table);
        }

        assert_eq!(table.row_count(), 1);
        assert_eq!(table.get(1).unwrap()[1], Value::Text("a".into()));
    }
}
