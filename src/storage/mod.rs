pub mod memory;
pub mod table;
pub mod undo;

pub use memory::{MemoryConnection, MemoryStore, ProcedureContext, ProcedureFn, StoreStats};
pub use table::{Column, ForeignKey, Table, TableSchema};
pub use undo::UndoEntry;
