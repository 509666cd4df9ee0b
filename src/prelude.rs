//! Everything an application needs to define entities and work with a unit
//! of work.
//!
//! ```
//! use rustuow::prelude::*;
//! ```

pub use crate::audit::{AuditLog, LogEntry, LogType};
pub use crate::connection::{
    Connection, Environment, PersistenceConfig, ProcedureFailureMode, Store,
};
pub use crate::core::{DataType, DbError, FromValue, QueryResult, Record, Result, Row, Value};
pub use crate::entity::Entity;
pub use crate::interceptor::{CommandInterceptor, SequenceKeyInterceptor, SequenceSettings};
pub use crate::notify::{ChangeNotification, ChangeObserver, ChannelObserver};
pub use crate::storage::{MemoryStore, ProcedureContext, TableSchema};
pub use crate::transaction::{EntryHandle, EntryState};
pub use crate::uow::{
    BulkReport, CommitOptions, CommitSummary, FromRecord, Query, UnitOfWork, UnitOfWorkFactory,
};
pub use crate::{impl_entity, impl_from_record};
