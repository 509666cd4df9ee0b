// ============================================================================
// rustuow
// ============================================================================
//
// Transactional unit of work over a relational entity store: change
// tracking, explicit transactions, lazy queries, bulk table maintenance,
// stored procedure calls and command interceptors.
//
// ============================================================================

//! # Example
//!
//! ```no_run
//! use rustuow::prelude::*;
//!
//! #[derive(Debug, Clone)]
//! struct Blog {
//!     id: i64,
//!     url: String,
//! }
//!
//! impl_entity!(Blog, table = "Blogs", key = id, columns { url });
//!
//! # async fn run() -> rustuow::Result<()> {
//! let store = MemoryStore::new();
//! store.create_table(TableSchema::new("Blogs", "id").required("url", DataType::Text))?;
//!
//! let factory = UnitOfWorkFactory::builder()
//!     .store(store)
//!     .entity::<Blog>()
//!     .build()
//!     .await?;
//!
//! let mut uow = factory.create().await?;
//! uow.begin_transaction().await?;
//! let handle = uow.add(&Blog { id: 0, url: "https://example.com".into() })?;
//! let summary = uow.commit().await?;
//! uow.commit_transaction().await?;
//!
//! println!("new blog id: {:?}", summary.key_of(handle));
//! # Ok(()) }
//! ```

#[macro_use]
mod macros;

pub mod audit;
pub mod command;
pub mod connection;
pub mod core;
pub mod entity;
pub mod interceptor;
pub mod notify;
pub mod prelude;
pub mod storage;
pub mod transaction;
pub mod uow;

pub use core::{DataType, DbError, FromValue, QueryResult, Record, Result, Row, Value};
pub use entity::{Entity, EntityRegistry};
pub use uow::{CommitOptions, CommitSummary, UnitOfWork, UnitOfWorkFactory};
