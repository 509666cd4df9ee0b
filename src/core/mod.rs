pub mod error;
pub mod types;
pub mod value;

pub use error::{DbError, Result};
pub use types::{QueryResult, Record, Row, normalize_name};
pub use value::{DataType, FromValue, Value};
