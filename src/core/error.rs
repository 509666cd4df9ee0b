use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    // ------------------------------------------------------------------
    // Configuration (fatal, surfaced at startup)
    // ------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Entity type '{0}' is not mapped")]
    EntityNotMapped(&'static str),

    // ------------------------------------------------------------------
    // State misuse (caller bugs, fail loudly)
    // ------------------------------------------------------------------
    #[error("Already in transaction")]
    AlreadyInTransaction,

    #[error("Not in transaction")]
    NotInTransaction,

    #[error("Unit of work has been disposed")]
    Disposed,

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------
    #[error("persistence commit failed")]
    CommitFailed {
        #[source]
        source: Box<DbError>,
    },

    #[error("Refusing to {operation} in protected environment '{environment}'")]
    ProtectedEnvironment {
        operation: &'static str,
        environment: String,
    },

    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    // ------------------------------------------------------------------
    // Entity store
    // ------------------------------------------------------------------
    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Stored procedure '{0}' not found")]
    ProcedureNotFound(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Lock error: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl DbError {
    pub fn commit_failed(source: DbError) -> Self {
        Self::CommitFailed {
            source: Box::new(source),
        }
    }

    /// Transaction state machine misuse.
    pub fn is_state_misuse(&self) -> bool {
        matches!(
            self,
            Self::AlreadyInTransaction | Self::NotInTransaction | Self::Disposed
        )
    }

    /// Errors the caller may retry or handle.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::CommitFailed { .. }
                | Self::ConstraintViolation(_)
                | Self::ExecutionError(_)
                | Self::ConnectionClosed
                | Self::Cancelled(_)
        )
    }

    /// The store error behind a commit failure, or `self`.
    pub fn root_cause(&self) -> &DbError {
        match self {
            Self::CommitFailed { source } => source.root_cause(),
            other => other,
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}
