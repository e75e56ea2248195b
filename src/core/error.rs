use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Entity type '{0}' is not registered")]
    UnregisteredType(String),

    #[error("Table '{table}' is already mapped by entity '{existing}'")]
    DuplicateTable { table: String, existing: String },

    #[error("Invalid descriptor for '{0}': {1}")]
    InvalidDescriptor(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Unsatisfiable dependency: {0}")]
    UnsatisfiableDependency(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Record not found in '{0}'")]
    NotFound(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Connection pool timeout: no connections available after {0:?}")]
    PoolTimeout(std::time::Duration),

    #[error("Transaction {0} is no longer active")]
    TransactionClosed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl DbError {
    /// True for errors raised by key or reference checks in storage.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Self::ConstraintViolation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}
