//! # Database Error Types
//!
//! Error types for ledger, auth-gate and persistence operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  ValidationError (till-core) ─┐                                        │
//! │  SQLite Error (sqlx::Error) ──┼──► DbError (this module)               │
//! │  Storage I/O (std::io) ───────┘        │                               │
//! │                                        ▼                               │
//! │                       inside a transaction after BEGIN?                │
//! │                       ├── precondition (NotFound, Validation, ...)     │
//! │                       │      → surfaced unchanged                      │
//! │                       └── anything else                                │
//! │                              → TransactionAborted { operation, cause } │
//! │                                        │                               │
//! │                                        ▼                               │
//! │                       caller (UI, till-sync) sees a typed error        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;
use till_core::{CoreError, ValidationError};

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    ///
    /// ## When This Occurs
    /// - Id doesn't exist
    /// - Row was deleted
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A singleton row already exists.
    ///
    /// ## When This Occurs
    /// - `create_company` on an initialized store
    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: String, id: String },

    /// No company row yet; the device was never set up.
    #[error("Store is not initialized: no company registered")]
    NotInitialized,

    /// The device id presented does not match the registered device.
    #[error("Device is not authorized for this company")]
    UnauthorizedDevice,

    /// Too many wrong PINs; try again after `locked_until`.
    #[error("PIN entry locked until {locked_until}")]
    PinLocked { locked_until: i64 },

    /// Wrong PIN.
    #[error("Invalid PIN ({attempts_remaining} attempts remaining)")]
    InvalidPin { attempts_remaining: i64 },

    /// The row exists but is in a state that forbids the operation.
    ///
    /// ## When This Occurs
    /// - Adding lines to a COMPLETED cart
    /// - Paying a CANCELLED invoice
    #[error("{entity} {id} is {status}, cannot perform operation")]
    InvalidState {
        entity: String,
        id: String,
        status: String,
    },

    /// Input rejected before any write.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Unique constraint violation.
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    ///
    /// ## When This Occurs
    /// - Referencing a non-existent customer, item or product
    /// - Deleting a product that invoices still reference
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed (the schema change was rolled back).
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A multi-step operation failed after BEGIN and was rolled back.
    #[error("Transaction '{operation}' aborted: {source}")]
    TransactionAborted {
        operation: String,
        #[source]
        source: Box<DbError>,
    },

    /// Commit succeeded but the snapshot could not be written.
    ///
    /// The in-memory state stays committed; call `Store::persist` to retry.
    #[error("Snapshot persistence failed: {0}")]
    Persistence(String),

    /// Payload could not be encoded or decoded.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Pool exhausted (the single connection is busy past the timeout).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates an InvalidState error.
    pub fn invalid_state(
        entity: impl Into<String>,
        id: impl Into<String>,
        status: impl ToString,
    ) -> Self {
        DbError::InvalidState {
            entity: entity.into(),
            id: id.into(),
            status: status.to_string(),
        }
    }

    /// Whether this error is a rejected precondition rather than a failure.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            DbError::NotFound { .. }
                | DbError::AlreadyExists { .. }
                | DbError::InvalidState { .. }
                | DbError::Validation(_)
        )
    }

    /// Tags a failure that happened inside `operation`'s transaction.
    ///
    /// Preconditions pass through unchanged so callers can still match on
    /// `NotFound` and friends.
    pub fn aborted(self, operation: &str) -> Self {
        if self.is_precondition() || matches!(self, DbError::TransactionAborted { .. }) {
            return self;
        }
        DbError::TransactionAborted {
            operation: operation.to_string(),
            source: Box::new(self),
        }
    }

    /// The innermost cause, looking through `TransactionAborted`.
    pub fn root_cause(&self) -> &DbError {
        match self {
            DbError::TransactionAborted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → Analyze message for constraint type
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                // "UNIQUE constraint failed: <table>.<column>"
                // "FOREIGN KEY constraint failed"
                if let Some(field) = msg.strip_prefix("UNIQUE constraint failed: ") {
                    DbError::UniqueViolation {
                        field: field.to_string(),
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<CoreError> for DbError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(v) => DbError::Validation(v),
            other => DbError::Serialization(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;
