//! # Database Error Types
//!
//! Error types for store and engine operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)        CoreError (vetbill-core)            │
//! │       │                                  │                              │
//! │       ▼                                  ▼                              │
//! │  DbError (this module) ◄─────────── DbError::Core                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  kind() → Validation | NotFound | Conflict | Storage                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Request layer maps the kind onto its own status codes                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Any error returned from an engine operation means its transaction was
//! dropped before commit, so nothing was written.

use thiserror::Error;
use vetbill_core::{CoreError, ErrorKind, ValidationError};

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    ///
    /// ## When This Occurs
    /// - `fetch_one` returns no rows
    /// - ID doesn't exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Two writers race to the same invoice number
    /// - Any UNIQUE index violation not caught by a pre-check
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    ///
    /// ## When This Occurs
    /// - Price rule referencing a non-existent service
    /// - Payment referencing a non-existent invoice
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// Optimistic concurrency conflict.
    ///
    /// ## User Workflow
    /// ```text
    /// Receptionist A loads INV-0003 (version 4)
    /// Receptionist B loads INV-0003 (version 4)
    ///      │
    ///      ▼
    /// B saves ──► version 5
    /// A saves with expected version 4
    ///      │
    ///      ▼
    /// UPDATE ... WHERE id = ? AND version = 4 → 0 rows → Conflict
    ///      │
    ///      ▼
    /// UI: "This invoice was changed by someone else. Reload and retry."
    /// ```
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Domain rule violation raised by vetbill-core.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Configuration could not be loaded or is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Database connection failed.
    ///
    /// ## When This Occurs
    /// - Database file can't be created
    /// - File permissions issue
    /// - Disk full
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// A stored value could not be turned back into a domain value.
    #[error("Corrupt {column} in stored row: {reason}")]
    CorruptRow { column: String, reason: String },

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

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Creates a CorruptRow error.
    pub fn corrupt(column: impl Into<String>, reason: impl ToString) -> Self {
        DbError::CorruptRow {
            column: column.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns the failure category of this error.
    ///
    /// ## Mapping
    /// ```text
    /// NotFound                   → NotFound
    /// UniqueViolation, Conflict  → Conflict
    /// ForeignKeyViolation        → Validation
    /// Config                     → Validation
    /// Core(e)                    → e.kind()
    /// everything else            → Storage
    /// ```
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::NotFound { .. } => ErrorKind::NotFound,
            DbError::UniqueViolation { .. } | DbError::Conflict(_) => ErrorKind::Conflict,
            DbError::ForeignKeyViolation { .. } | DbError::Config(_) => ErrorKind::Validation,
            DbError::Core(err) => err.kind(),
            DbError::ConnectionFailed(_)
            | DbError::MigrationFailed(_)
            | DbError::QueryFailed(_)
            | DbError::PoolExhausted
            | DbError::CorruptRow { .. }
            | DbError::Internal(_) => ErrorKind::Storage,
        }
    }

    /// True when the caller may retry the same request later unchanged.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Storage
    }
}

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → SQLITE_BUSY / SQLITE_LOCKED → DbError::Conflict,
///                               else analyze message for constraint type
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// sqlx::Error::PoolClosed     → DbError::ConnectionFailed
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

                // Another connection holds or has moved past the write lock.
                // Extended codes carry the primary code in the low byte
                // (517 SQLITE_BUSY_SNAPSHOT -> 5 SQLITE_BUSY).
                let primary = db_err
                    .code()
                    .and_then(|code| code.parse::<i32>().ok())
                    .map(|code| code & 0xff);
                if matches!(primary, Some(SQLITE_BUSY) | Some(SQLITE_LOCKED)) {
                    return DbError::Conflict(format!("concurrent write: {msg}"));
                }

                // SQLite constraint messages:
                // "UNIQUE constraint failed: <table>.<column>"
                // "FOREIGN KEY constraint failed"
                if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
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

            sqlx::Error::Io(io) => DbError::ConnectionFailed(io.to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<ValidationError> for DbError {
    fn from(err: ValidationError) -> Self {
        DbError::Core(CoreError::Validation(err))
    }
}

impl From<toml::de::Error> for DbError {
    fn from(err: toml::de::Error) -> Self {
        DbError::Config(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// Unit Tests
// =============================================================================
