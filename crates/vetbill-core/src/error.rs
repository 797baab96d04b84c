//! # Error Types
//!
//! Domain-specific error types for vetbill-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  vetbill-core errors (this file)                                       │
//! │  ├── CoreError        - Business rule failures                         │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  vetbill-db errors (separate crate)                                    │
//! │  └── DbError          - Store failures, wraps CoreError                │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → request layer           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Taxonomy
//! Every error maps onto exactly one [`ErrorKind`]. The request layer only
//! needs `kind()` to decide between "fix your input", "no such thing",
//! "reload and retry" and "try again later".
//!
//! | Kind         | Retry?                     | Examples                          |
//! |--------------|----------------------------|-----------------------------------|
//! | `Validation` | never, caller fixes input  | qty ≤ 0, empty line set           |
//! | `NotFound`   | never                      | unknown service, no price match   |
//! | `Conflict`   | caller, with fresh state   | invoice Paid, duplicate number    |
//! | `Storage`    | caller, later              | database unavailable              |

use thiserror::Error;

use crate::types::{InvoiceStatus, ItemType};

// =============================================================================
// Error Kind
// =============================================================================

/// Coarse failure category shared by every error type in the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input. The caller must correct it; never retried.
    Validation,
    /// Referenced entity (or price rule match) does not exist.
    NotFound,
    /// State conflict: terminal invoice, duplicate number, lost update.
    Conflict,
    /// The store is unavailable or failed.
    Storage,
}

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// These errors represent business rule violations. Expected business
/// outcomes (an overpayment, a reversal that leaves the invoice Paid) are
/// never errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A service or product referenced by a line does not exist or is inactive.
    #[error("{item_type} not found: {id}")]
    ItemNotFound { item_type: ItemType, id: String },

    /// No active price rule matches the requested (species, weight) context.
    ///
    /// ## When This Occurs
    /// - The service has no active rules at all
    /// - Every rule is scoped to another species
    /// - The patient's weight falls outside every bounded range
    ///
    /// Callers must treat this as a hard failure, never as a zero price.
    #[error("No price rule matches service {service_id}")]
    NoMatchingPriceRule { service_id: String },

    /// Price rule cannot be found by id.
    #[error("Price rule not found: {0}")]
    PriceRuleNotFound(String),

    /// Invoice cannot be found.
    #[error("Invoice not found: {0}")]
    InvoiceNotFound(String),

    /// Payment cannot be found.
    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    /// Structural edit attempted on a Paid or Void invoice.
    ///
    /// ## User Workflow
    /// ```text
    /// Edit invoice INV-20260412-0003 (status: Paid)
    ///      │
    ///      ▼
    /// ensure_editable() ── Paid ──► InvoiceLocked
    ///      │
    ///      ▼
    /// UI shows: "Invoice is paid and can no longer be changed"
    /// ```
    #[error("Invoice {invoice_id} is {status}, structural edits are not allowed")]
    InvoiceLocked {
        invoice_id: String,
        status: InvoiceStatus,
    },

    /// Requested status change is not an edge of the lifecycle graph.
    #[error("Invoice {invoice_id} cannot move from {from} to {to}")]
    InvalidTransition {
        invoice_id: String,
        from: InvoiceStatus,
        to: InvoiceStatus,
    },

    /// Another invoice already uses this number.
    #[error("Invoice number '{0}' is already in use")]
    DuplicateInvoiceNumber(String),

    /// An invoice must always carry at least one line.
    #[error("An invoice must contain at least one line")]
    EmptyLineSet,

    /// A submitted line id does not belong to the invoice being edited.
    #[error("Line {line_id} does not belong to invoice {invoice_id}")]
    UnknownLine { invoice_id: String, line_id: String },

    /// The same existing line id was submitted more than once.
    #[error("Line {0} was submitted more than once")]
    DuplicateLine(String),

    /// Payment cannot be recorded against this invoice.
    #[error("Payment rejected for invoice {invoice_id}: {reason}")]
    PaymentRejected { invoice_id: String, reason: String },

    /// Invoice cannot be deleted.
    #[error("Invoice {invoice_id} cannot be deleted: {reason}")]
    DeletionRejected { invoice_id: String, reason: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Returns the failure category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::ItemNotFound { .. }
            | CoreError::NoMatchingPriceRule { .. }
            | CoreError::PriceRuleNotFound(_)
            | CoreError::InvoiceNotFound(_)
            | CoreError::PaymentNotFound(_)
            | CoreError::UnknownLine { .. } => ErrorKind::NotFound,

            CoreError::InvoiceLocked { .. }
            | CoreError::InvalidTransition { .. }
            | CoreError::DuplicateInvoiceNumber(_)
            | CoreError::PaymentRejected { .. }
            | CoreError::DeletionRejected { .. } => ErrorKind::Conflict,

            CoreError::EmptyLineSet
            | CoreError::DuplicateLine(_)
            | CoreError::Validation(_) => ErrorKind::Validation,
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when caller input doesn't meet requirements.
/// Used for early validation before business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Too many digits after the decimal point.
    #[error("{field} allows at most {max} decimal places")]
    TooManyDecimals { field: String, max: u32 },

    /// Invalid format (e.g., invalid UUID, invalid currency code).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Two related fields are inconsistent (weight bounds, invoice dates).
    #[error("{field} is inconsistent: {reason}")]
    Inconsistent { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
