//! # Validation Module
//!
//! Input validation for invoice headers, lines, price rules and payments.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Request layer (outside this repo)                            │
//! │  ├── Deserialization into typed inputs                                 │
//! │  └── Quantity / WeightKg / CurrencyCode reject bad values on parse     │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── Field rules (lengths, formats, ranges)                            │
//! │  └── Cross-field rules (due ≥ issue, min kg ≤ max kg)                  │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── UNIQUE (invoice_number)                                           │
//! │  ├── CHECK (item_type, amounts)                                        │
//! │  └── Foreign keys (invoice_lines → invoices, payments → invoices)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use vetbill_core::validation::{validate_invoice_number, validate_client_id};
//!
//! assert_eq!(validate_invoice_number(" INV-20260412-0001 ").unwrap(), "INV-20260412-0001");
//! assert!(validate_client_id("").is_err());
//! ```

use chrono::NaiveDate;

use crate::error::ValidationError;
use crate::money::Money;
use crate::types::{InvoiceHeader, NewPayment, PriceRuleDraft, WeightKg};
use crate::{
    MAX_INVOICE_NUMBER_LEN, MAX_LINES_PER_INVOICE, MAX_TRANSACTION_ID_LEN, MAX_UNIT_PRICE_CENTS,
};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates an invoice number.
///
/// ## Rules
/// - Must not be empty (after trimming)
/// - At most [`MAX_INVOICE_NUMBER_LEN`] characters
/// - Only letters, digits, `-`, `_` and `/`
///
/// ## Returns
/// The trimmed number.
///
/// ## Example
/// ```rust
/// use vetbill_core::validation::validate_invoice_number;
///
/// assert!(validate_invoice_number("INV-2026/0042").is_ok());
/// assert!(validate_invoice_number("INV 42").is_err());
/// ```
pub fn validate_invoice_number(number: &str) -> ValidationResult<String> {
    let number = number.trim();

    if number.is_empty() {
        return Err(ValidationError::Required {
            field: "invoice_number".to_string(),
        });
    }

    if number.len() > MAX_INVOICE_NUMBER_LEN {
        return Err(ValidationError::TooLong {
            field: "invoice_number".to_string(),
            max: MAX_INVOICE_NUMBER_LEN,
        });
    }

    if !number
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '/')
    {
        return Err(ValidationError::InvalidFormat {
            field: "invoice_number".to_string(),
            reason: "must contain only letters, numbers, '-', '_' and '/'".to_string(),
        });
    }

    Ok(number.to_string())
}

/// Validates a reference to an external record (client, species, service...).
///
/// Ids are opaque to the engine; only emptiness and length are checked.
pub fn validate_reference_id(field: &str, id: &str) -> ValidationResult<()> {
    let id = id.trim();

    if id.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if id.len() > 64 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 64,
        });
    }

    Ok(())
}

/// Validates the owning client id of an invoice.
pub fn validate_client_id(client_id: &str) -> ValidationResult<()> {
    validate_reference_id("client_id", client_id)
}

/// Validates an optional external payment reference.
///
/// ## Returns
/// The trimmed reference, or `None` when not given.
pub fn validate_transaction_id(transaction_id: Option<&str>) -> ValidationResult<Option<String>> {
    let Some(raw) = transaction_id else {
        return Ok(None);
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Required {
            field: "transaction_id".to_string(),
        });
    }

    if trimmed.len() > MAX_TRANSACTION_ID_LEN {
        return Err(ValidationError::TooLong {
            field: "transaction_id".to_string(),
            max: MAX_TRANSACTION_ID_LEN,
        });
    }

    Ok(Some(trimmed.to_string()))
}

// =============================================================================
// Date Validators
// =============================================================================

/// Validates that an invoice is not due before it is issued.
///
/// Same-day due dates are allowed (cash at the counter).
pub fn validate_invoice_dates(issue_date: NaiveDate, due_date: NaiveDate) -> ValidationResult<()> {
    if due_date < issue_date {
        return Err(ValidationError::Inconsistent {
            field: "due_date".to_string(),
            reason: format!("{due_date} is before issue date {issue_date}"),
        });
    }
    Ok(())
}

// =============================================================================
// Money Validators
// =============================================================================

/// Validates a line unit price.
///
/// ## Rules
/// - Must be non-negative (zero is a free line, e.g. a goodwill recheck)
/// - Must not exceed [`MAX_UNIT_PRICE_CENTS`]
///
/// ## Example
/// ```rust
/// use vetbill_core::Money;
/// use vetbill_core::validation::validate_unit_price;
///
/// assert!(validate_unit_price(Money::from_cents(1099)).is_ok());
/// assert!(validate_unit_price(Money::zero()).is_ok());
/// assert!(validate_unit_price(Money::from_cents(-100)).is_err());
/// ```
pub fn validate_unit_price(price: Money) -> ValidationResult<()> {
    if price.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: "unit_price".to_string(),
        });
    }

    if price.cents() > MAX_UNIT_PRICE_CENTS {
        return Err(ValidationError::OutOfRange {
            field: "unit_price".to_string(),
            min: 0,
            max: MAX_UNIT_PRICE_CENTS,
        });
    }

    Ok(())
}

/// Validates a payment amount.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Refunds are reversals, never negative payments
pub fn validate_payment_amount(amount: Money) -> ValidationResult<()> {
    if !amount.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: "amount".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Collection Validators
// =============================================================================

/// Validates the number of lines submitted for one invoice.
///
/// Emptiness is a domain rule (`CoreError::EmptyLineSet`) and is checked by
/// the synchronizer; this only caps the upper bound.
pub fn validate_line_count(count: usize) -> ValidationResult<()> {
    if count > MAX_LINES_PER_INVOICE {
        return Err(ValidationError::OutOfRange {
            field: "lines".to_string(),
            min: 1,
            max: MAX_LINES_PER_INVOICE as i64,
        });
    }

    Ok(())
}

// =============================================================================
// Composite Validators
// =============================================================================

/// Validates a caller-supplied invoice header.
///
/// ## Returns
/// The normalized (trimmed) invoice number.
pub fn validate_invoice_header(header: &InvoiceHeader) -> ValidationResult<String> {
    validate_client_id(&header.client_id)?;
    if let Some(consultation_id) = &header.consultation_id {
        validate_reference_id("consultation_id", consultation_id)?;
    }
    validate_invoice_dates(header.issue_date, header.due_date)?;
    validate_invoice_number(&header.invoice_number)
}

/// Validates a price rule before it is stored.
///
/// ## Rules
/// - `amount` ≥ 0
/// - If both weight bounds are present, min ≤ max
/// - `species_id`, when present, is a non-empty reference
pub fn validate_price_rule(draft: &PriceRuleDraft) -> ValidationResult<()> {
    validate_reference_id("service_id", &draft.service_id)?;

    if let Some(species_id) = &draft.species_id {
        validate_reference_id("species_id", species_id)?;
    }

    if draft.amount.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: "amount".to_string(),
        });
    }

    validate_weight_bounds(draft.weight_min_kg, draft.weight_max_kg)
}

/// Validates a weight range.
pub fn validate_weight_bounds(
    min: Option<WeightKg>,
    max: Option<WeightKg>,
) -> ValidationResult<()> {
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(ValidationError::Inconsistent {
                field: "weight_min_kg".to_string(),
                reason: format!("{min} is greater than weight_max_kg {max}"),
            });
        }
    }
    Ok(())
}

/// Validates a payment before it is recorded.
///
/// ## Returns
/// The normalized transaction id.
pub fn validate_new_payment(payment: &NewPayment) -> ValidationResult<Option<String>> {
    validate_reference_id("invoice_id", &payment.invoice_id)?;
    validate_payment_amount(payment.amount)?;
    validate_transaction_id(payment.transaction_id.as_deref())
}

// =============================================================================
// Unit Tests
// =============================================================================
