//! # Invoice Lifecycle
//!
//! Status transitions and the edit/delete guards that depend on status.
//!
//! ## State Machine
//! ```text
//!                 caller                    ledger
//!   ┌─────────┐ ─────────► ┌─────────┐ ─────────────► ┌─────────┐
//!   │  Draft  │            │  Sent   │                │  Paid   │
//!   └────┬────┘            └────┬────┘ ◄───────────── └─────────┘
//!        │    ledger            │      ledger (reversal)    ▲
//!        ├──────────────────────┼───────────────────────────┘
//!        │ caller               │ caller
//!        ▼                      ▼
//!   ┌──────────────────────────────┐
//!   │             Void             │   never auto-transitions
//!   └──────────────────────────────┘
//! ```
//!
//! Paid and Void are locked for structural edits (header and lines). Paid is
//! only ever entered or left by the payment ledger, never by a caller.

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::{Invoice, InvoiceStatus};

/// Who is asking for a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionTrigger {
    /// A header update submitted by a caller.
    Caller,
    /// The payment ledger settling after a receipt or reversal.
    Ledger,
}

/// Returns true if `from → to` is an edge of the lifecycle for `trigger`.
///
/// Staying in the same status is not a transition and returns false.
pub fn is_allowed(from: InvoiceStatus, to: InvoiceStatus, trigger: TransitionTrigger) -> bool {
    use crate::types::InvoiceStatus::*;

    match trigger {
        TransitionTrigger::Caller => {
            matches!((from, to), (Draft, Sent) | (Draft, Void) | (Sent, Void))
        }
        TransitionTrigger::Ledger => {
            matches!((from, to), (Draft, Paid) | (Sent, Paid) | (Paid, Sent))
        }
    }
}

/// Returns true if header and lines of an invoice in `status` may change.
pub fn is_editable(status: InvoiceStatus) -> bool {
    matches!(status, InvoiceStatus::Draft | InvoiceStatus::Sent)
}

/// Rejects structural edits on Paid or Void invoices.
pub fn ensure_editable(invoice: &Invoice) -> CoreResult<()> {
    if is_editable(invoice.status) {
        Ok(())
    } else {
        Err(CoreError::InvoiceLocked {
            invoice_id: invoice.id.clone(),
            status: invoice.status,
        })
    }
}

/// Validates a status change requested by a caller.
///
/// ## Returns
/// The status the invoice ends up in (`requested`, or `current` when no
/// change was asked for).
///
/// ## Errors
/// - `Validation` if the caller asks for Paid (only payments settle invoices)
/// - `InvalidTransition` for any other move that is not a caller edge
pub fn apply_caller_status(
    invoice_id: &str,
    current: InvoiceStatus,
    requested: Option<InvoiceStatus>,
) -> CoreResult<InvoiceStatus> {
    let Some(requested) = requested else {
        return Ok(current);
    };

    if requested == current {
        return Ok(current);
    }

    if requested == InvoiceStatus::Paid {
        return Err(ValidationError::NotAllowed {
            field: "status".to_string(),
            allowed: vec![
                InvoiceStatus::Draft.to_string(),
                InvoiceStatus::Sent.to_string(),
                InvoiceStatus::Void.to_string(),
            ],
        }
        .into());
    }

    if !is_allowed(current, requested, TransitionTrigger::Caller) {
        return Err(CoreError::InvalidTransition {
            invoice_id: invoice_id.to_string(),
            from: current,
            to: requested,
        });
    }

    Ok(requested)
}

/// Initial status of a new invoice: Draft unless the caller asks for Sent.
pub fn initial_status(requested: Option<InvoiceStatus>) -> CoreResult<InvoiceStatus> {
    match requested {
        None | Some(InvoiceStatus::Draft) => Ok(InvoiceStatus::Draft),
        Some(InvoiceStatus::Sent) => Ok(InvoiceStatus::Sent),
        Some(_) => Err(ValidationError::NotAllowed {
            field: "status".to_string(),
            allowed: vec![
                InvoiceStatus::Draft.to_string(),
                InvoiceStatus::Sent.to_string(),
            ],
        }
        .into()),
    }
}

/// Rejects deletion of Paid invoices and of invoices that carry payments.
pub fn ensure_deletable(invoice: &Invoice, payment_count: i64) -> CoreResult<()> {
    if invoice.status == InvoiceStatus::Paid {
        return Err(CoreError::DeletionRejected {
            invoice_id: invoice.id.clone(),
            reason: "invoice is paid".to_string(),
        });
    }

    if payment_count > 0 {
        return Err(CoreError::DeletionRejected {
            invoice_id: invoice.id.clone(),
            reason: format!("{payment_count} payment(s) recorded"),
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
