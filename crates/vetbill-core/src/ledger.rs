//! # Payment Ledger
//!
//! Pure settlement logic: how recorded payments translate into an invoice
//! status. The store appends or removes payments and then asks this module
//! which status the invoice should be in.
//!
//! ## Settlement After Each Receipt / Reversal
//! ```text
//! ┌────────────┬──────────────────────────┬──────────────┐
//! │ current    │ amount_paid vs total     │ next         │
//! ├────────────┼──────────────────────────┼──────────────┤
//! │ Draft/Sent │ paid ≥ total             │ Paid         │
//! │ Draft/Sent │ paid < total             │ (unchanged)  │
//! │ Paid       │ paid ≥ total             │ Paid         │
//! │ Paid       │ paid < total             │ Sent         │
//! │ Void       │ anything                 │ Void         │
//! └────────────┴──────────────────────────┴──────────────┘
//! ```
//!
//! Overpayment is not an error: the invoice is Paid and the excess shows up
//! as [`PaymentSummary::overpaid_by`]. There is no credit entity.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{Invoice, InvoiceStatus, Payment};

/// Sums the amounts of all recorded (non-reversed) payments.
pub fn amount_paid(payments: &[Payment]) -> Money {
    payments.iter().map(|p| p.amount).sum()
}

/// Returns the status an invoice should have after a payment event.
pub fn settle_status(current: InvoiceStatus, total: Money, paid: Money) -> InvoiceStatus {
    match current {
        InvoiceStatus::Void => InvoiceStatus::Void,
        InvoiceStatus::Draft | InvoiceStatus::Sent if paid >= total => InvoiceStatus::Paid,
        InvoiceStatus::Paid if paid < total => InvoiceStatus::Sent,
        other => other,
    }
}

/// Rejects receipts against voided invoices.
pub fn ensure_accepts_payments(invoice: &Invoice) -> CoreResult<()> {
    if invoice.status == InvoiceStatus::Void {
        return Err(CoreError::PaymentRejected {
            invoice_id: invoice.id.clone(),
            reason: "invoice is void".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Payment Summary
// =============================================================================

/// Paid-to-date view of one invoice.
///
/// ## Example
/// ```rust
/// use vetbill_core::{InvoiceStatus, Money};
/// use vetbill_core::ledger::PaymentSummary;
///
/// let summary = PaymentSummary::new(
///     "inv-1",
///     Money::from_cents(4500),
///     Money::from_cents(5000),
///     InvoiceStatus::Paid,
///     1,
/// );
/// assert_eq!(summary.balance_due, Money::zero());
/// assert_eq!(summary.overpaid_by, Money::from_cents(500));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentSummary {
    pub invoice_id: String,
    pub total_amount: Money,
    pub amount_paid: Money,
    /// Outstanding amount, never negative.
    pub balance_due: Money,
    /// Excess over the total, never negative.
    pub overpaid_by: Money,
    pub status: InvoiceStatus,
    pub payment_count: i64,
}

impl PaymentSummary {
    pub fn new(
        invoice_id: impl Into<String>,
        total_amount: Money,
        amount_paid: Money,
        status: InvoiceStatus,
        payment_count: i64,
    ) -> Self {
        let balance_due = total_amount.saturating_sub(amount_paid);
        let overpaid_by = amount_paid.saturating_sub(total_amount);
        PaymentSummary {
            invoice_id: invoice_id.into(),
            total_amount,
            amount_paid,
            balance_due,
            overpaid_by,
            status,
            payment_count,
        }
    }

    /// Builds the summary from an invoice and its payments.
    pub fn from_payments(invoice: &Invoice, payments: &[Payment]) -> Self {
        PaymentSummary::new(
            invoice.id.clone(),
            invoice.total_amount,
            amount_paid(payments),
            invoice.status,
            payments.len() as i64,
        )
    }

    /// Something was paid but the invoice is not yet covered.
    ///
    /// Derived on read; there is no PartiallyPaid status.
    pub fn is_partially_paid(&self) -> bool {
        self.amount_paid.is_positive() && self.amount_paid < self.total_amount
    }

    pub fn is_settled(&self) -> bool {
        self.amount_paid >= self.total_amount
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use crate::types::PaymentMethod;
    use crate::types::InvoiceStatus::*;

    fn cents(c: i64) -> Money {
        Money::from_cents(c)
    }

    fn payment(amount: i64) -> Payment {
        Payment {
            id: format!("pay-{amount}"),
            invoice_id: "inv-1".into(),
            payment_date: NaiveDate::from_ymd_opt(2026, 4, 12).unwrap(),
            amount: cents(amount),
            method: PaymentMethod::Cash,
            transaction_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_settle_exact_payment() {
        assert_eq!(settle_status(Sent, cents(4500), cents(4500)), Paid);
        assert_eq!(settle_status(Draft, cents(4500), cents(4500)), Paid);
    }

    #[test]
    fn test_settle_partial_keeps_status() {
        assert_eq!(settle_status(Sent, cents(4500), cents(1000)), Sent);
        assert_eq!(settle_status(Draft, cents(4500), cents(1000)), Draft);
    }

    #[test]
    fn test_settle_overpayment_is_paid() {
        assert_eq!(settle_status(Sent, cents(4500), cents(5000)), Paid);
        assert_eq!(settle_status(Paid, cents(4500), cents(9500)), Paid);
    }

    #[test]
    fn test_reversal_below_total_goes_to_sent() {
        assert_eq!(settle_status(Paid, cents(4500), cents(0)), Sent);
        assert_eq!(settle_status(Paid, cents(4500), cents(4499)), Sent);
    }

    #[test]
    fn test_void_never_auto_transitions() {
        assert_eq!(settle_status(Void, cents(4500), cents(4500)), Void);
        assert_eq!(settle_status(Void, cents(4500), cents(0)), Void);
    }

    #[test]
    fn test_summary_from_payments() {
        let day = NaiveDate::from_ymd_opt(2026, 4, 12).unwrap();
        let invoice = Invoice {
            id: "inv-1".into(),
            client_id: "client-1".into(),
            consultation_id: None,
            invoice_number: "INV-1".into(),
            issue_date: day,
            due_date: day,
            total_amount: cents(4500),
            status: Sent,
            version: 3,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let summary = PaymentSummary::from_payments(&invoice, &[payment(1000), payment(500)]);
        assert_eq!(summary.amount_paid, cents(1500));
        assert_eq!(summary.balance_due, cents(3000));
        assert_eq!(summary.overpaid_by, Money::zero());
        assert_eq!(summary.payment_count, 2);
        assert!(summary.is_partially_paid());
        assert!(!summary.is_settled());

        let none = PaymentSummary::from_payments(&invoice, &[]);
        assert!(!none.is_partially_paid());
    }

    #[test]
    fn test_void_rejects_payments() {
        let day = NaiveDate::from_ymd_opt(2026, 4, 12).unwrap();
        let mut invoice = Invoice {
            id: "inv-1".into(),
            client_id: "client-1".into(),
            consultation_id: None,
            invoice_number: "INV-1".into(),
            issue_date: day,
            due_date: day,
            total_amount: cents(4500),
            status: Void,
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(matches!(
            ensure_accepts_payments(&invoice),
            Err(CoreError::PaymentRejected { .. })
        ));

        invoice.status = Paid;
        assert!(ensure_accepts_payments(&invoice).is_ok());
    }
}
