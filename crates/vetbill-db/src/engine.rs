//! # Billing Engine
//!
//! The operations a request layer calls. Each one is a single unit of work:
//! it begins a transaction, runs the pure rules from `vetbill-core` against
//! rows read inside that transaction, writes, and commits. Any error drops
//! the transaction, so a failed call leaves no partial writes behind.
//!
//! ## Invoice Update Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  update_invoice(auth, id, expected_version, header, lines)              │
//! │       │                                                                 │
//! │       ├── validate header (no I/O)                                      │
//! │       ▼                                                                 │
//! │  BEGIN IMMEDIATE                                                        │
//! │       ├── load invoice ──────────────► InvoiceNotFound                  │
//! │       ├── expected_version check ────► Conflict                         │
//! │       ├── lifecycle::ensure_editable ► InvoiceLocked (Paid / Void)      │
//! │       ├── lifecycle::apply_caller_status                                │
//! │       ├── invoice number unique (own id excluded)                       │
//! │       ├── load lines + catalog snapshot                                 │
//! │       ├── line_sync::synchronize ────► plan {insert, update, delete}    │
//! │       ├── apply plan                                                    │
//! │       ├── UPDATE invoices ... WHERE id = ? AND version = ?              │
//! │       ▼                                                                 │
//! │  COMMIT  ──► InvoiceDetail { invoice, lines, summary }                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Payment Flow
//! ```text
//! record_payment / reverse_payment
//!       │
//!  BEGIN IMMEDIATE ── insert or delete payment
//!       ├── SUM(payments) ──► ledger::settle_status
//!       ├── UPDATE invoices SET status ... WHERE id = ? AND version = ?
//!  COMMIT
//! ```
//!
//! Write operations begin with `BEGIN IMMEDIATE`. Two units of work on the
//! same invoice run one after the other; a writer that still finds its
//! snapshot overtaken gets `DbError::Conflict` rather than a storage error.
//!
//! The engine never inspects `AuthContext::roles`; authorization happened
//! upstream. The user id is written to every committed-work log event.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::catalog::CatalogRepository;
use crate::repository::invoice::InvoiceRepository;
use crate::repository::payment::PaymentRepository;
use crate::repository::price_rule::PriceRuleRepository;
use vetbill_core::validation::{
    validate_invoice_header, validate_new_payment, validate_price_rule,
};
use vetbill_core::{
    ledger, lifecycle, line_sync, pricing, AuthContext, CoreError, CurrencyCode, Invoice,
    InvoiceHeader, InvoiceLine, ItemType, NewPayment, Payment, PaymentSummary, PriceQuote,
    PriceRule, PriceRuleDraft, ServiceQuote, SubmittedLine, WeightKg, DEFAULT_INVOICE_PREFIX,
};

/// Attempts at finding a free generated invoice number before giving up.
const MAX_NUMBER_ATTEMPTS: usize = 16;

// =============================================================================
// Settings & Read Models
// =============================================================================

/// Engine-level settings, usually taken from `BillingConfig::engine_settings`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Prefix of generated invoice numbers.
    pub invoice_prefix: String,
    /// Currency for price rules created without one.
    pub default_currency: CurrencyCode,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            invoice_prefix: DEFAULT_INVOICE_PREFIX.to_string(),
            default_currency: CurrencyCode::default(),
        }
    }
}

/// An invoice with its lines (in position order) and paid-to-date view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceDetail {
    pub invoice: Invoice,
    pub lines: Vec<InvoiceLine>,
    pub summary: PaymentSummary,
}

/// Result of recording a payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub payment: Payment,
    pub summary: PaymentSummary,
}

// =============================================================================
// Engine
// =============================================================================

/// Billing operations over a shared pool.
///
/// ## Usage
/// ```rust,ignore
/// let engine = db.engine();
/// let auth = AuthContext::new("user-reception-1");
///
/// let detail = engine.create_invoice(&auth, header, lines).await?;
/// let receipt = engine.record_payment(&auth, payment).await?;
/// assert!(receipt.summary.is_settled());
/// ```
#[derive(Debug, Clone)]
pub struct BillingEngine {
    pool: SqlitePool,
    settings: EngineSettings,
}

impl BillingEngine {
    pub fn new(pool: SqlitePool, settings: EngineSettings) -> Self {
        BillingEngine { pool, settings }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Opens a write unit of work holding the database write lock from its
    /// first read, so a version read here cannot go stale before the write.
    async fn begin_write(&self) -> DbResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    // =========================================================================
    // Pricing
    // =========================================================================

    /// Resolves the price of a service for a patient profile.
    pub async fn resolve_price(
        &self,
        auth: &AuthContext,
        service_id: &str,
        species_id: Option<&str>,
        weight: Option<WeightKg>,
    ) -> DbResult<PriceQuote> {
        let mut conn = self.pool.acquire().await?;
        let rules = PriceRuleRepository::fetch_for_service(&mut conn, service_id, true).await?;
        let quote = pricing::resolve_price(&rules, service_id, species_id, weight)?;

        debug!(
            user_id = %auth.user_id,
            service_id = %service_id,
            rule_id = %quote.rule_id,
            amount = %quote.amount,
            "Resolved price"
        );
        Ok(quote)
    }

    /// Resolves a price and attaches the service name, for quoting screens.
    ///
    /// ## Errors
    /// - `ItemNotFound` if the service doesn't exist or is inactive
    /// - `NoMatchingPriceRule` if no active rule matches
    pub async fn quote_service(
        &self,
        auth: &AuthContext,
        service_id: &str,
        species_id: Option<&str>,
        weight: Option<WeightKg>,
    ) -> DbResult<ServiceQuote> {
        let mut conn = self.pool.acquire().await?;

        let service = CatalogRepository::fetch_service(&mut conn, service_id)
            .await?
            .filter(|s| s.is_active)
            .ok_or_else(|| CoreError::ItemNotFound {
                item_type: ItemType::Service,
                id: service_id.to_string(),
            })?;

        let rules = PriceRuleRepository::fetch_for_service(&mut conn, service_id, true).await?;
        let quote = pricing::resolve_price(&rules, service_id, species_id, weight)?;

        debug!(user_id = %auth.user_id, service_id = %service_id, "Quoted service");
        Ok(ServiceQuote::new(&service.id, &service.name, quote))
    }

    /// Adds an active price rule. `draft.currency = None` uses the
    /// configured default currency.
    pub async fn create_price_rule(
        &self,
        auth: &AuthContext,
        draft: PriceRuleDraft,
    ) -> DbResult<PriceRule> {
        validate_price_rule(&draft)?;

        let mut tx = self.begin_write().await?;

        if CatalogRepository::fetch_service(&mut tx, &draft.service_id)
            .await?
            .is_none()
        {
            return Err(CoreError::ItemNotFound {
                item_type: ItemType::Service,
                id: draft.service_id,
            }
            .into());
        }

        let now = Utc::now();
        let rule = PriceRule {
            id: Uuid::new_v4().to_string(),
            service_id: draft.service_id,
            species_id: draft.species_id,
            weight_min_kg: draft.weight_min_kg,
            weight_max_kg: draft.weight_max_kg,
            amount: draft.amount,
            currency: draft
                .currency
                .unwrap_or_else(|| self.settings.default_currency.clone()),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        PriceRuleRepository::insert(&mut tx, &rule).await?;

        tx.commit().await?;

        info!(
            user_id = %auth.user_id,
            rule_id = %rule.id,
            service_id = %rule.service_id,
            amount = %rule.amount,
            currency = %rule.currency,
            "Price rule created"
        );
        Ok(rule)
    }

    /// Enables or disables a rule. Rules are never deleted.
    pub async fn set_price_rule_active(
        &self,
        auth: &AuthContext,
        rule_id: &str,
        active: bool,
    ) -> DbResult<PriceRule> {
        let mut tx = self.begin_write().await?;

        PriceRuleRepository::set_active(&mut tx, rule_id, active, Utc::now()).await?;
        let rule = PriceRuleRepository::fetch(&mut tx, rule_id)
            .await?
            .ok_or_else(|| CoreError::PriceRuleNotFound(rule_id.to_string()))?;

        tx.commit().await?;

        info!(user_id = %auth.user_id, rule_id = %rule_id, active, "Price rule toggled");
        Ok(rule)
    }

    /// All rules of a service, inactive ones included.
    pub async fn list_price_rules(
        &self,
        _auth: &AuthContext,
        service_id: &str,
    ) -> DbResult<Vec<PriceRule>> {
        let mut conn = self.pool.acquire().await?;
        PriceRuleRepository::fetch_for_service(&mut conn, service_id, false).await
    }

    // =========================================================================
    // Invoices
    // =========================================================================

    /// Creates an invoice with its initial lines.
    ///
    /// The invoice starts in Draft unless `header.status` asks for Sent.
    ///
    /// ## Errors
    /// - `Validation` for a bad header, an empty line set, or a service line
    ///   without a price
    /// - `DuplicateInvoiceNumber` if the number is taken
    /// - `ItemNotFound` for unknown or inactive items
    pub async fn create_invoice(
        &self,
        auth: &AuthContext,
        header: InvoiceHeader,
        lines: Vec<SubmittedLine>,
    ) -> DbResult<InvoiceDetail> {
        let invoice_number = validate_invoice_header(&header)?;
        let status = lifecycle::initial_status(header.status)?;

        let mut tx = self.begin_write().await?;

        if InvoiceRepository::number_in_use(&mut tx, &invoice_number, None).await? {
            return Err(CoreError::DuplicateInvoiceNumber(invoice_number).into());
        }

        let id = Uuid::new_v4().to_string();
        let catalog = CatalogRepository::load_snapshot(
            &mut tx,
            lines.iter().map(|l| &l.item).collect::<Vec<_>>(),
        )
        .await?;
        let plan = line_sync::synchronize(&id, &[], &lines, &catalog)?;

        let now = Utc::now();
        let invoice = Invoice {
            id: id.clone(),
            client_id: header.client_id.trim().to_string(),
            consultation_id: header.consultation_id,
            invoice_number,
            issue_date: header.issue_date,
            due_date: header.due_date,
            total_amount: plan.new_total,
            status,
            version: 1,
            created_at: now,
            updated_at: now,
        };

        InvoiceRepository::insert(&mut tx, &invoice).await?;
        InvoiceRepository::apply_plan(&mut tx, &plan, now).await?;

        let detail = read_detail(&mut tx, &id).await?;
        tx.commit().await?;

        info!(
            user_id = %auth.user_id,
            invoice_id = %id,
            invoice_number = %detail.invoice.invoice_number,
            lines = detail.lines.len(),
            total = %detail.invoice.total_amount,
            status = %detail.invoice.status,
            "Invoice created"
        );
        Ok(detail)
    }

    /// Replaces the header and the complete line set of an invoice.
    ///
    /// `lines` is the full desired set: submitted lines with an id update
    /// that line, lines without an id are added, and existing lines that are
    /// not submitted are removed. `expected_version`, when given, must match
    /// the stored version.
    ///
    /// ## Errors
    /// - `InvoiceLocked` (Conflict) if the invoice is Paid or Void
    /// - `InvalidTransition` (Conflict) for a disallowed status change
    /// - `Validation` if the caller asks for Paid
    /// - `Conflict` if the invoice changed since `expected_version`
    pub async fn update_invoice(
        &self,
        auth: &AuthContext,
        invoice_id: &str,
        expected_version: Option<i64>,
        header: InvoiceHeader,
        lines: Vec<SubmittedLine>,
    ) -> DbResult<InvoiceDetail> {
        let invoice_number = validate_invoice_header(&header)?;

        let mut tx = self.begin_write().await?;

        let current = InvoiceRepository::fetch_required(&mut tx, invoice_id).await?;
        check_version(&current, expected_version)?;
        lifecycle::ensure_editable(&current)?;
        let status = lifecycle::apply_caller_status(invoice_id, current.status, header.status)?;

        if invoice_number != current.invoice_number
            && InvoiceRepository::number_in_use(&mut tx, &invoice_number, Some(invoice_id)).await?
        {
            return Err(CoreError::DuplicateInvoiceNumber(invoice_number).into());
        }

        let existing = InvoiceRepository::fetch_lines(&mut tx, invoice_id).await?;
        let catalog = CatalogRepository::load_snapshot(
            &mut tx,
            lines.iter().map(|l| &l.item).collect::<Vec<_>>(),
        )
        .await?;
        let plan = line_sync::synchronize(invoice_id, &existing, &lines, &catalog)?;

        debug!(
            invoice_id = %invoice_id,
            insert = plan.to_insert.len(),
            update = plan.to_update.len() - plan.unchanged,
            unchanged = plan.unchanged,
            delete = plan.to_delete.len(),
            "Line synchronization plan"
        );

        let now = Utc::now();
        InvoiceRepository::apply_plan(&mut tx, &plan, now).await?;

        let updated = Invoice {
            client_id: header.client_id.trim().to_string(),
            consultation_id: header.consultation_id,
            invoice_number,
            issue_date: header.issue_date,
            due_date: header.due_date,
            total_amount: plan.new_total,
            status,
            updated_at: now,
            ..current.clone()
        };
        InvoiceRepository::update_header(&mut tx, &updated, current.version).await?;

        let detail = read_detail(&mut tx, invoice_id).await?;
        tx.commit().await?;

        if status != current.status {
            info!(
                user_id = %auth.user_id,
                invoice_id = %invoice_id,
                from = %current.status,
                to = %status,
                "Invoice status changed"
            );
        }
        info!(
            user_id = %auth.user_id,
            invoice_id = %invoice_id,
            version = detail.invoice.version,
            old_total = %current.total_amount,
            new_total = %detail.invoice.total_amount,
            "Invoice updated"
        );
        Ok(detail)
    }

    /// Header, lines and payment summary of one invoice.
    pub async fn get_invoice(
        &self,
        _auth: &AuthContext,
        invoice_id: &str,
    ) -> DbResult<InvoiceDetail> {
        let mut conn = self.pool.acquire().await?;
        read_detail(&mut conn, invoice_id).await
    }

    /// Deletes an invoice and its lines.
    ///
    /// ## Errors
    /// - `DeletionRejected` (Conflict) if the invoice is Paid or has payments
    pub async fn delete_invoice(
        &self,
        auth: &AuthContext,
        invoice_id: &str,
        expected_version: Option<i64>,
    ) -> DbResult<()> {
        let mut tx = self.begin_write().await?;

        let invoice = InvoiceRepository::fetch_required(&mut tx, invoice_id).await?;
        check_version(&invoice, expected_version)?;

        let (payment_count, _) = PaymentRepository::totals_for_invoice(&mut tx, invoice_id).await?;
        lifecycle::ensure_deletable(&invoice, payment_count)?;

        InvoiceRepository::delete(&mut tx, invoice_id, invoice.version).await?;
        tx.commit().await?;

        info!(
            user_id = %auth.user_id,
            invoice_id = %invoice_id,
            invoice_number = %invoice.invoice_number,
            "Invoice deleted"
        );
        Ok(())
    }

    /// Claims the next free `<prefix>-YYYYMMDD-NNNN` number for `date`.
    ///
    /// Sequence values that collide with a manually entered number are
    /// skipped. The number is reserved, not assigned: pass it to
    /// [`Self::create_invoice`].
    pub async fn next_invoice_number(
        &self,
        auth: &AuthContext,
        date: NaiveDate,
    ) -> DbResult<String> {
        let mut tx = self.begin_write().await?;

        for _ in 0..MAX_NUMBER_ATTEMPTS {
            let candidate =
                InvoiceRepository::next_number(&mut tx, &self.settings.invoice_prefix, date).await?;

            if !InvoiceRepository::number_in_use(&mut tx, &candidate, None).await? {
                tx.commit().await?;
                debug!(user_id = %auth.user_id, number = %candidate, "Reserved invoice number");
                return Ok(candidate);
            }
            debug!(number = %candidate, "Generated number already in use, skipping");
        }

        Err(DbError::Conflict(format!(
            "no free invoice number for {} after {} attempts",
            date, MAX_NUMBER_ATTEMPTS
        )))
    }

    // =========================================================================
    // Payments
    // =========================================================================

    /// Records a receipt and settles the invoice status.
    ///
    /// Overpayment is accepted: the invoice becomes Paid and the excess is
    /// reported as `summary.overpaid_by`.
    ///
    /// ## Errors
    /// - `Validation` for a non-positive amount or a bad transaction id
    /// - `InvoiceNotFound`
    /// - `PaymentRejected` (Conflict) if the invoice is Void
    pub async fn record_payment(
        &self,
        auth: &AuthContext,
        new_payment: NewPayment,
    ) -> DbResult<PaymentReceipt> {
        let transaction_id = validate_new_payment(&new_payment)?;

        let mut tx = self.begin_write().await?;

        let invoice = InvoiceRepository::fetch_required(&mut tx, &new_payment.invoice_id).await?;
        if let Err(err) = ledger::ensure_accepts_payments(&invoice) {
            warn!(
                user_id = %auth.user_id,
                invoice_id = %invoice.id,
                status = %invoice.status,
                amount = %new_payment.amount,
                "Payment rejected"
            );
            return Err(err.into());
        }

        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4().to_string(),
            invoice_id: invoice.id.clone(),
            payment_date: new_payment.payment_date,
            amount: new_payment.amount,
            method: new_payment.method,
            transaction_id,
            created_at: now,
        };
        PaymentRepository::insert(&mut tx, &payment).await?;

        let summary = settle(&mut tx, &invoice, auth).await?;
        tx.commit().await?;

        info!(
            user_id = %auth.user_id,
            invoice_id = %invoice.id,
            payment_id = %payment.id,
            amount = %payment.amount,
            amount_paid = %summary.amount_paid,
            balance_due = %summary.balance_due,
            status = %summary.status,
            "Payment recorded"
        );
        Ok(PaymentReceipt { payment, summary })
    }

    /// Removes a payment and re-settles the invoice (Paid falls back to Sent
    /// when the remaining payments no longer cover the total).
    pub async fn reverse_payment(
        &self,
        auth: &AuthContext,
        payment_id: &str,
    ) -> DbResult<PaymentSummary> {
        let mut tx = self.begin_write().await?;

        let payment = PaymentRepository::fetch_required(&mut tx, payment_id).await?;
        let invoice = InvoiceRepository::fetch_required(&mut tx, &payment.invoice_id).await?;

        PaymentRepository::delete(&mut tx, payment_id).await?;
        let summary = settle(&mut tx, &invoice, auth).await?;
        tx.commit().await?;

        info!(
            user_id = %auth.user_id,
            invoice_id = %invoice.id,
            payment_id = %payment_id,
            amount = %payment.amount,
            amount_paid = %summary.amount_paid,
            status = %summary.status,
            "Payment reversed"
        );
        Ok(summary)
    }

    /// Payments of an invoice in the order received.
    pub async fn list_payments(
        &self,
        _auth: &AuthContext,
        invoice_id: &str,
    ) -> DbResult<Vec<Payment>> {
        let mut conn = self.pool.acquire().await?;
        InvoiceRepository::fetch_required(&mut conn, invoice_id).await?;
        PaymentRepository::fetch_for_invoice(&mut conn, invoice_id).await
    }

    pub async fn payment_summary(
        &self,
        _auth: &AuthContext,
        invoice_id: &str,
    ) -> DbResult<PaymentSummary> {
        let mut conn = self.pool.acquire().await?;
        let invoice = InvoiceRepository::fetch_required(&mut conn, invoice_id).await?;
        let (count, paid) = PaymentRepository::totals_for_invoice(&mut conn, invoice_id).await?;
        Ok(PaymentSummary::new(invoice.id, invoice.total_amount, paid, invoice.status, count))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn check_version(invoice: &Invoice, expected: Option<i64>) -> DbResult<()> {
    match expected {
        Some(version) if version != invoice.version => {
            warn!(
                invoice_id = %invoice.id,
                expected = version,
                actual = invoice.version,
                "Stale invoice version"
            );
            Err(DbError::Conflict(format!(
                "invoice {} is at version {}, expected {}",
                invoice.id, invoice.version, version
            )))
        }
        _ => Ok(()),
    }
}

async fn read_detail(conn: &mut SqliteConnection, invoice_id: &str) -> DbResult<InvoiceDetail> {
    let invoice = InvoiceRepository::fetch_required(conn, invoice_id).await?;
    let lines = InvoiceRepository::fetch_lines(conn, invoice_id).await?;
    let (count, paid) = PaymentRepository::totals_for_invoice(conn, invoice_id).await?;
    let summary = PaymentSummary::new(
        invoice.id.clone(),
        invoice.total_amount,
        paid,
        invoice.status,
        count,
    );
    Ok(InvoiceDetail {
        invoice,
        lines,
        summary,
    })
}

/// Recomputes paid-to-date after a payment insert or delete and writes the
/// settled status with a version bump.
async fn settle(
    conn: &mut SqliteConnection,
    invoice: &Invoice,
    auth: &AuthContext,
) -> DbResult<PaymentSummary> {
    let (count, paid) = PaymentRepository::totals_for_invoice(conn, &invoice.id).await?;
    let status = ledger::settle_status(invoice.status, invoice.total_amount, paid);

    InvoiceRepository::update_status(conn, &invoice.id, status, invoice.version, Utc::now()).await?;

    if status != invoice.status {
        info!(
            user_id = %auth.user_id,
            invoice_id = %invoice.id,
            from = %invoice.status,
            to = %status,
            "Invoice status changed"
        );
    }

    Ok(PaymentSummary::new(
        invoice.id.clone(),
        invoice.total_amount,
        paid,
        status,
        count,
    ))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use vetbill_core::{
        CatalogProduct, CatalogService, ErrorKind, InvoiceStatus, LineItemRef, Money,
        PaymentMethod, Quantity,
    };
    use crate::pool::{Database, DbConfig};

    fn auth() -> AuthContext {
        AuthContext::new("user-reception").with_role("receptionist")
    }

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, m, d).unwrap()
    }

    fn kg(s: &str) -> WeightKg {
        WeightKg::new(Decimal::from_str(s).unwrap()).unwrap()
    }

    fn qty(units: i64) -> Quantity {
        Quantity::whole(units).unwrap()
    }

    fn eur(cents: i64) -> Money {
        Money::from_cents(cents)
    }

    fn header(number: &str) -> InvoiceHeader {
        InvoiceHeader {
            client_id: "client-1".into(),
            consultation_id: Some("consult-1".into()),
            invoice_number: number.into(),
            issue_date: date(3, 14),
            due_date: date(4, 13),
            status: None,
        }
    }

    fn product(id: &str, units: i64, price: Option<i64>) -> SubmittedLine {
        SubmittedLine::new(LineItemRef::Product(id.into()), qty(units), price.map(eur))
    }

    fn service(id: &str, units: i64, price: i64) -> SubmittedLine {
        SubmittedLine::new(LineItemRef::Service(id.into()), qty(units), Some(eur(price)))
    }

    fn resubmit(line: &InvoiceLine) -> SubmittedLine {
        SubmittedLine::existing(&line.id, line.item.clone(), line.quantity, Some(line.unit_price))
    }

    fn payment(invoice_id: &str, cents: i64) -> NewPayment {
        NewPayment {
            invoice_id: invoice_id.into(),
            amount: eur(cents),
            payment_date: date(3, 20),
            method: PaymentMethod::Card,
            transaction_id: None,
        }
    }

    async fn setup() -> (Database, BillingEngine) {
        setup_with(DbConfig::in_memory()).await
    }

    /// File database with several connections, for interleaved units of work.
    async fn setup_file(dir: &tempfile::TempDir) -> (Database, BillingEngine) {
        setup_with(DbConfig::new(dir.path().join("clinic.db")).max_connections(3)).await
    }

    async fn setup_with(config: DbConfig) -> (Database, BillingEngine) {
        let db = Database::new(config).await.unwrap();
        let catalog = db.catalog();

        for (id, name) in [("svc-consult", "Consultation"), ("svc-vacc", "Vaccination")] {
            catalog
                .upsert_service(&CatalogService {
                    id: id.into(),
                    name: name.into(),
                    is_active: true,
                })
                .await
                .unwrap();
        }
        for (id, name, cents) in [
            ("prd-vaccine", "Rabies vaccine", 1000),
            ("prd-tablet", "Deworming tablet", 350),
            ("prd-collar", "Flea collar", 1899),
        ] {
            catalog
                .upsert_product(&CatalogProduct {
                    id: id.into(),
                    name: name.into(),
                    unit_price: eur(cents),
                    is_active: true,
                })
                .await
                .unwrap();
        }

        let engine = db.engine();
        (db, engine)
    }

    /// 2 × 10.00 vaccine + 1 × 25.00 consultation = 45.00
    async fn standard_invoice(engine: &BillingEngine, number: &str) -> InvoiceDetail {
        engine
            .create_invoice(
                &auth(),
                header(number),
                vec![product("prd-vaccine", 2, None), service("svc-consult", 1, 2500)],
            )
            .await
            .unwrap()
    }

    // -------------------------------------------------------------------------
    // Pricing
    // -------------------------------------------------------------------------

    async fn seed_vaccination_rules(engine: &BillingEngine) {
        engine
            .create_price_rule(
                &auth(),
                PriceRuleDraft {
                    service_id: "svc-vacc".into(),
                    species_id: None,
                    weight_min_kg: None,
                    weight_max_kg: None,
                    amount: eur(4500),
                    currency: None,
                },
            )
            .await
            .unwrap();
        engine
            .create_price_rule(
                &auth(),
                PriceRuleDraft {
                    service_id: "svc-vacc".into(),
                    species_id: Some("dog".into()),
                    weight_min_kg: Some(kg("10.1")),
                    weight_max_kg: Some(kg("25.0")),
                    amount: eur(24000),
                    currency: Some(CurrencyCode::parse("EUR").unwrap()),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_weight_banded_pricing_scenario() {
        let (_db, engine) = setup().await;
        seed_vaccination_rules(&engine).await;

        let dog = engine
            .quote_service(&auth(), "svc-vacc", Some("dog"), Some(kg("15")))
            .await
            .unwrap();
        assert_eq!(dog.amount, eur(24000));
        assert_eq!(dog.service_name, "Vaccination");
        assert_eq!(dog.currency.as_str(), "EUR");

        let cat = engine
            .resolve_price(&auth(), "svc-vacc", Some("cat"), Some(kg("15")))
            .await
            .unwrap();
        assert_eq!(cat.amount, eur(4500));

        let heavy_dog = engine
            .resolve_price(&auth(), "svc-vacc", Some("dog"), Some(kg("30")))
            .await
            .unwrap();
        assert_eq!(heavy_dog.amount, eur(4500));
    }

    #[tokio::test]
    async fn test_no_matching_rule_is_not_found() {
        let (_db, engine) = setup().await;

        let err = engine
            .resolve_price(&auth(), "svc-consult", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::NoMatchingPriceRule { .. })));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_disabled_rule_stops_matching() {
        let (_db, engine) = setup().await;
        seed_vaccination_rules(&engine).await;

        let rules = engine.list_price_rules(&auth(), "svc-vacc").await.unwrap();
        assert_eq!(rules.len(), 2);
        let universal = rules.iter().find(|r| r.species_id.is_none()).unwrap();

        let disabled = engine
            .set_price_rule_active(&auth(), &universal.id, false)
            .await
            .unwrap();
        assert!(!disabled.is_active);

        let err = engine
            .resolve_price(&auth(), "svc-vacc", Some("cat"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(engine.list_price_rules(&auth(), "svc-vacc").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_price_rule_defaults_and_validation() {
        let (db, _) = setup().await;
        let engine = db.engine_with(EngineSettings {
            invoice_prefix: "VET".into(),
            default_currency: CurrencyCode::parse("gbp").unwrap(),
        });

        let draft = PriceRuleDraft {
            service_id: "svc-consult".into(),
            species_id: None,
            weight_min_kg: None,
            weight_max_kg: None,
            amount: eur(3000),
            currency: None,
        };
        let rule = engine.create_price_rule(&auth(), draft.clone()).await.unwrap();
        assert_eq!(rule.currency.as_str(), "GBP");
        assert!(rule.is_active);

        let err = engine
            .create_price_rule(
                &auth(),
                PriceRuleDraft {
                    service_id: "svc-ghost".into(),
                    ..draft.clone()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = engine
            .create_price_rule(
                &auth(),
                PriceRuleDraft {
                    weight_min_kg: Some(kg("20")),
                    weight_max_kg: Some(kg("10")),
                    ..draft
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    // -------------------------------------------------------------------------
    // Invoices
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_create_invoice_computes_total() {
        let (_db, engine) = setup().await;
        let detail = standard_invoice(&engine, "INV-0001").await;

        assert_eq!(detail.invoice.total_amount, eur(4500));
        assert_eq!(detail.invoice.status, InvoiceStatus::Draft);
        assert_eq!(detail.invoice.version, 1);
        assert_eq!(detail.lines.len(), 2);
        assert_eq!(detail.lines[0].description, "Rabies vaccine");
        assert_eq!(detail.lines[0].unit_price, eur(1000));
        assert_eq!(detail.lines[0].line_total, eur(2000));
        assert_eq!(detail.lines[1].description, "Consultation");
        assert_eq!(detail.summary.balance_due, eur(4500));
    }

    #[tokio::test]
    async fn test_create_invoice_rejections() {
        let (_db, engine) = setup().await;
        standard_invoice(&engine, "INV-0001").await;

        let err = engine
            .create_invoice(&auth(), header("INV-0001"), vec![product("prd-tablet", 1, None)])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::DuplicateInvoiceNumber(_))));
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = engine
            .create_invoice(&auth(), header("INV-0002"), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::EmptyLineSet)));

        let no_price = SubmittedLine::new(LineItemRef::Service("svc-consult".into()), qty(1), None);
        let err = engine
            .create_invoice(&auth(), header("INV-0002"), vec![no_price])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut paid = header("INV-0002");
        paid.status = Some(InvoiceStatus::Paid);
        let err = engine
            .create_invoice(&auth(), paid, vec![product("prd-tablet", 1, None)])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut backwards = header("INV-0002");
        backwards.due_date = date(3, 1);
        let err = engine
            .create_invoice(&auth(), backwards, vec![product("prd-tablet", 1, None)])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        assert!(engine.get_invoice(&auth(), "missing").await.is_err());
    }

    #[tokio::test]
    async fn test_synchronization_completeness() {
        let (_db, engine) = setup().await;
        let created = engine
            .create_invoice(
                &auth(),
                header("INV-0001"),
                vec![
                    product("prd-vaccine", 1, None),
                    product("prd-tablet", 2, None),
                    product("prd-collar", 1, None),
                ],
            )
            .await
            .unwrap();
        let a = &created.lines[0];

        // {A, B, C} + {A', D} → A updated, B and C deleted, D inserted
        let updated = engine
            .update_invoice(
                &auth(),
                &created.invoice.id,
                Some(created.invoice.version),
                header("INV-0001"),
                vec![
                    SubmittedLine::existing(&a.id, a.item.clone(), qty(3), None),
                    service("svc-consult", 1, 2500),
                ],
            )
            .await
            .unwrap();

        assert_eq!(updated.lines.len(), 2);
        assert_eq!(updated.lines[0].id, a.id);
        assert_eq!(updated.lines[0].quantity, qty(3));
        assert_eq!(updated.lines[0].line_total, eur(3000));
        assert_eq!(updated.lines[1].item, LineItemRef::Service("svc-consult".into()));
        assert_eq!(updated.invoice.total_amount, eur(5500));
        assert_eq!(updated.invoice.version, created.invoice.version + 1);

        let total: Money = updated.lines.iter().map(|l| l.line_total).sum();
        assert_eq!(total, updated.invoice.total_amount);
    }

    #[tokio::test]
    async fn test_resubmitting_persisted_lines_changes_nothing() {
        let (_db, engine) = setup().await;
        let created = standard_invoice(&engine, "INV-0001").await;

        let same: Vec<SubmittedLine> = created.lines.iter().map(resubmit).collect();
        let again = engine
            .update_invoice(&auth(), &created.invoice.id, None, header("INV-0001"), same)
            .await
            .unwrap();

        assert_eq!(again.lines, created.lines);
        assert_eq!(again.invoice.total_amount, created.invoice.total_amount);
    }

    #[tokio::test]
    async fn test_failed_update_writes_nothing() {
        let (_db, engine) = setup().await;
        let created = standard_invoice(&engine, "INV-0001").await;

        let mut lines: Vec<SubmittedLine> = created.lines.iter().map(resubmit).collect();
        lines.push(product("prd-ghost", 1, None));
        let mut changed = header("INV-0099");
        changed.client_id = "client-2".into();

        let err = engine
            .update_invoice(&auth(), &created.invoice.id, None, changed, lines)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::ItemNotFound { .. })));

        let after = engine.get_invoice(&auth(), &created.invoice.id).await.unwrap();
        assert_eq!(after, created);
    }

    #[tokio::test]
    async fn test_foreign_and_duplicate_line_ids_are_rejected() {
        let (_db, engine) = setup().await;
        let first = standard_invoice(&engine, "INV-0001").await;
        let second = standard_invoice(&engine, "INV-0002").await;

        let foreign = resubmit(&first.lines[0]);
        let err = engine
            .update_invoice(&auth(), &second.invoice.id, None, header("INV-0002"), vec![foreign])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::UnknownLine { .. })));
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let twice = vec![resubmit(&second.lines[0]), resubmit(&second.lines[0])];
        let err = engine
            .update_invoice(&auth(), &second.invoice.id, None, header("INV-0002"), twice)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_invoice_number_uniqueness_on_update() {
        let (_db, engine) = setup().await;
        let first = standard_invoice(&engine, "INV-0001").await;
        standard_invoice(&engine, "INV-0002").await;
        let lines: Vec<SubmittedLine> = first.lines.iter().map(resubmit).collect();

        let err = engine
            .update_invoice(&auth(), &first.invoice.id, None, header("INV-0002"), lines.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::DuplicateInvoiceNumber(_))));

        let renamed = engine
            .update_invoice(&auth(), &first.invoice.id, None, header("INV-0003"), lines)
            .await
            .unwrap();
        assert_eq!(renamed.invoice.invoice_number, "INV-0003");
    }

    #[tokio::test]
    async fn test_stale_expected_version_is_conflict() {
        let (_db, engine) = setup().await;
        let created = standard_invoice(&engine, "INV-0001").await;
        let lines: Vec<SubmittedLine> = created.lines.iter().map(resubmit).collect();

        engine
            .update_invoice(
                &auth(),
                &created.invoice.id,
                Some(1),
                header("INV-0001"),
                lines.clone(),
            )
            .await
            .unwrap();

        let err = engine
            .update_invoice(&auth(), &created.invoice.id, Some(1), header("INV-0001"), lines)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));

        let err = engine
            .delete_invoice(&auth(), &created.invoice.id, Some(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_caller_status_transitions() {
        let (_db, engine) = setup().await;
        let created = standard_invoice(&engine, "INV-0001").await;
        let id = created.invoice.id.clone();
        let lines: Vec<SubmittedLine> = created.lines.iter().map(resubmit).collect();

        let mut to_paid = header("INV-0001");
        to_paid.status = Some(InvoiceStatus::Paid);
        let err = engine
            .update_invoice(&auth(), &id, None, to_paid, lines.clone())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut to_sent = header("INV-0001");
        to_sent.status = Some(InvoiceStatus::Sent);
        let sent = engine
            .update_invoice(&auth(), &id, None, to_sent, lines.clone())
            .await
            .unwrap();
        assert_eq!(sent.invoice.status, InvoiceStatus::Sent);

        let mut back_to_draft = header("INV-0001");
        back_to_draft.status = Some(InvoiceStatus::Draft);
        let err = engine
            .update_invoice(&auth(), &id, None, back_to_draft, lines.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::InvalidTransition { .. })));
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let mut to_void = header("INV-0001");
        to_void.status = Some(InvoiceStatus::Void);
        let void = engine
            .update_invoice(&auth(), &id, None, to_void, lines)
            .await
            .unwrap();
        assert_eq!(void.invoice.status, InvoiceStatus::Void);
    }

    #[tokio::test]
    async fn test_inactive_items() {
        let (db, engine) = setup().await;
        let created = standard_invoice(&engine, "INV-0001").await;
        db.catalog().set_product_active("prd-vaccine", false).await.unwrap();

        // existing line keeps its snapshot
        let lines: Vec<SubmittedLine> = created.lines.iter().map(resubmit).collect();
        let kept = engine
            .update_invoice(&auth(), &created.invoice.id, None, header("INV-0001"), lines.clone())
            .await
            .unwrap();
        assert_eq!(kept.lines[0].description, "Rabies vaccine");

        // new lines may not use it
        let mut with_new = lines;
        with_new.push(product("prd-vaccine", 1, None));
        let err = engine
            .update_invoice(&auth(), &created.invoice.id, None, header("INV-0001"), with_new)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::ItemNotFound { .. })));
    }

    #[tokio::test]
    async fn test_next_invoice_number_skips_taken_numbers() {
        let (_db, engine) = setup().await;
        standard_invoice(&engine, "INV-20260314-0001").await;

        let next = engine.next_invoice_number(&auth(), date(3, 14)).await.unwrap();
        assert_eq!(next, "INV-20260314-0002");

        let following = engine.next_invoice_number(&auth(), date(3, 14)).await.unwrap();
        assert_eq!(following, "INV-20260314-0003");

        let other_day = engine.next_invoice_number(&auth(), date(3, 15)).await.unwrap();
        assert_eq!(other_day, "INV-20260315-0001");
    }

    #[tokio::test]
    async fn test_delete_rules() {
        let (_db, engine) = setup().await;

        let draft = standard_invoice(&engine, "INV-0001").await;
        engine.delete_invoice(&auth(), &draft.invoice.id, None).await.unwrap();
        let err = engine.get_invoice(&auth(), &draft.invoice.id).await.unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::InvoiceNotFound(_))));

        let partly_paid = standard_invoice(&engine, "INV-0002").await;
        engine
            .record_payment(&auth(), payment(&partly_paid.invoice.id, 1000))
            .await
            .unwrap();
        let err = engine
            .delete_invoice(&auth(), &partly_paid.invoice.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::DeletionRejected { .. })));
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    // -------------------------------------------------------------------------
    // Payments
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_full_payment_scenario() {
        let (_db, engine) = setup().await;
        let created = standard_invoice(&engine, "INV-0001").await;

        let receipt = engine
            .record_payment(&auth(), payment(&created.invoice.id, 4500))
            .await
            .unwrap();
        assert_eq!(receipt.summary.status, InvoiceStatus::Paid);
        assert_eq!(receipt.summary.amount_paid, eur(4500));
        assert_eq!(receipt.summary.balance_due, Money::zero());

        let detail = engine.get_invoice(&auth(), &created.invoice.id).await.unwrap();
        assert_eq!(detail.invoice.status, InvoiceStatus::Paid);
        assert_eq!(detail.invoice.version, created.invoice.version + 1);
    }

    #[tokio::test]
    async fn test_overpayment_is_accepted() {
        let (_db, engine) = setup().await;
        let created = standard_invoice(&engine, "INV-0001").await;

        let receipt = engine
            .record_payment(&auth(), payment(&created.invoice.id, 5000))
            .await
            .unwrap();
        assert_eq!(receipt.summary.status, InvoiceStatus::Paid);
        assert_eq!(receipt.summary.amount_paid, eur(5000));
        assert_eq!(receipt.summary.overpaid_by, eur(500));
    }

    #[tokio::test]
    async fn test_partial_payments_then_reversal() {
        let (_db, engine) = setup().await;
        let created = standard_invoice(&engine, "INV-0001").await;
        let id = created.invoice.id.clone();

        let first = engine.record_payment(&auth(), payment(&id, 2000)).await.unwrap();
        assert_eq!(first.summary.status, InvoiceStatus::Draft);
        assert!(first.summary.is_partially_paid());

        let second = engine.record_payment(&auth(), payment(&id, 2500)).await.unwrap();
        assert_eq!(second.summary.status, InvoiceStatus::Paid);

        // Paid → Sent, never back to Draft
        let summary = engine.reverse_payment(&auth(), &second.payment.id).await.unwrap();
        assert_eq!(summary.status, InvoiceStatus::Sent);
        assert_eq!(summary.amount_paid, eur(2000));
        assert_eq!(summary.balance_due, eur(2500));

        let payments = engine.list_payments(&auth(), &id).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].id, first.payment.id);

        let err = engine
            .reverse_payment(&auth(), &second.payment.id)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::PaymentNotFound(_))));
    }

    #[tokio::test]
    async fn test_paid_invoice_is_locked() {
        let (_db, engine) = setup().await;
        let created = standard_invoice(&engine, "INV-0001").await;
        engine
            .record_payment(&auth(), payment(&created.invoice.id, 4500))
            .await
            .unwrap();
        let before = engine.get_invoice(&auth(), &created.invoice.id).await.unwrap();

        let err = engine
            .update_invoice(
                &auth(),
                &created.invoice.id,
                None,
                header("INV-0001"),
                vec![product("prd-tablet", 1, None)],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::InvoiceLocked { .. })));
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = engine
            .delete_invoice(&auth(), &created.invoice.id, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let after = engine.get_invoice(&auth(), &created.invoice.id).await.unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn test_void_invoice_rejects_payments() {
        let (_db, engine) = setup().await;
        let created = standard_invoice(&engine, "INV-0001").await;
        let mut void = header("INV-0001");
        void.status = Some(InvoiceStatus::Void);
        let lines: Vec<SubmittedLine> = created.lines.iter().map(resubmit).collect();
        engine
            .update_invoice(&auth(), &created.invoice.id, None, void, lines.clone())
            .await
            .unwrap();

        let err = engine
            .record_payment(&auth(), payment(&created.invoice.id, 4500))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::PaymentRejected { .. })));
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = engine
            .update_invoice(&auth(), &created.invoice.id, None, header("INV-0001"), lines)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::InvoiceLocked { .. })));

        let summary = engine.payment_summary(&auth(), &created.invoice.id).await.unwrap();
        assert_eq!(summary.status, InvoiceStatus::Void);
        assert_eq!(summary.payment_count, 0);
    }

    #[tokio::test]
    async fn test_payment_validation() {
        let (_db, engine) = setup().await;
        let created = standard_invoice(&engine, "INV-0001").await;

        let err = engine
            .record_payment(&auth(), payment(&created.invoice.id, 0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut blank_tx = payment(&created.invoice.id, 100);
        blank_tx.transaction_id = Some("   ".into());
        let err = engine.record_payment(&auth(), blank_tx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = engine
            .record_payment(&auth(), payment("inv-missing", 100))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = engine.list_payments(&auth(), "inv-missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    // -------------------------------------------------------------------------
    // Interleaved units of work
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_write_from_overtaken_snapshot_is_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let (db, engine) = setup_file(&dir).await;
        let created = standard_invoice(&engine, "INV-0001").await;
        let id = created.invoice.id.clone();

        // Deferred transaction: reads first, writes after another commit.
        let mut stale = db.pool().begin().await.unwrap();
        let seen = InvoiceRepository::fetch_required(&mut stale, &id).await.unwrap();

        let receipt = engine.record_payment(&auth(), payment(&id, 2000)).await.unwrap();

        let err = InvoiceRepository::update_status(
            &mut stale,
            &id,
            InvoiceStatus::Void,
            seen.version,
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        drop(stale);

        let detail = engine.get_invoice(&auth(), &id).await.unwrap();
        assert_eq!(detail.invoice.status, InvoiceStatus::Draft);
        assert_eq!(detail.invoice.version, created.invoice.version + 1);
        assert_eq!(detail.invoice.total_amount, eur(4500));
        assert_eq!(detail.summary.amount_paid, eur(2000));
        assert_eq!(detail.summary.payment_count, 1);
        assert_eq!(receipt.summary.status, InvoiceStatus::Draft);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_update_waits_for_writer_then_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let (db, engine) = setup_file(&dir).await;
        let created = standard_invoice(&engine, "INV-0001").await;
        let id = created.invoice.id.clone();

        let mut writer = db.pool().begin_with("BEGIN IMMEDIATE").await.unwrap();
        let current = InvoiceRepository::fetch_required(&mut writer, &id).await.unwrap();

        let racing = {
            let engine = engine.clone();
            let id = id.clone();
            let expected = created.invoice.version;
            let lines = created.lines.iter().map(resubmit).collect::<Vec<_>>();
            tokio::spawn(async move {
                engine
                    .update_invoice(
                        &auth(),
                        &id,
                        Some(expected),
                        header("INV-0001"),
                        lines,
                    )
                    .await
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        InvoiceRepository::update_status(
            &mut writer,
            &id,
            InvoiceStatus::Sent,
            current.version,
            Utc::now(),
        )
        .await
        .unwrap();
        writer.commit().await.unwrap();

        let err = racing.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let detail = engine.get_invoice(&auth(), &id).await.unwrap();
        assert_eq!(detail.invoice.status, InvoiceStatus::Sent);
        assert_eq!(detail.invoice.version, created.invoice.version + 1);
        assert_eq!(detail.invoice.total_amount, eur(4500));
        assert_eq!(detail.lines, created.lines);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_payment_and_reversal_keep_ledger_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let (_db, engine) = setup_file(&dir).await;
        let mut sent = header("INV-0001");
        sent.status = Some(InvoiceStatus::Sent);
        let created = engine
            .create_invoice(
                &auth(),
                sent,
                vec![product("prd-vaccine", 2, None), service("svc-consult", 1, 2500)],
            )
            .await
            .unwrap();
        let id = created.invoice.id.clone();
        let first = engine.record_payment(&auth(), payment(&id, 2000)).await.unwrap();

        let a = auth();
        let (paid, reversed) = tokio::join!(
            engine.record_payment(&a, payment(&id, 2500)),
            engine.reverse_payment(&a, &first.payment.id),
        );
        let paid = paid.unwrap();
        reversed.unwrap();

        let detail = engine.get_invoice(&auth(), &id).await.unwrap();
        assert_eq!(detail.invoice.status, InvoiceStatus::Sent);
        assert_eq!(detail.invoice.version, created.invoice.version + 3);
        assert_eq!(detail.invoice.total_amount, eur(4500));
        assert_eq!(detail.summary.amount_paid, eur(2500));
        assert_eq!(detail.summary.balance_due, eur(2000));

        let payments = engine.list_payments(&auth(), &id).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].id, paid.payment.id);
    }
}
