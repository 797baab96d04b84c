//! # Domain Types
//!
//! Core domain types used throughout the billing engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Invoice      │   │  InvoiceLine    │   │    Payment      │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │◄──│  invoice_id     │   │  invoice_id ────┼──►    │
//! │  │  invoice_number │   │  item (enum)    │   │  amount         │       │
//! │  │  status         │   │  description    │   │  method         │       │
//! │  │  total_amount   │   │  line_total     │   │  payment_date   │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   PriceRule     │   │  LineItemRef    │   │ InvoiceStatus   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  service_id     │   │  Service(id)    │   │  Draft  Sent    │       │
//! │  │  species_id?    │   │  Product(id)    │   │  Paid   Void    │       │
//! │  │  weight range?  │   └─────────────────┘   └─────────────────┘       │
//! │  └─────────────────┘                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Id-Based References
//! Entities reference each other by id only (`InvoiceLine.invoice_id`,
//! `Payment.invoice_id`). There are no live object links, so an invoice, its
//! lines and its payments can be loaded, diffed and stored independently.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Money;
use crate::{MAX_LINE_QUANTITY, QUANTITY_DECIMALS};

// =============================================================================
// Quantity
// =============================================================================

/// A positive, exact line quantity (e.g. `2`, `0.5` tablets, `2.5` ml).
///
/// ## Rules
/// - Must be > 0
/// - At most [`QUANTITY_DECIMALS`] fractional digits
/// - At most [`MAX_LINE_QUANTITY`]
///
/// A `Quantity` that exists is always valid, so downstream code never
/// re-checks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Quantity(Decimal);

impl Quantity {
    /// Creates a validated quantity.
    ///
    /// ## Example
    /// ```rust
    /// use rust_decimal::Decimal;
    /// use vetbill_core::Quantity;
    ///
    /// assert!(Quantity::new(Decimal::new(25, 1)).is_ok()); // 2.5
    /// assert!(Quantity::new(Decimal::ZERO).is_err());
    /// ```
    pub fn new(value: Decimal) -> Result<Self, ValidationError> {
        if value <= Decimal::ZERO {
            return Err(ValidationError::MustBePositive {
                field: "quantity".to_string(),
            });
        }

        let value = value.normalize();
        if value.scale() > QUANTITY_DECIMALS {
            return Err(ValidationError::TooManyDecimals {
                field: "quantity".to_string(),
                max: QUANTITY_DECIMALS,
            });
        }

        if value > Decimal::from(MAX_LINE_QUANTITY) {
            return Err(ValidationError::OutOfRange {
                field: "quantity".to_string(),
                min: 0,
                max: MAX_LINE_QUANTITY,
            });
        }

        Ok(Quantity(value))
    }

    /// Whole-unit quantity.
    pub fn whole(units: i64) -> Result<Self, ValidationError> {
        Quantity::new(Decimal::from(units))
    }

    /// Returns the underlying decimal value.
    #[inline]
    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Quantity {
    type Error = ValidationError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Quantity::new(value)
    }
}

impl From<Quantity> for Decimal {
    fn from(qty: Quantity) -> Self {
        qty.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Weight
// =============================================================================

/// Patient body weight (or a price-rule weight bound) in kilograms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct WeightKg(Decimal);

impl WeightKg {
    /// Creates a validated weight (must not be negative).
    pub fn new(value: Decimal) -> Result<Self, ValidationError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(ValidationError::MustNotBeNegative {
                field: "weight_kg".to_string(),
            });
        }
        Ok(WeightKg(value.normalize()))
    }

    /// Returns the underlying decimal value.
    #[inline]
    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for WeightKg {
    type Error = ValidationError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        WeightKg::new(value)
    }
}

impl From<WeightKg> for Decimal {
    fn from(weight: WeightKg) -> Self {
        weight.0
    }
}

impl fmt::Display for WeightKg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} kg", self.0)
    }
}

// =============================================================================
// Currency Code
// =============================================================================

/// ISO 4217 style currency code, always three uppercase ASCII letters.
///
/// Only price rules carry a currency; there is no conversion anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(try_from = "String", into = "String")]
#[ts(export)]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Parses and normalizes a currency code (`"eur"` → `"EUR"`).
    pub fn parse(code: &str) -> Result<Self, ValidationError> {
        let code = code.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::InvalidFormat {
                field: "currency".to_string(),
                reason: "must be a 3-letter code".to_string(),
            });
        }
        Ok(CurrencyCode(code.to_ascii_uppercase()))
    }

    /// Returns the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CurrencyCode {
    /// The clinic default, [`crate::DEFAULT_CURRENCY`].
    fn default() -> Self {
        CurrencyCode(crate::DEFAULT_CURRENCY.to_string())
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        CurrencyCode::parse(&value)
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Catalog Records
// =============================================================================

/// A billable service (consultation, vaccination, surgery, ...).
///
/// Read-only from the engine's perspective.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CatalogService {
    pub id: String,
    pub name: String,
    /// Inactive services cannot be put on new lines.
    pub is_active: bool,
}

/// A stocked product (medication, food, accessory).
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CatalogProduct {
    pub id: String,
    pub name: String,
    /// List price used when a line does not supply its own.
    pub unit_price: Money,
    pub is_active: bool,
}

// =============================================================================
// Price Rule
// =============================================================================

/// A conditional price for a service, optionally scoped by species and
/// weight range.
///
/// ## Example Rule Set (one service)
/// ```text
/// ┌──────────┬─────────┬───────────────┬──────────┐
/// │ species  │ min kg  │ max kg        │ amount   │
/// ├──────────┼─────────┼───────────────┼──────────┤
/// │ (any)    │ (none)  │ (none)        │  45.00   │ ← universal fallback
/// │ dog      │ 10.1    │ 25.0          │ 240.00   │
/// │ dog      │ 25.1    │ (none)        │ 310.00   │
/// └──────────┴─────────┴───────────────┴──────────┘
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PriceRule {
    pub id: String,
    pub service_id: String,
    /// `None` = applies to every species.
    pub species_id: Option<String>,
    #[ts(type = "string | null")]
    pub weight_min_kg: Option<WeightKg>,
    #[ts(type = "string | null")]
    pub weight_max_kg: Option<WeightKg>,
    pub amount: Money,
    pub currency: CurrencyCode,
    /// Soft-disable flag; rules referenced historically are never deleted.
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a price rule.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PriceRuleDraft {
    pub service_id: String,
    pub species_id: Option<String>,
    #[ts(type = "string | null")]
    pub weight_min_kg: Option<WeightKg>,
    #[ts(type = "string | null")]
    pub weight_max_kg: Option<WeightKg>,
    pub amount: Money,
    /// `None` uses the configured default currency.
    pub currency: Option<CurrencyCode>,
}

// =============================================================================
// Line Item Reference
// =============================================================================

/// Which catalog a line item points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Service,
    Product,
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemType::Service => write!(f, "service"),
            ItemType::Product => write!(f, "product"),
        }
    }
}

/// The billable thing a line refers to: exactly one service or one product.
///
/// ## Why an enum?
/// Two nullable foreign keys (`service_id`, `product_id`) allow the illegal
/// states "both" and "neither". A sum type makes them unrepresentable.
///
/// ## Serialized Form
/// ```json
/// { "item_type": "service", "item_id": "svc-vaccination" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "item_type", content = "item_id", rename_all = "snake_case")]
pub enum LineItemRef {
    Service(String),
    Product(String),
}

impl LineItemRef {
    /// Builds a reference from its persisted `(item_type, item_id)` pair.
    pub fn new(item_type: ItemType, item_id: impl Into<String>) -> Self {
        match item_type {
            ItemType::Service => LineItemRef::Service(item_id.into()),
            ItemType::Product => LineItemRef::Product(item_id.into()),
        }
    }

    /// Returns the catalog this reference points into.
    pub fn item_type(&self) -> ItemType {
        match self {
            LineItemRef::Service(_) => ItemType::Service,
            LineItemRef::Product(_) => ItemType::Product,
        }
    }

    /// Returns the referenced catalog id.
    pub fn item_id(&self) -> &str {
        match self {
            LineItemRef::Service(id) | LineItemRef::Product(id) => id,
        }
    }
}

// =============================================================================
// Invoice Status
// =============================================================================

/// The lifecycle status of an invoice.
///
/// Transition rules live in [`crate::lifecycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Being prepared; freely editable.
    #[default]
    Draft,
    /// Issued to the client; still editable, awaiting payment.
    Sent,
    /// Fully paid (possibly overpaid). Locked.
    Paid,
    /// Cancelled. Locked, never auto-transitions.
    Void,
}

impl InvoiceStatus {
    /// Returns the lowercase name stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Void => "void",
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payment Method
// =============================================================================

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    BankTransfer,
    Cheque,
    Other,
}

// =============================================================================
// Invoice
// =============================================================================

/// Invoice header as persisted.
///
/// `total_amount` is derived: it always equals the sum of the current line
/// totals and is only ever written by line synchronization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Invoice {
    pub id: String,
    pub client_id: String,
    pub consultation_id: Option<String>,
    /// Human-facing unique number, e.g. `INV-20260412-0003`.
    pub invoice_number: String,
    #[ts(as = "String")]
    pub issue_date: NaiveDate,
    #[ts(as = "String")]
    pub due_date: NaiveDate,
    pub total_amount: Money,
    pub status: InvoiceStatus,
    /// Optimistic concurrency counter, bumped by every write to the aggregate.
    pub version: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied header fields for create/update.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InvoiceHeader {
    pub client_id: String,
    pub consultation_id: Option<String>,
    pub invoice_number: String,
    #[ts(as = "String")]
    pub issue_date: NaiveDate,
    #[ts(as = "String")]
    pub due_date: NaiveDate,
    /// Requested status; `None` keeps the current one (Draft on create).
    pub status: Option<InvoiceStatus>,
}

// =============================================================================
// Invoice Line
// =============================================================================

/// One billable entry on an invoice.
///
/// Uses the snapshot pattern: `description` is copied from the catalog when
/// the line is resolved, so renaming a service later never rewrites history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InvoiceLine {
    pub id: String,
    pub invoice_id: String,
    pub item: LineItemRef,
    pub description: String,
    #[ts(type = "string")]
    pub quantity: Quantity,
    pub unit_price: Money,
    /// quantity × unit_price, rounded to the cent.
    pub line_total: Money,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// A line as submitted by the caller in a full replacement set.
///
/// `id` is `Some` for lines that already exist on the invoice and `None`
/// for new ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SubmittedLine {
    pub id: Option<String>,
    pub item: LineItemRef,
    #[ts(type = "string")]
    pub quantity: Quantity,
    /// Required for services; products fall back to their list price.
    pub unit_price: Option<Money>,
}

impl SubmittedLine {
    /// A new (not yet persisted) line.
    pub fn new(item: LineItemRef, quantity: Quantity, unit_price: Option<Money>) -> Self {
        SubmittedLine {
            id: None,
            item,
            quantity,
            unit_price,
        }
    }

    /// A line that updates an existing line in place.
    pub fn existing(
        id: impl Into<String>,
        item: LineItemRef,
        quantity: Quantity,
        unit_price: Option<Money>,
    ) -> Self {
        SubmittedLine {
            id: Some(id.into()),
            item,
            quantity,
            unit_price,
        }
    }
}

// =============================================================================
// Payment
// =============================================================================

/// A cash receipt against an invoice.
///
/// Payments are only ever inserted or removed (reversal), never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Payment {
    pub id: String,
    pub invoice_id: String,
    #[ts(as = "String")]
    pub payment_date: NaiveDate,
    pub amount: Money,
    pub method: PaymentMethod,
    /// External reference (card terminal auth code, bank reference, ...).
    pub transaction_id: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// Input for recording a payment.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewPayment {
    pub invoice_id: String,
    pub amount: Money,
    #[ts(as = "String")]
    pub payment_date: NaiveDate,
    pub method: PaymentMethod,
    pub transaction_id: Option<String>,
}

// =============================================================================
// Authorization Context
// =============================================================================

/// Who is calling, as established by the identity layer.
///
/// Passed explicitly into every engine operation. The engine trusts that
/// authorization already happened and never inspects `roles`; the context is
/// carried for audit logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AuthContext {
    pub user_id: String,
    pub roles: Vec<String>,
    /// Set when the caller is a client acting on their own account.
    pub client_id: Option<String>,
}

impl AuthContext {
    /// Staff caller with no role information attached.
    pub fn new(user_id: impl Into<String>) -> Self {
        AuthContext {
            user_id: user_id.into(),
            roles: Vec::new(),
            client_id: None,
        }
    }

    /// Adds a role (builder style).
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
