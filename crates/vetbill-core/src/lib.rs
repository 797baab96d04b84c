//! # vetbill-core: Pure Billing Logic
//!
//! The decision logic of the clinic billing engine, as pure functions over
//! in-memory values. Nothing in this crate touches a database, the network
//! or the clock.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Billing Engine Layers                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │           Request layer (identity, routing, not here)           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ AuthContext + validated input          │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │          vetbill-db: BillingEngine (one transaction per op)     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ vetbill-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │  ┌──────────┐ ┌──────────┐ ┌───────────┐ ┌──────────┐ ┌──────┐ │   │
//! │  │  │ pricing  │ │ resolver │ │ line_sync │ │lifecycle │ │ledger│ │   │
//! │  │  │ rules →  │ │ item →   │ │ submitted │ │ status   │ │ paid │ │   │
//! │  │  │ price    │ │ line     │ │ → plan    │ │ machine  │ │ → st │ │   │
//! │  │  └──────────┘ └──────────┘ └───────────┘ └──────────┘ └──────┘ │   │
//! │  │                                                                 │   │
//! │  │   types • money • validation • error                            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Invoice, InvoiceLine, Payment, PriceRule, ...)
//! - [`money`] - Money as integer cents
//! - [`error`] - Domain error types and the shared [`ErrorKind`]
//! - [`validation`] - Field and cross-field input rules
//! - [`pricing`] - Price Rule Catalog matching and tie-break
//! - [`resolver`] - Item Resolver (description + unit price + line total)
//! - [`line_sync`] - Invoice Line Synchronizer
//! - [`lifecycle`] - Invoice status machine and edit/delete guards
//! - [`ledger`] - Payment settlement and paid-to-date summary
//!
//! ## Example Usage
//!
//! ```rust
//! use vetbill_core::line_sync::synchronize;
//! use vetbill_core::resolver::CatalogSnapshot;
//! use vetbill_core::{CatalogService, LineItemRef, Money, Quantity, SubmittedLine};
//!
//! let catalog = CatalogSnapshot::new().with_service(CatalogService {
//!     id: "svc-vacc".into(),
//!     name: "Vaccination".into(),
//!     is_active: true,
//! });
//!
//! let lines = vec![SubmittedLine::new(
//!     LineItemRef::Service("svc-vacc".into()),
//!     Quantity::whole(2).unwrap(),
//!     Some(Money::from_cents(1000)),
//! )];
//!
//! let plan = synchronize("inv-1", &[], &lines, &catalog).unwrap();
//! assert_eq!(plan.new_total.to_string(), "20.00");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod line_sync;
pub mod money;
pub mod pricing;
pub mod resolver;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ErrorKind, ValidationError};
pub use ledger::PaymentSummary;
pub use line_sync::{LineSyncPlan, LineUpdate};
pub use money::Money;
pub use pricing::{PriceQuote, ServiceQuote};
pub use resolver::{CatalogSnapshot, ItemCatalog, ResolvedLine};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Largest quantity accepted on a single line.
///
/// ## Business Reason
/// Catches typing slips (99 999 ml of anything is not a real line).
pub const MAX_LINE_QUANTITY: i64 = 99_999;

/// Fractional digits allowed in a quantity (milligram / millilitre dosing).
pub const QUANTITY_DECIMALS: u32 = 3;

/// Largest unit price accepted on a line: 100 000.00.
pub const MAX_UNIT_PRICE_CENTS: i64 = 10_000_000;

/// Maximum number of lines on one invoice.
pub const MAX_LINES_PER_INVOICE: usize = 200;

/// Maximum length of an invoice number.
pub const MAX_INVOICE_NUMBER_LEN: usize = 32;

/// Maximum length of an external payment reference.
pub const MAX_TRANSACTION_ID_LEN: usize = 64;

/// Prefix of generated invoice numbers (`INV-20260412-0001`).
pub const DEFAULT_INVOICE_PREFIX: &str = "INV";

/// Currency used when a price rule is created without one.
pub const DEFAULT_CURRENCY: &str = "EUR";
