//! # Repository Module
//!
//! SQL for each table family lives in one repository.
//!
//! ## Two Entry Points Per Repository
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Pool methods (&self)                 Connection functions (conn)       │
//! │  ─────────────────────                ───────────────────────────       │
//! │  db.invoices().get_by_id(id)          InvoiceRepository::fetch(         │
//! │       │                                   &mut *tx, id)                 │
//! │       │ acquires a connection              │                            │
//! │       ▼                                    │ runs inside the caller's   │
//! │  InvoiceRepository::fetch(&mut conn) ◄─────┘ transaction                │
//! │                                                                         │
//! │  Reads outside an engine op use the   BillingEngine composes the        │
//! │  pool methods.                        connection functions so header,   │
//! │                                       lines and payments commit         │
//! │                                       together.                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`catalog::CatalogRepository`] - Services and products
//! - [`price_rule::PriceRuleRepository`] - Price rule catalog
//! - [`invoice::InvoiceRepository`] - Invoices, lines, number counters
//! - [`payment::PaymentRepository`] - Payment records

pub mod catalog;
pub mod invoice;
pub mod payment;
pub mod price_rule;

use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::{DbError, DbResult};

/// Parses an exact decimal stored as TEXT.
pub(crate) fn parse_decimal(column: &str, raw: &str) -> DbResult<Decimal> {
    Decimal::from_str(raw).map_err(|e| DbError::corrupt(column, e))
}
