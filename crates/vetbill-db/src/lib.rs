//! # vetbill-db: Transactional Store & Billing Engine
//!
//! SQLite persistence for the billing engine, and the engine itself: the
//! operations that combine `vetbill-core` rules with reads and writes inside
//! one transaction.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        VetBill Data Flow                                │
//! │                                                                         │
//! │  Request layer (HTTP handler, desktop command, ...)                     │
//! │       │  AuthContext + input                                            │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │                     vetbill-db (THIS CRATE)                     │    │
//! │  │                                                                 │    │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐    │    │
//! │  │   │ BillingEngine │───►│ Repositories  │    │  Migrations  │    │    │
//! │  │   │  (engine.rs)  │    │ catalog       │    │  (embedded)  │    │    │
//! │  │   │               │    │ price_rule    │    │              │    │    │
//! │  │   │ one tx per op │    │ invoice       │    │ 001_init.sql │    │    │
//! │  │   └───────┬───────┘    │ payment       │    └──────────────┘    │    │
//! │  │           │            └───────┬───────┘                        │    │
//! │  │           ▼                    ▼                                │    │
//! │  │   vetbill-core rules     Database (pool.rs) ◄── BillingConfig   │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (WAL, foreign keys on)                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - Layered configuration (defaults, `billing.toml`, env)
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//! - [`engine`] - Billing operations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vetbill_db::{BillingConfig, Database};
//!
//! let config = BillingConfig::load(None)?;
//! let db = Database::new(config.db_config()).await?;
//! let engine = db.engine_with(config.engine_settings()?);
//!
//! let number = engine.next_invoice_number(&auth, today).await?;
//! let detail = engine.create_invoice(&auth, header, lines).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod engine;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::BillingConfig;
pub use engine::{BillingEngine, EngineSettings, InvoiceDetail, PaymentReceipt};
pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::catalog::CatalogRepository;
pub use repository::invoice::InvoiceRepository;
pub use repository::payment::PaymentRepository;
pub use repository::price_rule::PriceRuleRepository;
