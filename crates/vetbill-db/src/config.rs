//! # Billing Configuration
//!
//! Runtime settings for the store and the engine.
//!
//! ## Load Order (later overrides earlier)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. Defaults            vetbill.db in the platform data dir, prefix INV │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  2. billing.toml        <config dir>/billing.toml (if present)          │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  3. Environment         VETBILL_DB_PATH                                 │
//! │                         VETBILL_MAX_CONNECTIONS                         │
//! │                         VETBILL_INVOICE_PREFIX                          │
//! │                         VETBILL_DEFAULT_CURRENCY                        │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  4. validate()                                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example billing.toml
//! ```toml
//! [database]
//! path = "/var/lib/vetbill/clinic.db"
//! max_connections = 8
//!
//! [invoicing]
//! number_prefix = "VET"
//! default_currency = "EUR"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use vetbill_core::{CurrencyCode, DEFAULT_CURRENCY, DEFAULT_INVOICE_PREFIX};

use crate::engine::EngineSettings;
use crate::error::{DbError, DbResult};
use crate::pool::DbConfig;

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file path. Created on first connect.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Apply pending migrations on connect.
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("com", "vetbill", "billing")
        .map(|dirs| dirs.data_dir().join("vetbill.db"))
        .unwrap_or_else(|| PathBuf::from("vetbill.db"))
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
            run_migrations: true,
        }
    }
}

// =============================================================================
// Invoicing Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoicingSettings {
    /// Prefix of generated invoice numbers (`<prefix>-YYYYMMDD-NNNN`).
    #[serde(default = "default_prefix")]
    pub number_prefix: String,

    /// Currency for price rules created without one.
    #[serde(default = "default_currency")]
    pub default_currency: String,
}

fn default_prefix() -> String {
    DEFAULT_INVOICE_PREFIX.to_string()
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

impl Default for InvoicingSettings {
    fn default() -> Self {
        InvoicingSettings {
            number_prefix: default_prefix(),
            default_currency: default_currency(),
        }
    }
}

// =============================================================================
// Billing Config
// =============================================================================

/// Complete configuration for the billing store and engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BillingConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub invoicing: InvoicingSettings,
}

impl BillingConfig {
    /// Loads configuration from file, environment, and defaults.
    pub fn load(config_path: Option<PathBuf>) -> DbResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading billing config from file");
                config = Self::from_file(&path)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parses a TOML file without applying overrides.
    pub fn from_file(path: &Path) -> DbResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| DbError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(toml::from_str(&contents)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> DbResult<()> {
        if self.database.path.as_os_str().is_empty() {
            return Err(DbError::Config("database.path must not be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(DbError::Config(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        let prefix = &self.invoicing.number_prefix;
        if prefix.is_empty()
            || prefix.len() > 8
            || !prefix.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(DbError::Config(format!(
                "invoicing.number_prefix must be 1-8 letters or digits, got '{}'",
                prefix
            )));
        }

        CurrencyCode::parse(&self.invoicing.default_currency).map_err(|e| {
            DbError::Config(format!("invoicing.default_currency: {}", e))
        })?;

        Ok(())
    }

    /// Applies `VETBILL_*` environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from any key/value source.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("VETBILL_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(max) = lookup("VETBILL_MAX_CONNECTIONS") {
            match max.parse::<u32>() {
                Ok(n) => self.database.max_connections = n,
                Err(_) => warn!(value = %max, "Ignoring invalid VETBILL_MAX_CONNECTIONS"),
            }
        }

        if let Some(prefix) = lookup("VETBILL_INVOICE_PREFIX") {
            self.invoicing.number_prefix = prefix;
        }

        if let Some(currency) = lookup("VETBILL_DEFAULT_CURRENCY") {
            self.invoicing.default_currency = currency;
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "vetbill", "billing")
            .map(|dirs| dirs.config_dir().join("billing.toml"))
    }

    // =========================================================================
    // Conversions
    // =========================================================================

    /// Pool configuration derived from the `[database]` section.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path)
            .max_connections(self.database.max_connections)
            .connect_timeout(Duration::from_secs(self.database.connect_timeout_secs))
            .run_migrations(self.database.run_migrations)
    }

    /// Engine settings derived from the `[invoicing]` section.
    pub fn engine_settings(&self) -> DbResult<EngineSettings> {
        let currency = CurrencyCode::parse(&self.invoicing.default_currency)?;
        Ok(EngineSettings {
            invoice_prefix: self.invoicing.number_prefix.clone(),
            default_currency: currency,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
