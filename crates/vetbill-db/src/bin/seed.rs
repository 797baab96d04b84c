//! # Seed Data Generator
//!
//! Populates a development database with a small clinic catalog, weight
//! banded price rules, and optionally a demo invoice with a partial payment.
//!
//! ## Usage
//! ```bash
//! # Seed the database named in billing.toml / VETBILL_DB_PATH
//! cargo run -p vetbill-db --bin seed
//!
//! # Explicit database file, plus a demo invoice
//! cargo run -p vetbill-db --bin seed -- --db ./vetbill_dev.db --demo
//!
//! # More logging
//! RUST_LOG=debug cargo run -p vetbill-db --bin seed
//! ```
//!
//! Catalog rows are upserted, so running the seed twice is harmless. Price
//! rules are only created for services that have none yet.

use chrono::{Days, Utc};
use rust_decimal::Decimal;
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vetbill_core::{
    AuthContext, CatalogProduct, CatalogService, InvoiceHeader, InvoiceStatus, LineItemRef, Money,
    NewPayment, PaymentMethod, PriceRuleDraft, Quantity, SubmittedLine, WeightKg,
};
use vetbill_db::{BillingConfig, BillingEngine, Database};

const SERVICES: &[(&str, &str)] = &[
    ("svc-consult", "General consultation"),
    ("svc-vacc", "Vaccination"),
    ("svc-dental", "Dental cleaning"),
    ("svc-neuter", "Neutering"),
];

const PRODUCTS: &[(&str, &str, i64)] = &[
    ("prd-rabies", "Rabies vaccine dose", 1000),
    ("prd-dewormer", "Deworming tablet", 350),
    ("prd-collar", "Flea and tick collar", 1899),
    ("prd-food-renal", "Renal diet 2kg", 3450),
    ("prd-shampoo", "Medicated shampoo", 1275),
];

/// (service, species, min kg, max kg, amount in cents)
///
/// Weights are in tenths of a kilogram.
const PRICE_RULES: &[(&str, Option<&str>, Option<i64>, Option<i64>, i64)] = &[
    ("svc-consult", None, None, None, 4500),
    ("svc-vacc", None, None, None, 4500),
    ("svc-vacc", Some("dog"), Some(101), Some(250), 24000),
    ("svc-vacc", Some("dog"), Some(251), None, 29000),
    ("svc-dental", None, None, None, 12000),
    ("svc-dental", Some("cat"), None, None, 9500),
    ("svc-neuter", Some("cat"), None, None, 15000),
    ("svc-neuter", Some("dog"), Some(0), Some(100), 22000),
    ("svc-neuter", Some("dog"), Some(101), None, 31000),
];

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,vetbill=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn tenths_kg(value: Option<i64>) -> Result<Option<WeightKg>, Box<dyn std::error::Error>> {
    Ok(value.map(|v| WeightKg::new(Decimal::new(v, 1))).transpose()?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = env::args().collect();

    let mut db_path: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;
    let mut demo = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--demo" => demo = true,
            "--help" | "-h" => {
                println!("VetBill Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>        Database file (overrides billing.toml)");
                println!("  -c, --config <PATH>    billing.toml to load");
                println!("      --demo             Also create a demo invoice with a payment");
                println!("  -h, --help             Show this help message");
                return Ok(());
            }
            other => warn!(argument = %other, "Ignoring unknown argument"),
        }
        i += 1;
    }

    let mut config = BillingConfig::load(config_path)?;
    if let Some(path) = db_path {
        config.database.path = path;
    }

    info!(path = %config.database.path.display(), "Seeding database");

    let db = Database::new(config.db_config()).await?;
    let engine = db.engine_with(config.engine_settings()?);
    let auth = AuthContext::new("seed").with_role("admin");

    seed_catalog(&db).await?;
    let rules = seed_price_rules(&engine, &auth).await?;
    info!(rules, "Price rules created");

    if demo {
        seed_demo_invoice(&engine, &auth).await?;
    }

    db.close().await;
    info!("Seed complete");
    Ok(())
}

async fn seed_catalog(db: &Database) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = db.catalog();

    for (id, name) in SERVICES {
        catalog
            .upsert_service(&CatalogService {
                id: id.to_string(),
                name: name.to_string(),
                is_active: true,
            })
            .await?;
    }

    for (id, name, cents) in PRODUCTS {
        catalog
            .upsert_product(&CatalogProduct {
                id: id.to_string(),
                name: name.to_string(),
                unit_price: Money::from_cents(*cents),
                is_active: true,
            })
            .await?;
    }

    info!(
        services = SERVICES.len(),
        products = PRODUCTS.len(),
        "Catalog upserted"
    );
    Ok(())
}

async fn seed_price_rules(
    engine: &BillingEngine,
    auth: &AuthContext,
) -> Result<usize, Box<dyn std::error::Error>> {
    let mut created = 0;

    for (service_id, _) in SERVICES {
        if !engine.list_price_rules(auth, service_id).await?.is_empty() {
            info!(service_id = %service_id, "Service already has price rules, skipping");
            continue;
        }

        for (rule_service, species, min, max, cents) in PRICE_RULES {
            if rule_service != service_id {
                continue;
            }
            engine
                .create_price_rule(
                    auth,
                    PriceRuleDraft {
                        service_id: service_id.to_string(),
                        species_id: species.map(str::to_string),
                        weight_min_kg: tenths_kg(*min)?,
                        weight_max_kg: tenths_kg(*max)?,
                        amount: Money::from_cents(*cents),
                        currency: None,
                    },
                )
                .await?;
            created += 1;
        }
    }

    Ok(created)
}

/// Vaccination visit for a 15 kg dog, invoiced and partly paid.
async fn seed_demo_invoice(
    engine: &BillingEngine,
    auth: &AuthContext,
) -> Result<(), Box<dyn std::error::Error>> {
    let today = Utc::now().date_naive();
    let due = today.checked_add_days(Days::new(30)).unwrap_or(today);

    let quote = engine
        .quote_service(auth, "svc-vacc", Some("dog"), Some(WeightKg::new(Decimal::new(15, 0))?))
        .await?;
    info!(
        service = %quote.service_name,
        amount = %quote.amount,
        currency = %quote.currency,
        "Quoted"
    );

    let number = engine.next_invoice_number(auth, today).await?;
    let detail = engine
        .create_invoice(
            auth,
            InvoiceHeader {
                client_id: "client-demo".to_string(),
                consultation_id: None,
                invoice_number: number,
                issue_date: today,
                due_date: due,
                status: Some(InvoiceStatus::Sent),
            },
            vec![
                SubmittedLine::new(
                    LineItemRef::Service(quote.service_id.clone()),
                    Quantity::whole(1)?,
                    Some(quote.amount),
                ),
                SubmittedLine::new(
                    LineItemRef::Product("prd-dewormer".to_string()),
                    Quantity::whole(2)?,
                    None,
                ),
            ],
        )
        .await?;

    let receipt = engine
        .record_payment(
            auth,
            NewPayment {
                invoice_id: detail.invoice.id.clone(),
                amount: Money::from_cents(10_000),
                payment_date: today,
                method: PaymentMethod::Card,
                transaction_id: Some("DEMO-0001".to_string()),
            },
        )
        .await?;

    info!(
        invoice_number = %detail.invoice.invoice_number,
        total = %receipt.summary.total_amount,
        balance_due = %receipt.summary.balance_due,
        status = %receipt.summary.status,
        "Demo invoice created"
    );
    Ok(())
}
