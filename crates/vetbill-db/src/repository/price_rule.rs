//! # Price Rule Repository
//!
//! Persistence for the price rule catalog.
//!
//! Rules are never deleted. Disabling a rule sets `is_active = 0` so that
//! historical quotes can still be traced back to the rule that produced them.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use super::parse_decimal;
use crate::error::{DbError, DbResult};
use vetbill_core::{CoreError, CurrencyCode, Money, PriceRule, WeightKg};

const SELECT_RULE: &str = r#"
    SELECT id, service_id, species_id, weight_min_kg, weight_max_kg,
           amount_cents, currency, is_active, created_at, updated_at
    FROM price_rules
"#;

#[derive(Debug, sqlx::FromRow)]
struct PriceRuleRow {
    id: String,
    service_id: String,
    species_id: Option<String>,
    weight_min_kg: Option<String>,
    weight_max_kg: Option<String>,
    amount_cents: i64,
    currency: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn parse_weight(column: &str, raw: Option<String>) -> DbResult<Option<WeightKg>> {
    raw.map(|s| {
        let value = parse_decimal(column, &s)?;
        WeightKg::new(value).map_err(|e| DbError::corrupt(column, e))
    })
    .transpose()
}

impl TryFrom<PriceRuleRow> for PriceRule {
    type Error = DbError;

    fn try_from(row: PriceRuleRow) -> DbResult<Self> {
        Ok(PriceRule {
            weight_min_kg: parse_weight("weight_min_kg", row.weight_min_kg)?,
            weight_max_kg: parse_weight("weight_max_kg", row.weight_max_kg)?,
            currency: CurrencyCode::parse(&row.currency)
                .map_err(|e| DbError::corrupt("currency", e))?,
            id: row.id,
            service_id: row.service_id,
            species_id: row.species_id,
            amount: Money::from_cents(row.amount_cents),
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_rules(rows: Vec<PriceRuleRow>) -> DbResult<Vec<PriceRule>> {
    rows.into_iter().map(PriceRule::try_from).collect()
}

/// Repository for price rules.
#[derive(Debug, Clone)]
pub struct PriceRuleRepository {
    pool: SqlitePool,
}

impl PriceRuleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PriceRuleRepository { pool }
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<PriceRule>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch(&mut conn, id).await
    }

    /// All rules for a service, inactive ones included.
    pub async fn list_for_service(&self, service_id: &str) -> DbResult<Vec<PriceRule>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_for_service(&mut conn, service_id, false).await
    }

    // =========================================================================
    // Connection API
    // =========================================================================

    pub async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<PriceRule>> {
        let row: Option<PriceRuleRow> = sqlx::query_as(&format!("{SELECT_RULE} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        row.map(PriceRule::try_from).transpose()
    }

    /// Rules of one service ordered by id.
    pub async fn fetch_for_service(
        conn: &mut SqliteConnection,
        service_id: &str,
        active_only: bool,
    ) -> DbResult<Vec<PriceRule>> {
        let sql = if active_only {
            format!("{SELECT_RULE} WHERE service_id = ?1 AND is_active = 1 ORDER BY id")
        } else {
            format!("{SELECT_RULE} WHERE service_id = ?1 ORDER BY id")
        };

        let rows: Vec<PriceRuleRow> = sqlx::query_as(&sql)
            .bind(service_id)
            .fetch_all(&mut *conn)
            .await?;

        debug!(service_id = %service_id, count = rows.len(), "Fetched price rules");
        into_rules(rows)
    }

    pub async fn insert(conn: &mut SqliteConnection, rule: &PriceRule) -> DbResult<()> {
        debug!(id = %rule.id, service_id = %rule.service_id, "Inserting price rule");

        sqlx::query(
            r#"
            INSERT INTO price_rules (
                id, service_id, species_id, weight_min_kg, weight_max_kg,
                amount_cents, currency, is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&rule.id)
        .bind(&rule.service_id)
        .bind(&rule.species_id)
        .bind(rule.weight_min_kg.map(|w| w.value().to_string()))
        .bind(rule.weight_max_kg.map(|w| w.value().to_string()))
        .bind(rule.amount.cents())
        .bind(rule.currency.as_str())
        .bind(rule.is_active)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Sets `is_active`. Unknown ids are `PriceRuleNotFound`.
    pub async fn set_active(
        conn: &mut SqliteConnection,
        id: &str,
        active: bool,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE price_rules SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(active)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::PriceRuleNotFound(id.to_string()).into());
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
