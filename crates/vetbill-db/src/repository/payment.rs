//! # Payment Repository
//!
//! Payments are insert-or-delete. A recorded payment is never edited; a
//! mistaken receipt is reversed (deleted) and entered again.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use vetbill_core::{CoreError, Money, Payment, PaymentMethod};

const SELECT_PAYMENT: &str = r#"
    SELECT id, invoice_id, payment_date, amount_cents, method, transaction_id, created_at
    FROM payments
"#;

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: String,
    invoice_id: String,
    payment_date: NaiveDate,
    amount_cents: i64,
    method: PaymentMethod,
    transaction_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<PaymentRow> for Payment {
    fn from(row: PaymentRow) -> Self {
        Payment {
            id: row.id,
            invoice_id: row.invoice_id,
            payment_date: row.payment_date,
            amount: Money::from_cents(row.amount_cents),
            method: row.method,
            transaction_id: row.transaction_id,
            created_at: row.created_at,
        }
    }
}

/// Repository for payments.
#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: SqlitePool,
}

impl PaymentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PaymentRepository { pool }
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Payment>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch(&mut conn, id).await
    }

    pub async fn list_for_invoice(&self, invoice_id: &str) -> DbResult<Vec<Payment>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_for_invoice(&mut conn, invoice_id).await
    }

    // =========================================================================
    // Connection API
    // =========================================================================

    pub async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Payment>> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!("{SELECT_PAYMENT} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row.map(Payment::from))
    }

    /// Like [`Self::fetch`], but a missing payment is `PaymentNotFound`.
    pub async fn fetch_required(conn: &mut SqliteConnection, id: &str) -> DbResult<Payment> {
        Self::fetch(conn, id)
            .await?
            .ok_or_else(|| CoreError::PaymentNotFound(id.to_string()).into())
    }

    /// Payments of one invoice in the order they were received.
    pub async fn fetch_for_invoice(
        conn: &mut SqliteConnection,
        invoice_id: &str,
    ) -> DbResult<Vec<Payment>> {
        let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            "{SELECT_PAYMENT} WHERE invoice_id = ?1 ORDER BY payment_date, created_at, id"
        ))
        .bind(invoice_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows.into_iter().map(Payment::from).collect())
    }

    /// Returns `(count, sum)` of the invoice's payments.
    pub async fn totals_for_invoice(
        conn: &mut SqliteConnection,
        invoice_id: &str,
    ) -> DbResult<(i64, Money)> {
        let (count, sum): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(amount_cents), 0) FROM payments WHERE invoice_id = ?1",
        )
        .bind(invoice_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok((count, Money::from_cents(sum)))
    }

    pub async fn insert(conn: &mut SqliteConnection, payment: &Payment) -> DbResult<()> {
        debug!(
            id = %payment.id,
            invoice_id = %payment.invoice_id,
            amount = %payment.amount,
            "Inserting payment"
        );

        sqlx::query(
            r#"
            INSERT INTO payments (
                id, invoice_id, payment_date, amount_cents, method, transaction_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&payment.id)
        .bind(&payment.invoice_id)
        .bind(payment.payment_date)
        .bind(payment.amount.cents())
        .bind(payment.method)
        .bind(&payment.transaction_id)
        .bind(payment.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn delete(conn: &mut SqliteConnection, id: &str) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM payments WHERE id = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::PaymentNotFound(id.to_string()).into());
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
