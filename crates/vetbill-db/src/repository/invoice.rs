//! # Invoice Repository
//!
//! Invoice headers, their lines, and the invoice number sequence.
//!
//! ## Versioned Writes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Every write to an invoice aggregate (header, lines, payments) ends     │
//! │  with exactly one versioned header write:                               │
//! │                                                                         │
//! │    UPDATE invoices SET ..., version = version + 1                       │
//! │    WHERE id = ?1 AND version = ?2        ← version read at start of tx  │
//! │                                                                         │
//! │    rows_affected = 1 → commit                                           │
//! │    rows_affected = 0 → DbError::Conflict, transaction rolled back       │
//! │                                                                         │
//! │  Two concurrent edits of the same invoice: one commits, the other       │
//! │  fails without writing anything.                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Line Order
//! Lines carry a `position`. Updated lines keep theirs, inserted lines are
//! appended after the current maximum, so reads come back in the order the
//! lines were first added.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, warn};
use uuid::Uuid;

use super::parse_decimal;
use crate::error::{DbError, DbResult};
use vetbill_core::{
    CoreError, Invoice, InvoiceLine, InvoiceStatus, ItemType, LineItemRef, LineSyncPlan, Money,
    Quantity, ResolvedLine,
};

const SELECT_INVOICE: &str = r#"
    SELECT id, client_id, consultation_id, invoice_number, issue_date, due_date,
           total_amount_cents, status, version, created_at, updated_at
    FROM invoices
"#;

const SELECT_LINE: &str = r#"
    SELECT id, invoice_id, item_type, item_id, description, quantity,
           unit_price_cents, line_total_cents, created_at, updated_at
    FROM invoice_lines
"#;

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct InvoiceRow {
    id: String,
    client_id: String,
    consultation_id: Option<String>,
    invoice_number: String,
    issue_date: NaiveDate,
    due_date: NaiveDate,
    total_amount_cents: i64,
    status: InvoiceStatus,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<InvoiceRow> for Invoice {
    fn from(row: InvoiceRow) -> Self {
        Invoice {
            id: row.id,
            client_id: row.client_id,
            consultation_id: row.consultation_id,
            invoice_number: row.invoice_number,
            issue_date: row.issue_date,
            due_date: row.due_date,
            total_amount: Money::from_cents(row.total_amount_cents),
            status: row.status,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LineRow {
    id: String,
    invoice_id: String,
    item_type: ItemType,
    item_id: String,
    description: String,
    quantity: String,
    unit_price_cents: i64,
    line_total_cents: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LineRow> for InvoiceLine {
    type Error = DbError;

    fn try_from(row: LineRow) -> DbResult<Self> {
        let quantity = Quantity::new(parse_decimal("quantity", &row.quantity)?)
            .map_err(|e| DbError::corrupt("quantity", e))?;

        Ok(InvoiceLine {
            id: row.id,
            invoice_id: row.invoice_id,
            item: LineItemRef::new(row.item_type, row.item_id),
            description: row.description,
            quantity,
            unit_price: Money::from_cents(row.unit_price_cents),
            line_total: Money::from_cents(row.line_total_cents),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Maps a UNIQUE failure on `invoice_number` to the domain error.
fn number_conflict(err: sqlx::Error, number: &str) -> DbError {
    match DbError::from(err) {
        DbError::UniqueViolation { field, .. } if field.contains("invoice_number") => {
            CoreError::DuplicateInvoiceNumber(number.to_string()).into()
        }
        other => other,
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for invoices and invoice lines.
#[derive(Debug, Clone)]
pub struct InvoiceRepository {
    pool: SqlitePool,
}

impl InvoiceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        InvoiceRepository { pool }
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Invoice>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch(&mut conn, id).await
    }

    pub async fn get_lines(&self, invoice_id: &str) -> DbResult<Vec<InvoiceLine>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_lines(&mut conn, invoice_id).await
    }

    // =========================================================================
    // Header (connection API)
    // =========================================================================

    pub async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Invoice>> {
        let row: Option<InvoiceRow> = sqlx::query_as(&format!("{SELECT_INVOICE} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row.map(Invoice::from))
    }

    /// Like [`Self::fetch`], but a missing invoice is `InvoiceNotFound`.
    pub async fn fetch_required(conn: &mut SqliteConnection, id: &str) -> DbResult<Invoice> {
        Self::fetch(conn, id)
            .await?
            .ok_or_else(|| CoreError::InvoiceNotFound(id.to_string()).into())
    }

    /// True if another invoice already uses `invoice_number`.
    pub async fn number_in_use(
        conn: &mut SqliteConnection,
        invoice_number: &str,
        exclude_id: Option<&str>,
    ) -> DbResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM invoices WHERE invoice_number = ?1 AND id != COALESCE(?2, '')",
        )
        .bind(invoice_number)
        .bind(exclude_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(count > 0)
    }

    pub async fn insert(conn: &mut SqliteConnection, invoice: &Invoice) -> DbResult<()> {
        debug!(id = %invoice.id, number = %invoice.invoice_number, "Inserting invoice");

        sqlx::query(
            r#"
            INSERT INTO invoices (
                id, client_id, consultation_id, invoice_number, issue_date, due_date,
                total_amount_cents, status, version, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&invoice.id)
        .bind(&invoice.client_id)
        .bind(&invoice.consultation_id)
        .bind(&invoice.invoice_number)
        .bind(invoice.issue_date)
        .bind(invoice.due_date)
        .bind(invoice.total_amount.cents())
        .bind(invoice.status)
        .bind(invoice.version)
        .bind(invoice.created_at)
        .bind(invoice.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| number_conflict(e, &invoice.invoice_number))?;

        Ok(())
    }

    /// Writes every header field of `invoice` if the stored version is still
    /// `expected_version`.
    ///
    /// ## Returns
    /// The new version (`expected_version + 1`).
    pub async fn update_header(
        conn: &mut SqliteConnection,
        invoice: &Invoice,
        expected_version: i64,
    ) -> DbResult<i64> {
        debug!(id = %invoice.id, version = expected_version, "Updating invoice header");

        let result = sqlx::query(
            r#"
            UPDATE invoices SET
                client_id = ?3,
                consultation_id = ?4,
                invoice_number = ?5,
                issue_date = ?6,
                due_date = ?7,
                total_amount_cents = ?8,
                status = ?9,
                updated_at = ?10,
                version = version + 1
            WHERE id = ?1 AND version = ?2
            "#,
        )
        .bind(&invoice.id)
        .bind(expected_version)
        .bind(&invoice.client_id)
        .bind(&invoice.consultation_id)
        .bind(&invoice.invoice_number)
        .bind(invoice.issue_date)
        .bind(invoice.due_date)
        .bind(invoice.total_amount.cents())
        .bind(invoice.status)
        .bind(invoice.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| number_conflict(e, &invoice.invoice_number))?;

        if result.rows_affected() == 0 {
            return Err(stale(&invoice.id, expected_version));
        }
        Ok(expected_version + 1)
    }

    /// Changes only the status, with the same version guard as
    /// [`Self::update_header`].
    pub async fn update_status(
        conn: &mut SqliteConnection,
        id: &str,
        status: InvoiceStatus,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            UPDATE invoices SET status = ?3, updated_at = ?4, version = version + 1
            WHERE id = ?1 AND version = ?2
            "#,
        )
        .bind(id)
        .bind(expected_version)
        .bind(status)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(stale(id, expected_version));
        }
        Ok(expected_version + 1)
    }

    /// Deletes the invoice; its lines go with it (ON DELETE CASCADE).
    pub async fn delete(
        conn: &mut SqliteConnection,
        id: &str,
        expected_version: i64,
    ) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM invoices WHERE id = ?1 AND version = ?2")
            .bind(id)
            .bind(expected_version)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(stale(id, expected_version));
        }
        Ok(())
    }

    // =========================================================================
    // Lines (connection API)
    // =========================================================================

    pub async fn fetch_lines(
        conn: &mut SqliteConnection,
        invoice_id: &str,
    ) -> DbResult<Vec<InvoiceLine>> {
        let rows: Vec<LineRow> = sqlx::query_as(&format!(
            "{SELECT_LINE} WHERE invoice_id = ?1 ORDER BY position, created_at, id"
        ))
        .bind(invoice_id)
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter().map(InvoiceLine::try_from).collect()
    }

    /// Appends lines after the current last position.
    ///
    /// ## Returns
    /// The generated line ids, in input order.
    pub async fn insert_lines(
        conn: &mut SqliteConnection,
        invoice_id: &str,
        lines: &[ResolvedLine],
        now: DateTime<Utc>,
    ) -> DbResult<Vec<String>> {
        if lines.is_empty() {
            return Ok(Vec::new());
        }

        let last: Option<i64> =
            sqlx::query_scalar("SELECT MAX(position) FROM invoice_lines WHERE invoice_id = ?1")
                .bind(invoice_id)
                .fetch_one(&mut *conn)
                .await?;
        let first = last.map_or(0, |p| p + 1);

        let mut ids = Vec::with_capacity(lines.len());
        for (offset, line) in lines.iter().enumerate() {
            let id = Uuid::new_v4().to_string();

            sqlx::query(
                r#"
                INSERT INTO invoice_lines (
                    id, invoice_id, item_type, item_id, description, quantity,
                    unit_price_cents, line_total_cents, position, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
                "#,
            )
            .bind(&id)
            .bind(invoice_id)
            .bind(line.item.item_type())
            .bind(line.item.item_id())
            .bind(&line.description)
            .bind(line.quantity.value().to_string())
            .bind(line.unit_price.cents())
            .bind(line.line_total.cents())
            .bind(first + offset as i64)
            .bind(now)
            .execute(&mut *conn)
            .await?;

            ids.push(id);
        }

        debug!(invoice_id = %invoice_id, count = ids.len(), "Inserted invoice lines");
        Ok(ids)
    }

    /// Overwrites one line in place; `id`, `position` and `created_at` stay.
    pub async fn update_line(
        conn: &mut SqliteConnection,
        invoice_id: &str,
        line_id: &str,
        line: &ResolvedLine,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE invoice_lines SET
                item_type = ?3,
                item_id = ?4,
                description = ?5,
                quantity = ?6,
                unit_price_cents = ?7,
                line_total_cents = ?8,
                updated_at = ?9
            WHERE id = ?1 AND invoice_id = ?2
            "#,
        )
        .bind(line_id)
        .bind(invoice_id)
        .bind(line.item.item_type())
        .bind(line.item.item_id())
        .bind(&line.description)
        .bind(line.quantity.value().to_string())
        .bind(line.unit_price.cents())
        .bind(line.line_total.cents())
        .bind(now)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::UnknownLine {
                invoice_id: invoice_id.to_string(),
                line_id: line_id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    pub async fn delete_lines(
        conn: &mut SqliteConnection,
        invoice_id: &str,
        line_ids: &[String],
    ) -> DbResult<u64> {
        let mut removed = 0;
        for line_id in line_ids {
            removed += sqlx::query("DELETE FROM invoice_lines WHERE id = ?1 AND invoice_id = ?2")
                .bind(line_id)
                .bind(invoice_id)
                .execute(&mut *conn)
                .await?
                .rows_affected();
        }
        Ok(removed)
    }

    /// Applies a synchronization plan: deletes, then in-place updates of
    /// changed lines, then inserts. Unchanged lines are not touched.
    pub async fn apply_plan(
        conn: &mut SqliteConnection,
        plan: &LineSyncPlan,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        Self::delete_lines(conn, &plan.invoice_id, &plan.to_delete).await?;

        for update in plan.changed_updates() {
            Self::update_line(conn, &plan.invoice_id, &update.line_id, &update.resolved, now)
                .await?;
        }

        Self::insert_lines(conn, &plan.invoice_id, &plan.to_insert, now).await?;
        Ok(())
    }

    // =========================================================================
    // Number Sequence
    // =========================================================================

    /// Claims the next value of the per-day sequence and formats it as
    /// `<prefix>-YYYYMMDD-NNNN`.
    ///
    /// ## Example
    /// ```text
    /// next_number(conn, "INV", 2026-03-14)  →  "INV-20260314-0001"
    /// next_number(conn, "INV", 2026-03-14)  →  "INV-20260314-0002"
    /// next_number(conn, "INV", 2026-03-15)  →  "INV-20260315-0001"
    /// ```
    pub async fn next_number(
        conn: &mut SqliteConnection,
        prefix: &str,
        date: NaiveDate,
    ) -> DbResult<String> {
        let day = date.format("%Y%m%d").to_string();

        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO invoice_number_counters (prefix, day, last_value)
            VALUES (?1, ?2, 1)
            ON CONFLICT(prefix, day) DO UPDATE SET last_value = last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(prefix)
        .bind(&day)
        .fetch_one(&mut *conn)
        .await?;

        Ok(format!("{prefix}-{day}-{value:04}"))
    }
}

fn stale(id: &str, expected_version: i64) -> DbError {
    warn!(id = %id, expected_version, "Invoice changed concurrently, rejecting write");
    DbError::Conflict(format!(
        "invoice {id} was modified concurrently (expected version {expected_version})"
    ))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use vetbill_core::ErrorKind;
    use crate::pool::{Database, DbConfig};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn invoice(id: &str, number: &str) -> Invoice {
        let now = Utc::now();
        Invoice {
            id: id.into(),
            client_id: "client-1".into(),
            consultation_id: None,
            invoice_number: number.into(),
            issue_date: date(2026, 3, 14),
            due_date: date(2026, 4, 13),
            total_amount: Money::zero(),
            status: InvoiceStatus::Draft,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn product_line(id: &str, cents: i64, qty: i64) -> ResolvedLine {
        let unit_price = Money::from_cents(cents);
        ResolvedLine {
            item: LineItemRef::Product(id.into()),
            description: format!("Product {id}"),
            quantity: Quantity::whole(qty).unwrap(),
            unit_price,
            line_total: unit_price * qty,
        }
    }

    #[tokio::test]
    async fn test_insert_and_fetch_roundtrip() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();

        InvoiceRepository::insert(&mut conn, &invoice("inv-1", "INV-1")).await.unwrap();
        let stored = InvoiceRepository::fetch_required(&mut conn, "inv-1").await.unwrap();

        assert_eq!(stored.invoice_number, "INV-1");
        assert_eq!(stored.status, InvoiceStatus::Draft);
        assert_eq!(stored.issue_date, date(2026, 3, 14));
        assert_eq!(stored.version, 1);

        let missing = InvoiceRepository::fetch_required(&mut conn, "nope").await.unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_duplicate_number_is_domain_error() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();

        InvoiceRepository::insert(&mut conn, &invoice("inv-1", "INV-1")).await.unwrap();
        let err = InvoiceRepository::insert(&mut conn, &invoice("inv-2", "INV-1"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DbError::Core(CoreError::DuplicateInvoiceNumber(_))
        ));
        assert!(InvoiceRepository::number_in_use(&mut conn, "INV-1", None).await.unwrap());
        assert!(!InvoiceRepository::number_in_use(&mut conn, "INV-1", Some("inv-1"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_stale_version_is_conflict() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();

        let mut inv = invoice("inv-1", "INV-1");
        InvoiceRepository::insert(&mut conn, &inv).await.unwrap();

        inv.client_id = "client-2".into();
        let version = InvoiceRepository::update_header(&mut conn, &inv, 1).await.unwrap();
        assert_eq!(version, 2);

        let err = InvoiceRepository::update_header(&mut conn, &inv, 1).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err =
            InvoiceRepository::update_status(&mut conn, "inv-1", InvoiceStatus::Sent, 1, Utc::now())
                .await
                .unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_lines_keep_position_order() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        InvoiceRepository::insert(&mut conn, &invoice("inv-1", "INV-1")).await.unwrap();

        let now = Utc::now();
        let first = InvoiceRepository::insert_lines(
            &mut conn,
            "inv-1",
            &[product_line("a", 100, 1), product_line("b", 200, 2)],
            now,
        )
        .await
        .unwrap();
        InvoiceRepository::insert_lines(&mut conn, "inv-1", &[product_line("c", 300, 3)], now)
            .await
            .unwrap();

        InvoiceRepository::delete_lines(&mut conn, "inv-1", &[first[0].clone()])
            .await
            .unwrap();
        InvoiceRepository::update_line(
            &mut conn,
            "inv-1",
            &first[1],
            &product_line("b", 250, 2),
            now,
        )
        .await
        .unwrap();

        let lines = InvoiceRepository::fetch_lines(&mut conn, "inv-1").await.unwrap();
        let items: Vec<&str> = lines.iter().map(|l| l.item.item_id()).collect();
        assert_eq!(items, vec!["b", "c"]);
        assert_eq!(lines[0].id, first[1]);
        assert_eq!(lines[0].unit_price, Money::from_cents(250));
        assert_eq!(lines[0].line_total, Money::from_cents(500));
    }

    #[tokio::test]
    async fn test_update_line_of_other_invoice_is_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        InvoiceRepository::insert(&mut conn, &invoice("inv-1", "INV-1")).await.unwrap();
        InvoiceRepository::insert(&mut conn, &invoice("inv-2", "INV-2")).await.unwrap();

        let now = Utc::now();
        let ids =
            InvoiceRepository::insert_lines(&mut conn, "inv-1", &[product_line("a", 100, 1)], now)
                .await
                .unwrap();

        let moved = product_line("a", 1, 1);
        let err = InvoiceRepository::update_line(&mut conn, "inv-2", &ids[0], &moved, now)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::UnknownLine { .. })));
    }

    #[tokio::test]
    async fn test_number_sequence_is_per_day() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();

        let a = InvoiceRepository::next_number(&mut conn, "INV", date(2026, 3, 14)).await.unwrap();
        let b = InvoiceRepository::next_number(&mut conn, "INV", date(2026, 3, 14)).await.unwrap();
        let c = InvoiceRepository::next_number(&mut conn, "INV", date(2026, 3, 15)).await.unwrap();
        let d = InvoiceRepository::next_number(&mut conn, "VET", date(2026, 3, 14)).await.unwrap();

        assert_eq!(a, "INV-20260314-0001");
        assert_eq!(b, "INV-20260314-0002");
        assert_eq!(c, "INV-20260315-0001");
        assert_eq!(d, "VET-20260314-0001");
    }
}
