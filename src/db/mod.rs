use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::error;

use crate::store::{CursorStore, IntentStore, PendingIntent, Receipt, ReviewFlag};

pub mod models;

pub use models::*;

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

fn lt_to_i64(lt: u64) -> Result<i64> {
    i64::try_from(lt).map_err(|_| eyre!("lt {} does not fit in BIGINT", lt))
}

fn lt_from_i64(lt: i64) -> Result<u64> {
    u64::try_from(lt).map_err(|_| eyre!("negative lt {} in database", lt))
}

// ============================================================================
// Payment intents
// ============================================================================

/// Find the pending intent with exactly this memo
pub async fn find_pending_intent(pool: &PgPool, memo: &str) -> Result<Option<PendingIntent>> {
    let row = sqlx::query_as::<_, PaymentIntentRow>(
        r#"SELECT id, user_id, tier, duration_days, memo,
                  expected_ton::TEXT as expected_ton, expected_usdt::TEXT as expected_usdt,
                  status, created_at
           FROM payment_intents WHERE memo = $1 AND status = 'pending'"#,
    )
    .bind(memo)
    .fetch_optional(pool)
    .await
    .map_err(|e| {
        error!("SQL error finding pending intent: {:?}", e);
        e
    })
    .wrap_err("Failed to find pending intent")?;

    row.map(PendingIntent::try_from).transpose()
}

/// Conditionally complete an intent. Returns whether this call made the
/// transition; a row that is no longer pending is left untouched.
pub async fn complete_intent(pool: &PgPool, intent_id: i64, receipt: &Receipt) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE payment_intents
        SET status = 'completed',
            received_tx_hash = $2,
            received_lt = $3,
            received_asset = $4,
            received_amount = $5::NUMERIC,
            sender_address = $6,
            completed_at = NOW(),
            updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        "#,
    )
    .bind(intent_id)
    .bind(&receipt.tx_hash)
    .bind(lt_to_i64(receipt.lt)?)
    .bind(receipt.asset.as_str())
    .bind(receipt.amount.to_string())
    .bind(&receipt.sender)
    .execute(pool)
    .await
    .wrap_err_with(|| format!("Failed to complete intent {}", intent_id))?;

    Ok(result.rows_affected() == 1)
}

/// Record a held transfer once per (intent, tx) and mark the intent flagged.
/// Returns `false` if the pair was already recorded.
pub async fn insert_review(pool: &PgPool, flag: &ReviewFlag) -> Result<bool> {
    let mut tx = pool.begin().await.wrap_err("Failed to begin transaction")?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO payment_reviews (intent_id, tx_hash, lt, reason, asset, amount,
            sender_address, detail)
        VALUES ($1, $2, $3, $4, $5, $6::NUMERIC, $7, $8)
        ON CONFLICT (intent_id, tx_hash) DO NOTHING
        "#,
    )
    .bind(flag.intent_id)
    .bind(&flag.tx_hash)
    .bind(lt_to_i64(flag.lt)?)
    .bind(flag.reason.as_str())
    .bind(flag.asset.as_str())
    .bind(flag.amount.to_string())
    .bind(&flag.sender)
    .bind(&flag.detail)
    .execute(&mut *tx)
    .await
    .wrap_err("Failed to insert payment review")?
    .rows_affected()
        == 1;

    if inserted {
        sqlx::query(
            r#"
            UPDATE payment_intents
            SET review_reason = $2, flagged_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(flag.intent_id)
        .bind(flag.reason.as_str())
        .execute(&mut *tx)
        .await
        .wrap_err("Failed to flag payment intent")?;
    }

    tx.commit().await.wrap_err("Failed to commit review")?;
    Ok(inserted)
}

pub async fn record_activation_error(pool: &PgPool, intent_id: i64, message: &str) -> Result<()> {
    sqlx::query(
        r#"UPDATE payment_intents SET activation_error = $2, updated_at = NOW() WHERE id = $1"#,
    )
    .bind(intent_id)
    .bind(message)
    .execute(pool)
    .await
    .wrap_err_with(|| format!("Failed to record activation error for intent {}", intent_id))?;

    Ok(())
}

/// `received_lt` of the most recently completed intent
pub async fn get_latest_completed_lt(pool: &PgPool) -> Result<Option<u64>> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"SELECT received_lt FROM payment_intents
           WHERE status = 'completed' AND received_lt IS NOT NULL
           ORDER BY completed_at DESC LIMIT 1"#,
    )
    .fetch_optional(pool)
    .await
    .wrap_err("Failed to get latest completed lt")?;

    row.map(|r| lt_from_i64(r.0)).transpose()
}

pub async fn count_intents(pool: &PgPool) -> Result<IntentCounts> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE status = 'pending') AS pending,
            COUNT(*) FILTER (WHERE status = 'pending' AND review_reason IS NOT NULL) AS flagged,
            COUNT(*) FILTER (WHERE status = 'completed') AS completed,
            COUNT(*) FILTER (WHERE status = 'failed') AS failed
        FROM payment_intents
        "#,
    )
    .fetch_one(pool)
    .await
    .wrap_err("Failed to count payment intents")?;

    Ok(IntentCounts {
        pending: row.get("pending"),
        flagged: row.get("flagged"),
        completed: row.get("completed"),
        failed: row.get("failed"),
    })
}

/// Unresolved reviews whose intent is still pending, oldest first
pub async fn get_open_reviews(pool: &PgPool, limit: i64) -> Result<Vec<ReviewRow>> {
    let rows = sqlx::query_as::<_, ReviewRow>(
        r#"SELECT r.id, r.intent_id, i.memo, i.user_id, i.status AS intent_status,
                  r.tx_hash, r.lt, r.reason, r.asset, r.amount::TEXT AS amount,
                  CASE WHEN r.asset = 'USDT' THEN i.expected_usdt::TEXT
                       ELSE i.expected_ton::TEXT END AS expected_amount,
                  r.sender_address, r.detail, r.created_at
           FROM payment_reviews r
           JOIN payment_intents i ON i.id = r.intent_id
           WHERE r.resolved_at IS NULL AND i.status = 'pending'
           ORDER BY r.created_at ASC
           LIMIT $1"#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .wrap_err("Failed to get open reviews")?;

    Ok(rows)
}

// ============================================================================
// Scan cursors
// ============================================================================

pub async fn get_scan_cursor(pool: &PgPool, address: &str) -> Result<Option<u64>> {
    let row: Option<(i64,)> =
        sqlx::query_as(r#"SELECT last_lt FROM scan_cursors WHERE address = $1"#)
            .bind(address)
            .fetch_optional(pool)
            .await
            .wrap_err("Failed to get scan cursor")?;

    row.map(|r| lt_from_i64(r.0)).transpose()
}

/// Move the cursor forward. The conditional upsert keeps it monotonic even
/// if two writers race.
pub async fn advance_scan_cursor(pool: &PgPool, address: &str, lt: u64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO scan_cursors (address, last_lt)
        VALUES ($1, $2)
        ON CONFLICT (address) DO UPDATE SET last_lt = EXCLUDED.last_lt, updated_at = NOW()
        WHERE scan_cursors.last_lt < EXCLUDED.last_lt
        "#,
    )
    .bind(address)
    .bind(lt_to_i64(lt)?)
    .execute(pool)
    .await
    .wrap_err_with(|| format!("Failed to advance scan cursor for {}", address))?;

    Ok(result.rows_affected() == 1)
}

// ============================================================================
// Store implementation
// ============================================================================

/// Postgres-backed [`IntentStore`] and [`CursorStore`]
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IntentStore for PgStore {
    async fn find_pending_by_memo(&self, memo: &str) -> Result<Option<PendingIntent>> {
        find_pending_intent(&self.pool, memo).await
    }

    async fn complete_intent(&self, intent_id: i64, receipt: &Receipt) -> Result<bool> {
        complete_intent(&self.pool, intent_id, receipt).await
    }

    async fn flag_for_review(&self, flag: &ReviewFlag) -> Result<bool> {
        insert_review(&self.pool, flag).await
    }

    async fn record_activation_error(&self, intent_id: i64, error: &str) -> Result<()> {
        record_activation_error(&self.pool, intent_id, error).await
    }
}

#[async_trait]
impl CursorStore for PgStore {
    async fn get_cursor(&self, address: &str) -> Result<Option<u64>> {
        get_scan_cursor(&self.pool, address).await
    }

    async fn advance_cursor(&self, address: &str, lt: u64) -> Result<bool> {
        advance_scan_cursor(&self.pool, address, lt).await
    }

    async fn latest_completed_lt(&self) -> Result<Option<u64>> {
        get_latest_completed_lt(&self.pool).await
    }
}
