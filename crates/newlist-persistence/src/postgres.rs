//! Postgres store.
//!
//! The `listings_symbol_listed_at_key` unique constraint is the dedup
//! authority; concurrent inserts of the same key race inside Postgres and
//! exactly one wins.

use chrono::{DateTime, Utc};
use newlist_core::{
    ClientOrderId, ListingKey, ListingRecord, TradeAttempt, TradeConfig, TradeConfigUpdate,
};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{PersistenceError, PersistenceResult};
use crate::store::{
    BoxFuture, ConfigStore, ExposureSource, ListingStore, TradeQuery, TradeStats, TradeStore,
};

/// Postgres-backed implementation of every store trait.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and run embedded migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> PersistenceResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        info!(max_connections, "Connected to Postgres, migrations applied");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn parse_field<T: std::str::FromStr<Err = newlist_core::CoreError>>(
    raw: &str,
) -> PersistenceResult<T> {
    raw.parse::<T>().map_err(PersistenceError::from)
}

fn listing_from_row(row: &PgRow) -> PersistenceResult<ListingRecord> {
    let source: String = row.try_get("source")?;
    Ok(ListingRecord {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        listed_at: row.try_get("listed_at")?,
        source: parse_field(&source)?,
        created_at: row.try_get("created_at")?,
    })
}

fn trade_from_row(row: &PgRow) -> PersistenceResult<TradeAttempt> {
    let side: String = row.try_get("side")?;
    let mode: String = row.try_get("mode")?;
    let status: String = row.try_get("status")?;
    let latency_ms: i64 = row.try_get("latency_ms")?;
    let retries: i32 = row.try_get("retries")?;
    let client_order_id: String = row.try_get("client_order_id")?;

    Ok(TradeAttempt {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        side: parse_field(&side)?,
        quote_qty: row.try_get("quote_qty")?,
        base_qty: row.try_get("base_qty")?,
        latency_ms: latency_ms.max(0) as u64,
        mode: parse_field(&mode)?,
        status: parse_field(&status)?,
        error_reason: row.try_get("error_reason")?,
        exchange_order_id: row.try_get("exchange_order_id")?,
        client_order_id: ClientOrderId::from_string(client_order_id),
        retries: retries.max(0) as u32,
        created_at: row.try_get("created_at")?,
    })
}

fn config_from_row(row: &PgRow) -> PersistenceResult<TradeConfig> {
    Ok(TradeConfig {
        max_trade_amount: row.try_get("max_trade_amount")?,
        max_position_amount: row.try_get("max_position_amount")?,
        auto_trade_enabled: row.try_get("auto_trade_enabled")?,
        high_value_threshold: row.try_get("high_value_threshold")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const TRADE_COLUMNS: &str = "id, symbol, side, quote_qty, base_qty, latency_ms, mode, status, \
     error_reason, exchange_order_id, client_order_id, retries, created_at";

const CONFIG_COLUMNS: &str =
    "max_trade_amount, max_position_amount, auto_trade_enabled, high_value_threshold, updated_at";

impl ListingStore for PgStore {
    fn insert_listing<'a>(
        &'a self,
        record: &'a ListingRecord,
    ) -> BoxFuture<'a, PersistenceResult<()>> {
        Box::pin(async move {
            sqlx::query(
                r#"
                INSERT INTO listings (id, symbol, listed_at, source, created_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(record.id)
            .bind(&record.symbol)
            .bind(record.listed_at)
            .bind(record.source.as_str())
            .bind(record.created_at)
            .execute(&self.pool)
            .await
            .map_err(PersistenceError::from_write)?;

            debug!(symbol = %record.symbol, id = %record.id, "Inserted listing");
            Ok(())
        })
    }

    fn find_listing<'a>(
        &'a self,
        key: &'a ListingKey,
    ) -> BoxFuture<'a, PersistenceResult<Option<ListingRecord>>> {
        Box::pin(async move {
            let row = sqlx::query(
                r#"
                SELECT id, symbol, listed_at, source, created_at
                FROM listings
                WHERE symbol = $1 AND listed_at = $2
                "#,
            )
            .bind(key.symbol())
            .bind(key.listed_at())
            .fetch_optional(&self.pool)
            .await?;

            row.as_ref().map(listing_from_row).transpose()
        })
    }

    fn recent_listings(&self, limit: usize) -> BoxFuture<'_, PersistenceResult<Vec<ListingRecord>>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r#"
                SELECT id, symbol, listed_at, source, created_at
                FROM listings
                ORDER BY created_at DESC
                LIMIT $1
                "#,
            )
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

            rows.iter().map(listing_from_row).collect()
        })
    }

    fn count_listings(&self) -> BoxFuture<'_, PersistenceResult<u64>> {
        Box::pin(async move {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM listings")
                .fetch_one(&self.pool)
                .await?;
            Ok(count.max(0) as u64)
        })
    }
}

impl TradeStore for PgStore {
    fn insert_trade<'a>(
        &'a self,
        attempt: &'a TradeAttempt,
    ) -> BoxFuture<'a, PersistenceResult<()>> {
        Box::pin(async move {
            sqlx::query(
                r#"
                INSERT INTO trades (
                    id, symbol, side, quote_qty, base_qty, latency_ms, mode, status,
                    error_reason, exchange_order_id, client_order_id, retries, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(attempt.id)
            .bind(&attempt.symbol)
            .bind(attempt.side.as_str())
            .bind(attempt.quote_qty)
            .bind(attempt.base_qty)
            .bind(attempt.latency_ms as i64)
            .bind(attempt.mode.as_str())
            .bind(attempt.status.as_str())
            .bind(&attempt.error_reason)
            .bind(&attempt.exchange_order_id)
            .bind(attempt.client_order_id.as_str())
            .bind(attempt.retries as i32)
            .bind(attempt.created_at)
            .execute(&self.pool)
            .await
            .map_err(PersistenceError::from_write)?;
            Ok(())
        })
    }

    fn finalize_trade<'a>(
        &'a self,
        attempt: &'a TradeAttempt,
    ) -> BoxFuture<'a, PersistenceResult<bool>> {
        Box::pin(async move {
            let result = sqlx::query(
                r#"
                UPDATE trades SET
                    status = $2,
                    base_qty = $3,
                    latency_ms = $4,
                    error_reason = $5,
                    exchange_order_id = $6,
                    retries = $7,
                    updated_at = NOW()
                WHERE id = $1 AND status = 'pending'
                "#,
            )
            .bind(attempt.id)
            .bind(attempt.status.as_str())
            .bind(attempt.base_qty)
            .bind(attempt.latency_ms as i64)
            .bind(&attempt.error_reason)
            .bind(&attempt.exchange_order_id)
            .bind(attempt.retries as i32)
            .execute(&self.pool)
            .await?;

            Ok(result.rows_affected() == 1)
        })
    }

    fn list_trades<'a>(
        &'a self,
        query: &'a TradeQuery,
    ) -> BoxFuture<'a, PersistenceResult<Vec<TradeAttempt>>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {TRADE_COLUMNS} FROM trades \
                 WHERE ($1::TEXT IS NULL OR mode = $1) AND ($2::TEXT IS NULL OR status = $2) \
                 ORDER BY created_at DESC LIMIT $3 OFFSET $4"
            );
            let rows = sqlx::query(&sql)
                .bind(query.mode.map(|m| m.as_str()))
                .bind(query.status.map(|s| s.as_str()))
                .bind(query.limit as i64)
                .bind(query.offset as i64)
                .fetch_all(&self.pool)
                .await?;

            rows.iter().map(trade_from_row).collect()
        })
    }

    fn trade_stats(&self) -> BoxFuture<'_, PersistenceResult<TradeStats>> {
        Box::pin(async move {
            let row = sqlx::query(
                r#"
                SELECT
                    COUNT(*) FILTER (WHERE status <> 'pending') AS terminal,
                    COUNT(*) FILTER (WHERE status = 'filled') AS filled,
                    COUNT(*) FILTER (WHERE status = 'rejected') AS rejected,
                    COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                    (AVG(latency_ms) FILTER (WHERE status = 'filled' AND mode = 'live'))::DOUBLE PRECISION
                        AS avg_live_latency_ms
                FROM trades
                "#,
            )
            .fetch_one(&self.pool)
            .await?;

            let count = |name: &str| -> PersistenceResult<u64> {
                let value: i64 = row.try_get(name)?;
                Ok(value.max(0) as u64)
            };

            Ok(TradeStats {
                terminal: count("terminal")?,
                filled: count("filled")?,
                rejected: count("rejected")?,
                failed: count("failed")?,
                avg_live_latency_ms: row.try_get("avg_live_latency_ms")?,
            })
        })
    }
}

impl ExposureSource for PgStore {
    fn open_buy_exposure(&self) -> BoxFuture<'_, PersistenceResult<Decimal>> {
        Box::pin(async move {
            let exposure: Decimal = sqlx::query_scalar(
                r#"
                SELECT COALESCE(SUM(GREATEST(net, 0)), 0)
                FROM (
                    SELECT symbol,
                           SUM(CASE WHEN side = 'buy' THEN quote_qty ELSE -quote_qty END) AS net
                    FROM trades
                    WHERE status = 'filled' AND mode = 'live'
                    GROUP BY symbol
                ) per_symbol
                "#,
            )
            .fetch_one(&self.pool)
            .await?;
            Ok(exposure)
        })
    }
}

impl ConfigStore for PgStore {
    fn load_config(&self) -> BoxFuture<'_, PersistenceResult<Option<TradeConfig>>> {
        Box::pin(async move {
            let sql = format!("SELECT {CONFIG_COLUMNS} FROM trade_config WHERE id = 1");
            let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
            row.as_ref().map(config_from_row).transpose()
        })
    }

    fn update_config<'a>(
        &'a self,
        update: &'a TradeConfigUpdate,
    ) -> BoxFuture<'a, PersistenceResult<TradeConfig>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;

            let select = format!("SELECT {CONFIG_COLUMNS} FROM trade_config WHERE id = 1 FOR UPDATE");
            let row = sqlx::query(&select)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| PersistenceError::NotFound("trade config".to_string()))?;
            let current = config_from_row(&row)?;
            // Dropping `tx` on the error path rolls back.
            let merged = current.merged(update)?;

            sqlx::query(
                r#"
                UPDATE trade_config SET
                    max_trade_amount = $1,
                    max_position_amount = $2,
                    auto_trade_enabled = $3,
                    high_value_threshold = $4,
                    updated_at = $5
                WHERE id = 1
                "#,
            )
            .bind(merged.max_trade_amount)
            .bind(merged.max_position_amount)
            .bind(merged.auto_trade_enabled)
            .bind(merged.high_value_threshold)
            .bind(merged.updated_at)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            info!(
                max_trade_amount = %merged.max_trade_amount,
                max_position_amount = %merged.max_position_amount,
                auto_trade_enabled = merged.auto_trade_enabled,
                "Trade config updated"
            );
            Ok(merged)
        })
    }

    fn seed_config<'a>(
        &'a self,
        initial: &'a TradeConfig,
    ) -> BoxFuture<'a, PersistenceResult<TradeConfig>> {
        Box::pin(async move {
            initial.validate()?;
            let now: DateTime<Utc> = Utc::now();
            sqlx::query(
                r#"
                INSERT INTO trade_config (
                    id, max_trade_amount, max_position_amount, auto_trade_enabled,
                    high_value_threshold, updated_at
                )
                VALUES (1, $1, $2, $3, $4, $5)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(initial.max_trade_amount)
            .bind(initial.max_position_amount)
            .bind(initial.auto_trade_enabled)
            .bind(initial.high_value_threshold)
            .bind(now)
            .execute(&self.pool)
            .await?;

            self.load_config()
                .await?
                .ok_or_else(|| PersistenceError::NotFound("trade config".to_string()))
        })
    }
}
