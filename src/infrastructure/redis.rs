//! Redis-backed time-series store adapter.
//!
//! Thin semantic wrapper over RedisTimeSeries (`TS.*`) plus the sorted-set
//! and string commands the engine needs. Values travel as strings in both
//! directions so decimal precision is preserved across the client boundary.

use crate::domain::constants::{PRICE_CACHE_LABEL, PRICE_CACHE_LABEL_VALUE, TOKEN_COUNTER_KEY};
use crate::domain::{PriceError, PricePoint, TimeSeriesStore};
use anyhow::Context;
use async_trait::async_trait;
use deadpool_redis::redis::{cmd, from_redis_value, pipe, AsyncCommands, Value};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::{debug, error, info, warn};

pub struct RedisTimeSeries {
    pool: Option<Pool>,
}

impl RedisTimeSeries {
    pub fn new(url: Option<String>) -> Self {
        if let Some(redis_url) = url {
            match Config::from_url(&redis_url).create_pool(Some(Runtime::Tokio1)) {
                Ok(pool) => {
                    info!("Redis connection pool initialized");
                    Self { pool: Some(pool) }
                }
                Err(e) => {
                    error!("Failed to create Redis connection pool: {}", e);
                    Self { pool: None }
                }
            }
        } else {
            info!("Redis URL not provided, price cache disabled");
            Self { pool: None }
        }
    }

    async fn conn(&self) -> anyhow::Result<Connection> {
        let pool = self.pool.as_ref().ok_or(PriceError::StoreUnavailable)?;
        pool.get()
            .await
            .context("failed to get Redis connection from pool")
    }
}

/// Decode one `[timestamp, value]` sample row.
fn decode_sample(row: &Value) -> anyhow::Result<PricePoint> {
    let parts: Vec<Value> = from_redis_value(row).context("malformed time-series sample")?;
    if parts.len() != 2 {
        anyhow::bail!("expected [timestamp, value] sample, got {} elements", parts.len());
    }
    let timestamp_ms: i64 = from_redis_value(&parts[0]).context("non-integer sample timestamp")?;
    let raw: String = from_redis_value(&parts[1]).context("non-string sample value")?;
    let price = Decimal::from_str(&raw)
        .with_context(|| format!("unparseable sample value {raw:?}"))?;
    Ok(PricePoint { timestamp_ms, price })
}

#[async_trait]
impl TimeSeriesStore for RedisTimeSeries {
    fn available(&self) -> bool {
        self.pool.is_some()
    }

    async fn create_series(&self, key: &str, retention_ms: u64) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let created: Result<(), _> = cmd("TS.CREATE")
            .arg(key)
            .arg("RETENTION")
            .arg(retention_ms)
            .arg("DUPLICATE_POLICY")
            .arg("LAST")
            .arg("LABELS")
            .arg(PRICE_CACHE_LABEL)
            .arg(PRICE_CACHE_LABEL_VALUE)
            .query_async(&mut conn)
            .await;
        match created {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("already exists") => {
                debug!("series {} already exists", key);
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("failed to create series {key}")),
        }
    }

    async fn bootstrap_series(&self, keys: &[String], retention_ms: u64) -> anyhow::Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let mut batch = pipe();
        batch.atomic();
        for key in keys {
            batch
                .cmd("TS.CREATE")
                .arg(key)
                .arg("RETENTION")
                .arg(retention_ms)
                .arg("DUPLICATE_POLICY")
                .arg("LAST")
                .arg("LABELS")
                .arg(PRICE_CACHE_LABEL)
                .arg(PRICE_CACHE_LABEL_VALUE)
                .ignore()
                .cmd("ZINCRBY")
                .arg(TOKEN_COUNTER_KEY)
                .arg(1)
                .arg(key)
                .ignore();
        }
        let piped: Result<(), _> = batch.query_async(&mut conn).await;
        if let Err(e) = piped {
            // A pre-existing series fails its TS.CREATE and takes the whole
            // pipeline reply with it. Re-run key by key so one bad token
            // cannot starve the rest of the bootstrap.
            warn!("bootstrap pipeline failed ({}), retrying per key", e);
            for key in keys {
                if let Err(e) = self.create_series(key, retention_ms).await {
                    warn!("failed to create series {}: {:#}", key, e);
                    continue;
                }
                if let Err(e) = self.incr_score(TOKEN_COUNTER_KEY, key, 1).await {
                    warn!("failed to count token {}: {:#}", key, e);
                }
            }
        }
        Ok(())
    }

    async fn add_point(&self, key: &str, point: &PricePoint) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let _: i64 = cmd("TS.ADD")
            .arg(key)
            .arg(point.timestamp_ms)
            .arg(point.price.to_string())
            .query_async(&mut conn)
            .await
            .with_context(|| format!("failed to append to series {key}"))?;
        Ok(())
    }

    async fn multi_add_points(&self, points: &[(String, PricePoint)]) -> anyhow::Result<()> {
        if points.is_empty() {
            return Err(PriceError::NoPrices.into());
        }
        let mut conn = self.conn().await?;
        let mut madd = cmd("TS.MADD");
        for (key, point) in points {
            madd.arg(key).arg(point.timestamp_ms).arg(point.price.to_string());
        }
        let _: Value = madd
            .query_async(&mut conn)
            .await
            .context("failed to append price batch")?;
        Ok(())
    }

    async fn latest(&self, key: &str) -> anyhow::Result<Option<PricePoint>> {
        let mut conn = self.conn().await?;
        // TS.GET errors for a key that does not exist; that error is the
        // read path's signal to admit the token lazily.
        let reply: Value = cmd("TS.GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .with_context(|| format!("failed to read latest point of {key}"))?;
        match reply {
            Value::Bulk(items) if items.is_empty() => Ok(None),
            Value::Nil => Ok(None),
            Value::Bulk(items) if items.len() == 2 => {
                Ok(Some(decode_sample(&Value::Bulk(items))?))
            }
            other => anyhow::bail!("unexpected TS.GET reply: {other:?}"),
        }
    }

    async fn range_first(
        &self,
        key: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> anyhow::Result<Option<PricePoint>> {
        let mut conn = self.conn().await?;
        let reply: Value = cmd("TS.RANGE")
            .arg(key)
            .arg(from_ms)
            .arg(to_ms)
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await
            .with_context(|| format!("failed to range series {key}"))?;
        let rows: Vec<Value> = from_redis_value(&reply).context("malformed TS.RANGE reply")?;
        match rows.first() {
            None => Ok(None),
            Some(row) => Ok(Some(decode_sample(row)?)),
        }
    }

    async fn incr_score(&self, set_key: &str, member: &str, delta: i64) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let _: f64 = cmd("ZINCRBY")
            .arg(set_key)
            .arg(delta)
            .arg(member)
            .query_async(&mut conn)
            .await
            .with_context(|| format!("failed to increment {member} in {set_key}"))?;
        Ok(())
    }

    async fn members_by_score_desc(&self, set_key: &str) -> anyhow::Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = cmd("ZREVRANGE")
            .arg(set_key)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .with_context(|| format!("failed to read sorted set {set_key}"))?;
        Ok(members)
    }

    async fn get_string(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn
            .get(key)
            .await
            .with_context(|| format!("failed to read {key}"))?;
        Ok(value)
    }

    async fn set_string(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .set(key, value)
            .await
            .with_context(|| format!("failed to write {key}"))?;
        Ok(())
    }
}
