//! Price cache engine.
//!
//! Orchestrates the cache lifecycle over the time-series store:
//! initialization from the asset catalog, popularity-ordered batch updates,
//! lazy admission of unseen tokens on read, and the read path assembling
//! the current price with its 24h change.

use crate::application::price_calculator::PriceCalculator;
use crate::domain::constants::{
    BATCH_UPDATE_DELAY_MS, ONE_DAY_MS, ONE_MINUTE_MS, PRICE_CACHE_INITIALIZED_KEY, RETENTION_MS,
    TOKEN_COUNTER_KEY, TOKEN_UPDATE_BATCH_SIZE,
};
use crate::domain::{PriceError, PricePoint, TimeSeriesStore, Token, TokenCatalog, TokenPriceData};
use futures::StreamExt;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cache engine over the time-series store, the price deriver and the
/// asset catalog.
///
/// Concurrency contract: any number of concurrent `get_price` callers is
/// fine, but the driver must not overlap `update_prices` passes; the
/// engine does not serialize them internally.
pub struct PriceCacheService {
    store: Arc<dyn TimeSeriesStore>,
    catalog: Arc<dyn TokenCatalog>,
    calculator: PriceCalculator,
}

impl PriceCacheService {
    pub fn new(
        store: Arc<dyn TimeSeriesStore>,
        catalog: Arc<dyn TokenCatalog>,
        calculator: PriceCalculator,
    ) -> Self {
        Self {
            store,
            catalog,
            calculator,
        }
    }

    /// One-time bootstrap: walk the catalog, create a series and count one
    /// popularity point per token, then raise the initialization flag.
    ///
    /// Prices are deliberately not populated here; the first update pass
    /// fills them, which keeps bootstrap cost bounded.
    pub async fn init_price_cache(&self) -> anyhow::Result<()> {
        let tokens = self.catalog.fetch_all_tokens().await;
        info!(count = tokens.len(), "bootstrapping price series from asset catalog");

        let keys: Vec<String> = tokens.iter().map(|t| t.ts_key().to_string()).collect();
        self.store.bootstrap_series(&keys, RETENTION_MS).await?;
        self.store
            .set_string(PRICE_CACHE_INITIALIZED_KEY, "true")
            .await?;
        info!("price cache initialized");
        Ok(())
    }

    /// One full update pass over every tracked token, most-read first.
    ///
    /// Tokens are processed in batches of `TOKEN_UPDATE_BATCH_SIZE`, all
    /// derivations within a batch in flight concurrently, with a pause
    /// between batches to cap sustained load on the path-finding endpoint.
    /// Per-token failures are logged and skipped; a batch with zero
    /// successes aborts the pass, since that points at a systemic upstream
    /// problem rather than individual illiquid tokens.
    pub async fn update_prices(&self) -> anyhow::Result<()> {
        let keys = self.store.members_by_score_desc(TOKEN_COUNTER_KEY).await?;
        if keys.is_empty() {
            return Err(PriceError::EmptyCatalog.into());
        }

        let batches: Vec<&[String]> = keys.chunks(TOKEN_UPDATE_BATCH_SIZE).collect();
        let total = batches.len();
        info!(tokens = keys.len(), batches = total, "starting price update pass");

        for (index, batch) in batches.into_iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(Duration::from_millis(BATCH_UPDATE_DELAY_MS)).await;
            }
            self.update_batch(index + 1, total, batch).await?;
        }
        Ok(())
    }

    async fn update_batch(
        &self,
        batch_no: usize,
        total: usize,
        keys: &[String],
    ) -> anyhow::Result<()> {
        let results: Vec<(String, Result<PricePoint, PriceError>)> =
            futures::stream::iter(keys.iter().cloned())
                .map(|key| {
                    let calculator = &self.calculator;
                    async move {
                        let result = calculator.calculate_price_in_usd(&Token::new(&key)).await;
                        (key, result)
                    }
                })
                .buffer_unordered(TOKEN_UPDATE_BATCH_SIZE)
                .collect()
                .await;

        let mut points = Vec::with_capacity(results.len());
        for (key, result) in results {
            match result {
                Ok(point) => points.push((key, point)),
                Err(e) => {
                    warn!("skipping {} in this pass: {}", key, e);
                    metrics::counter!("price_updates_total", "result" => "skipped").increment(1);
                }
            }
        }

        if points.is_empty() {
            return Err(PriceError::NoPrices.into());
        }
        self.store.multi_add_points(&points).await?;
        metrics::counter!("price_updates_total", "result" => "written")
            .increment(points.len() as u64);
        info!(
            batch = batch_no,
            total,
            written = points.len(),
            "price batch written"
        );
        Ok(())
    }

    /// Current USD price and 24h change for a token.
    ///
    /// Never fails toward the caller: a token without a derivable price
    /// yields `None`, and a known price with no day-old sample yields a
    /// `None` change. Both `native` and `XLM` spellings are accepted.
    pub async fn get_price(&self, token: &str) -> Option<TokenPriceData> {
        let token = Token::new(token);
        match self.price_for(&token).await {
            Ok(Some(data)) => {
                metrics::counter!("price_cache_reads_total", "result" => "hit").increment(1);
                Some(data)
            }
            Ok(None) => {
                metrics::counter!("price_cache_reads_total", "result" => "miss").increment(1);
                None
            }
            Err(e) => {
                warn!("price lookup for {} failed: {:#}", token, e);
                metrics::counter!("price_cache_reads_total", "result" => "error").increment(1);
                None
            }
        }
    }

    async fn price_for(&self, token: &Token) -> anyhow::Result<Option<TokenPriceData>> {
        if !self.store.available() {
            return Ok(None);
        }
        let key = token.ts_key();

        let latest = match self.store.latest(key).await {
            Ok(latest) => latest,
            Err(e) => {
                // No series for this token yet; first sight of it.
                debug!("admitting {} on read miss: {:#}", token, e);
                return Ok(Some(self.admit_token(token).await?));
            }
        };
        // An existing but empty series is left for the next update tick.
        let Some(latest) = latest else {
            return Ok(None);
        };

        let day_ago = latest.timestamp_ms - ONE_DAY_MS;
        let old = self
            .store
            .range_first(key, day_ago, day_ago + ONE_MINUTE_MS)
            .await?;
        let delta = old.and_then(|old| percentage_change(latest.price, old.price));

        self.store.incr_score(TOKEN_COUNTER_KEY, key, 1).await?;
        Ok(Some(TokenPriceData {
            current_price: latest.price,
            percentage_price_change_24h: delta,
        }))
    }

    /// Lazy admission of a previously-unseen token.
    ///
    /// The price is derived first: a token that cannot be priced leaves no
    /// trace in the store or the popularity set. Two racing admissions are
    /// harmless: series creation is idempotent, the later point wins under
    /// the LAST duplicate policy, and both popularity increments stand.
    async fn admit_token(&self, token: &Token) -> anyhow::Result<TokenPriceData> {
        let point = self.calculator.calculate_price_in_usd(token).await?;
        let key = token.ts_key();
        self.store.create_series(key, RETENTION_MS).await?;
        self.store.incr_score(TOKEN_COUNTER_KEY, key, 1).await?;
        self.store.add_point(key, &point).await?;
        info!("admitted {} at {}", token, point.price);
        Ok(TokenPriceData {
            current_price: point.price,
            percentage_price_change_24h: None,
        })
    }
}

/// Percent change from `old` to `latest`; `None` when the old value is
/// zero, so an unknowable change is never reported as a number.
pub fn percentage_change(latest: Decimal, old: Decimal) -> Option<Decimal> {
    if old.is_zero() {
        return None;
    }
    Some((latest - old) / old * Decimal::from(100))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn percentage_change_is_relative_to_the_old_value() {
        assert_eq!(percentage_change(dec!(0.12), dec!(0.10)), Some(dec!(20)));
        assert_eq!(percentage_change(dec!(0.08), dec!(0.10)), Some(dec!(-20)));
    }

    #[test]
    fn percentage_change_from_zero_is_undefined() {
        assert_eq!(percentage_change(dec!(0.12), dec!(0)), None);
    }

    #[test]
    fn batches_cover_all_tokens_in_order() {
        let keys: Vec<String> = (0..400).map(|i| format!("T{i}:G")).collect();
        let batches: Vec<&[String]> = keys.chunks(TOKEN_UPDATE_BATCH_SIZE).collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 150);
        assert_eq!(batches[2].len(), 100);
        let flattened: Vec<String> = batches.concat();
        assert_eq!(flattened, keys);
    }
}
