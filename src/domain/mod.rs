//! Domain layer - Core entities and external-system traits.
//!
//! This module defines the domain model for the price cache engine:
//! - `Token`, `Asset` and the price value objects
//! - The `PriceError` taxonomy shared across the engine
//! - Traits for the three external systems the engine talks to: the
//!   time-series store, the chain client, and the asset catalog
//! - The fixed protocol constants

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed protocol constants and store key names.
pub mod constants {
    /// Quote asset code for every price derivation.
    pub const USDC_CODE: &str = "USDC";
    /// Issuing account of the USDC quote asset.
    pub const USDC_ISSUER: &str = "GA5ZSEJYB37JRC5AVCIA5MOP4RHTM335X2KGX3IHOJAPP5RE34K4KZVN";
    /// Notional destination amount (in USDC units) for path queries.
    pub const USD_RECEIVE_VALUE: u32 = 500;

    pub const ONE_DAY_MS: i64 = 86_400_000;
    pub const ONE_MINUTE_MS: i64 = 60_000;
    /// Retention window for every price series.
    pub const RETENTION_MS: u64 = 86_400_000;

    /// Pause between batches of a price update pass.
    pub const BATCH_UPDATE_DELAY_MS: u64 = 5_000;
    /// Hard cap on a single price derivation.
    pub const PRICE_CALCULATION_TIMEOUT_MS: u64 = 10_000;
    /// Tokens derived concurrently per update batch.
    pub const TOKEN_UPDATE_BATCH_SIZE: usize = 150;
    /// Catalog walk stops once this many tokens are collected.
    pub const INITIAL_TOKEN_COUNT: usize = 1_000;
    /// Pause between catalog pages, to respect the explorer's rate limits.
    pub const CATALOG_PAGE_DELAY_MS: u64 = 500;

    /// Sorted set holding the per-token read counters.
    pub const TOKEN_COUNTER_KEY: &str = "token_counter";
    /// String key flipped to `"true"` once initialization has completed.
    pub const PRICE_CACHE_INITIALIZED_KEY: &str = "price_cache_initialized";
    /// Label name attached to every price series at create time.
    pub const PRICE_CACHE_LABEL: &str = "PRICE_CACHE_LABEL";
    /// Label value, used by the surrounding service for group queries.
    pub const PRICE_CACHE_LABEL_VALUE: &str = "ts:price";
}

/// Errors raised by the price cache engine and its collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PriceError {
    /// No store handle; reads resolve to `None`, writes surface this.
    #[error("time-series store is not available")]
    StoreUnavailable,
    /// A price derivation exceeded its hard timeout.
    #[error("price calculation for {0} timed out")]
    Timeout(String),
    /// The path query returned no routes to the quote asset.
    #[error("no payment path from {0} to USDC")]
    NoPaths(String),
    /// Token identifier is neither `XLM` nor a well-formed `CODE:ISSUER`.
    #[error("malformed token identifier: {0}")]
    BadToken(String),
    /// A catalog or chain request failed or returned malformed data.
    #[error("upstream request failed: {0}")]
    Upstream(String),
    /// The popularity set was empty at update time.
    #[error("token counter has no members")]
    EmptyCatalog,
    /// A whole update batch yielded zero prices.
    #[error("batch yielded no prices")]
    NoPrices,
}

/// On-disk spelling of the native asset.
pub const NATIVE_TOKEN: &str = "XLM";

/// Normalized token identifier: the literal `XLM` or `CODE:ISSUER`.
///
/// The input spelling `native` is folded into `XLM` on construction, so a
/// `Token` is always in its on-disk form and doubles as the time-series key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(String);

impl Token {
    /// Build a token from caller input, normalizing `native` to `XLM`.
    pub fn new(raw: &str) -> Self {
        if raw == "native" {
            Token(NATIVE_TOKEN.to_string())
        } else {
            Token(raw.to_string())
        }
    }

    pub fn native() -> Self {
        Token(NATIVE_TOKEN.to_string())
    }

    pub fn is_native(&self) -> bool {
        self.0 == NATIVE_TOKEN
    }

    /// The time-series key is the normalized identifier itself.
    pub fn ts_key(&self) -> &str {
        &self.0
    }

    /// Asset code of the primary source: `XLM` for native, otherwise the
    /// part before the first `:`.
    pub fn code(&self) -> &str {
        match self.0.split_once(':') {
            Some((code, _)) => code,
            None => &self.0,
        }
    }

    /// Source assets for a path query: the token's own asset first, with
    /// native appended as an alternative hop for thinly-traded tokens.
    pub fn source_assets(&self) -> Result<Vec<Asset>, PriceError> {
        if self.is_native() {
            return Ok(vec![Asset::Native]);
        }
        let (code, issuer) = self
            .0
            .split_once(':')
            .ok_or_else(|| PriceError::BadToken(self.0.clone()))?;
        if code.is_empty() || issuer.is_empty() {
            return Err(PriceError::BadToken(self.0.clone()));
        }
        Ok(vec![
            Asset::Credit {
                code: code.to_string(),
                issuer: issuer.to_string(),
            },
            Asset::Native,
        ])
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A chain asset: the native lumen or an issued credit asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Asset {
    Native,
    Credit { code: String, issuer: String },
}

impl Asset {
    /// The fixed USDC quote asset.
    pub fn usdc() -> Self {
        Asset::Credit {
            code: constants::USDC_CODE.to_string(),
            issuer: constants::USDC_ISSUER.to_string(),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Asset::Native => NATIVE_TOKEN,
            Asset::Credit { code, .. } => code,
        }
    }
}

/// One record of a strict-receive path query. `source_asset_code` is absent
/// when the path's source is the native asset.
#[derive(Debug, Clone, Deserialize)]
pub struct PathRecord {
    #[serde(default)]
    pub source_asset_code: Option<String>,
    pub source_amount: String,
}

/// A single sample of a price series: ledger close time and derived price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricePoint {
    /// Close time of the ledger the price was derived against, epoch ms.
    pub timestamp_ms: i64,
    pub price: Decimal,
}

/// Payload returned by the read API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPriceData {
    pub current_price: Decimal,
    /// `None` when no sample exists 24h back, or that sample is zero.
    pub percentage_price_change_24h: Option<Decimal>,
}

/// Time-series store operations used by the engine.
///
/// See `infrastructure::redis::RedisTimeSeries` for the Redis
/// implementation. Implementations must be thread-safe (`Send + Sync`).
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Whether a store handle exists at all. Reads against an unavailable
    /// store resolve to `None` at the engine boundary; writes error.
    fn available(&self) -> bool {
        true
    }

    /// Idempotent series creation; an "already exists" failure from the
    /// store is logged and swallowed.
    async fn create_series(&self, key: &str, retention_ms: u64) -> anyhow::Result<()>;

    /// Pipelined bootstrap: for every key, series creation followed by one
    /// popularity increment, in a single round-trip where the backend
    /// allows it. Per-key failures must not abort the remaining keys.
    async fn bootstrap_series(&self, keys: &[String], retention_ms: u64) -> anyhow::Result<()>;

    /// Append a single point to an existing series.
    async fn add_point(&self, key: &str, point: &PricePoint) -> anyhow::Result<()>;

    /// Atomic multi-series append. An empty batch is a `NoPrices` error,
    /// not a no-op.
    async fn multi_add_points(&self, points: &[(String, PricePoint)]) -> anyhow::Result<()>;

    /// Latest point of a series. `Ok(None)` means the series exists but
    /// holds no points; a series that does not exist at all is an error,
    /// which is what lets the read path fall through to lazy admission.
    async fn latest(&self, key: &str) -> anyhow::Result<Option<PricePoint>>;

    /// First point within the inclusive `[from_ms, to_ms]` window.
    async fn range_first(
        &self,
        key: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> anyhow::Result<Option<PricePoint>>;

    /// Increment a member's score in a sorted set.
    async fn incr_score(&self, set_key: &str, member: &str, delta: i64) -> anyhow::Result<()>;

    /// All members of a sorted set, highest score first.
    async fn members_by_score_desc(&self, set_key: &str) -> anyhow::Result<Vec<String>>;

    /// Plain string read, used by the runner for the initialization flag.
    async fn get_string(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Plain string write.
    async fn set_string(&self, key: &str, value: &str) -> anyhow::Result<()>;
}

/// Chain operations needed for price derivation.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Close time of the most recent ledger, in epoch milliseconds.
    async fn latest_ledger_close_ms(&self) -> Result<i64, PriceError>;

    /// Candidate paths delivering exactly `destination_amount` of
    /// `destination`, payable with any of `sources`.
    async fn strict_receive_paths(
        &self,
        sources: &[Asset],
        destination: &Asset,
        destination_amount: Decimal,
    ) -> Result<Vec<PathRecord>, PriceError>;
}

/// Source of the initial token set.
///
/// Errors are absorbed by implementations; a partial walk yields a partial
/// list, which is acceptable for bootstrap.
#[async_trait]
pub trait TokenCatalog: Send + Sync {
    async fn fetch_all_tokens(&self) -> Vec<Token>;
}
