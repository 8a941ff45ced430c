//! Engine scenario tests over in-memory store/chain/catalog doubles.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use wallet_price_cache::application::{PriceCacheService, PriceCalculator};
use wallet_price_cache::domain::constants::{
    PRICE_CACHE_INITIALIZED_KEY, TOKEN_COUNTER_KEY,
};
use wallet_price_cache::domain::{
    Asset, ChainClient, PathRecord, PriceError, PricePoint, TimeSeriesStore, Token, TokenCatalog,
    TokenPriceData,
};

const T: i64 = 1_700_000_000_000;
const DAY_MS: i64 = 86_400_000;

#[derive(Default)]
struct MemoryStore {
    unavailable: bool,
    series: Mutex<HashMap<String, Vec<PricePoint>>>,
    scores: Mutex<HashMap<String, i64>>,
    strings: Mutex<HashMap<String, String>>,
    madd_calls: Mutex<Vec<Vec<(String, PricePoint)>>>,
}

impl MemoryStore {
    fn with_series(self, key: &str, points: &[(i64, Decimal)]) -> Self {
        self.series.lock().unwrap().insert(
            key.to_string(),
            points
                .iter()
                .map(|(timestamp_ms, price)| PricePoint {
                    timestamp_ms: *timestamp_ms,
                    price: *price,
                })
                .collect(),
        );
        self
    }

    fn with_score(self, member: &str, score: i64) -> Self {
        self.scores.lock().unwrap().insert(member.to_string(), score);
        self
    }

    fn score(&self, member: &str) -> Option<i64> {
        self.scores.lock().unwrap().get(member).copied()
    }

    fn points(&self, key: &str) -> Vec<PricePoint> {
        self.series.lock().unwrap().get(key).cloned().unwrap_or_default()
    }

    fn has_series(&self, key: &str) -> bool {
        self.series.lock().unwrap().contains_key(key)
    }

    fn apply_point(points: &mut Vec<PricePoint>, point: PricePoint) {
        // LAST duplicate policy: an equal-timestamp append overwrites.
        if let Some(existing) = points
            .iter_mut()
            .find(|p| p.timestamp_ms == point.timestamp_ms)
        {
            *existing = point;
        } else {
            points.push(point);
            points.sort_by_key(|p| p.timestamp_ms);
        }
    }
}

#[async_trait]
impl TimeSeriesStore for MemoryStore {
    fn available(&self) -> bool {
        !self.unavailable
    }

    async fn create_series(&self, key: &str, _retention_ms: u64) -> anyhow::Result<()> {
        self.series
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default();
        Ok(())
    }

    async fn bootstrap_series(&self, keys: &[String], retention_ms: u64) -> anyhow::Result<()> {
        for key in keys {
            self.create_series(key, retention_ms).await?;
            self.incr_score(TOKEN_COUNTER_KEY, key, 1).await?;
        }
        Ok(())
    }

    async fn add_point(&self, key: &str, point: &PricePoint) -> anyhow::Result<()> {
        let mut series = self.series.lock().unwrap();
        Self::apply_point(series.entry(key.to_string()).or_default(), point.clone());
        Ok(())
    }

    async fn multi_add_points(&self, points: &[(String, PricePoint)]) -> anyhow::Result<()> {
        if points.is_empty() {
            return Err(PriceError::NoPrices.into());
        }
        self.madd_calls.lock().unwrap().push(points.to_vec());
        let mut series = self.series.lock().unwrap();
        for (key, point) in points {
            Self::apply_point(series.entry(key.clone()).or_default(), point.clone());
        }
        Ok(())
    }

    async fn latest(&self, key: &str) -> anyhow::Result<Option<PricePoint>> {
        match self.series.lock().unwrap().get(key) {
            None => Err(anyhow::anyhow!("TSDB: the key does not exist")),
            Some(points) => Ok(points.last().cloned()),
        }
    }

    async fn range_first(
        &self,
        key: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> anyhow::Result<Option<PricePoint>> {
        Ok(self
            .series
            .lock()
            .unwrap()
            .get(key)
            .and_then(|points| {
                points
                    .iter()
                    .find(|p| p.timestamp_ms >= from_ms && p.timestamp_ms <= to_ms)
                    .cloned()
            }))
    }

    async fn incr_score(&self, _set_key: &str, member: &str, delta: i64) -> anyhow::Result<()> {
        *self
            .scores
            .lock()
            .unwrap()
            .entry(member.to_string())
            .or_insert(0) += delta;
        Ok(())
    }

    async fn members_by_score_desc(&self, _set_key: &str) -> anyhow::Result<Vec<String>> {
        let scores = self.scores.lock().unwrap();
        let mut members: Vec<(String, i64)> =
            scores.iter().map(|(k, v)| (k.clone(), *v)).collect();
        members.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(members.into_iter().map(|(k, _)| k).collect())
    }

    async fn get_string(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.strings.lock().unwrap().get(key).cloned())
    }

    async fn set_string(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.strings
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

enum PathOutcome {
    Paths(Vec<PathRecord>),
    Hang,
}

/// Chain double keyed by the primary source asset code. Codes without a
/// programmed outcome yield an empty path set.
struct ScriptedChain {
    close_ms: i64,
    outcomes: HashMap<String, PathOutcome>,
}

impl ScriptedChain {
    fn new(close_ms: i64) -> Self {
        Self {
            close_ms,
            outcomes: HashMap::new(),
        }
    }

    fn paths(mut self, code: &str, records: Vec<PathRecord>) -> Self {
        self.outcomes
            .insert(code.to_string(), PathOutcome::Paths(records));
        self
    }

    fn hangs(mut self, code: &str) -> Self {
        self.outcomes.insert(code.to_string(), PathOutcome::Hang);
        self
    }
}

fn path(code: Option<&str>, amount: &str) -> PathRecord {
    PathRecord {
        source_asset_code: code.map(str::to_string),
        source_amount: amount.to_string(),
    }
}

#[async_trait]
impl ChainClient for ScriptedChain {
    async fn latest_ledger_close_ms(&self) -> Result<i64, PriceError> {
        Ok(self.close_ms)
    }

    async fn strict_receive_paths(
        &self,
        sources: &[Asset],
        _destination: &Asset,
        _destination_amount: Decimal,
    ) -> Result<Vec<PathRecord>, PriceError> {
        match self.outcomes.get(sources[0].code()) {
            Some(PathOutcome::Paths(records)) => Ok(records.clone()),
            Some(PathOutcome::Hang) => std::future::pending().await,
            None => Ok(vec![]),
        }
    }
}

struct FixedCatalog(Vec<Token>);

#[async_trait]
impl TokenCatalog for FixedCatalog {
    async fn fetch_all_tokens(&self) -> Vec<Token> {
        self.0.clone()
    }
}

fn service(store: Arc<MemoryStore>, chain: ScriptedChain) -> PriceCacheService {
    PriceCacheService::new(
        store,
        Arc::new(FixedCatalog(vec![])),
        PriceCalculator::new(Arc::new(chain)),
    )
}

#[tokio::test]
async fn cold_read_admits_unknown_token() {
    let store = Arc::new(MemoryStore::default());
    let chain = ScriptedChain::new(T).paths("ABC", vec![path(Some("ABC"), "2000")]);
    let engine = service(store.clone(), chain);

    let data = engine.get_price("ABC:GXYZ").await;
    assert_eq!(
        data,
        Some(TokenPriceData {
            current_price: dec!(0.25),
            percentage_price_change_24h: None,
        })
    );

    assert!(store.has_series("ABC:GXYZ"));
    assert_eq!(store.score("ABC:GXYZ"), Some(1));
    assert_eq!(
        store.points("ABC:GXYZ"),
        vec![PricePoint {
            timestamp_ms: T,
            price: dec!(0.25),
        }]
    );
}

#[tokio::test]
async fn failed_admission_leaves_no_trace() {
    let store = Arc::new(MemoryStore::default());
    // No outcome programmed: the path set comes back empty.
    let engine = service(store.clone(), ScriptedChain::new(T));

    assert_eq!(engine.get_price("ABC:GXYZ").await, None);
    assert!(!store.has_series("ABC:GXYZ"));
    assert_eq!(store.score("ABC:GXYZ"), None);
}

#[tokio::test]
async fn warm_read_computes_24h_change() {
    let store = Arc::new(
        MemoryStore::default()
            .with_series("XLM", &[(T - DAY_MS, dec!(0.10)), (T, dec!(0.12))])
            .with_score("XLM", 7),
    );
    let engine = service(store.clone(), ScriptedChain::new(T));

    let data = engine.get_price("native").await;
    assert_eq!(
        data,
        Some(TokenPriceData {
            current_price: dec!(0.12),
            percentage_price_change_24h: Some(dec!(20)),
        })
    );
    // A served read counts exactly once.
    assert_eq!(store.score("XLM"), Some(8));
}

#[tokio::test]
async fn warm_read_without_day_old_sample_has_no_change() {
    let store = Arc::new(MemoryStore::default().with_series("XLM", &[(T, dec!(0.12))]));
    let engine = service(store.clone(), ScriptedChain::new(T));

    let data = engine.get_price("XLM").await.unwrap();
    assert_eq!(data.current_price, dec!(0.12));
    assert_eq!(data.percentage_price_change_24h, None);
}

#[tokio::test]
async fn zero_day_old_value_yields_no_change() {
    let store = Arc::new(
        MemoryStore::default().with_series("XLM", &[(T - DAY_MS, dec!(0)), (T, dec!(0.12))]),
    );
    let engine = service(store.clone(), ScriptedChain::new(T));

    let data = engine.get_price("XLM").await.unwrap();
    assert_eq!(data.current_price, dec!(0.12));
    assert_eq!(data.percentage_price_change_24h, None);
}

#[tokio::test]
async fn day_old_sample_outside_the_minute_window_is_ignored() {
    let store = Arc::new(MemoryStore::default().with_series(
        "XLM",
        &[(T - DAY_MS - 61_000, dec!(0.10)), (T, dec!(0.12))],
    ));
    let engine = service(store.clone(), ScriptedChain::new(T));

    let data = engine.get_price("XLM").await.unwrap();
    assert_eq!(data.percentage_price_change_24h, None);
}

#[tokio::test]
async fn native_and_xlm_reads_are_identical() {
    let store = Arc::new(
        MemoryStore::default()
            .with_series("XLM", &[(T - DAY_MS, dec!(0.10)), (T, dec!(0.12))]),
    );
    let engine = service(store.clone(), ScriptedChain::new(T));

    let via_native = engine.get_price("native").await;
    let via_xlm = engine.get_price("XLM").await;
    assert_eq!(via_native, via_xlm);
    // Both reads landed on the one normalized key.
    assert_eq!(store.score("XLM"), Some(2));
}

#[tokio::test]
async fn empty_series_is_a_miss_without_admission() {
    let store = Arc::new(MemoryStore::default().with_series("DEF:G9", &[]));
    let engine = service(store.clone(), ScriptedChain::new(T));

    assert_eq!(engine.get_price("DEF:G9").await, None);
    // The next update tick will fill the series; a miss is not a read.
    assert_eq!(store.score("DEF:G9"), None);
    assert_eq!(store.points("DEF:G9"), vec![]);
}

#[tokio::test]
async fn unavailable_store_reads_resolve_to_null() {
    let store = Arc::new(MemoryStore {
        unavailable: true,
        ..MemoryStore::default()
    });
    let chain = ScriptedChain::new(T).paths("ABC", vec![path(Some("ABC"), "2000")]);
    let engine = service(store.clone(), chain);

    assert_eq!(engine.get_price("ABC:GXYZ").await, None);
    assert!(!store.has_series("ABC:GXYZ"));
}

#[tokio::test(start_paused = true)]
async fn batch_update_tolerates_partial_failures() {
    let store = Arc::new(
        MemoryStore::default()
            .with_score("AAA:G1", 3)
            .with_score("BBB:G2", 2)
            .with_score("CCC:G3", 1),
    );
    let chain = ScriptedChain::new(T)
        .paths("AAA", vec![path(Some("AAA"), "1000")])
        .hangs("BBB")
        .paths("CCC", vec![]);
    let engine = service(store.clone(), chain);

    engine.update_prices().await.unwrap();

    // One multi-append, carrying only the derivable token: the hung
    // derivation timed out and the pathless one was skipped.
    let calls = store.madd_calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0],
        vec![(
            "AAA:G1".to_string(),
            PricePoint {
                timestamp_ms: T,
                price: dec!(0.5),
            }
        )]
    );
}

#[tokio::test]
async fn empty_token_counter_fails_the_update_pass() {
    let store = Arc::new(MemoryStore::default());
    let engine = service(store, ScriptedChain::new(T));

    let err = engine.update_prices().await.unwrap_err();
    assert_eq!(
        err.downcast_ref::<PriceError>(),
        Some(&PriceError::EmptyCatalog)
    );
}

#[tokio::test]
async fn batch_with_zero_successes_halts_the_pass() {
    let store = Arc::new(MemoryStore::default().with_score("CCC:G3", 1));
    let engine = service(store.clone(), ScriptedChain::new(T).paths("CCC", vec![]));

    let err = engine.update_prices().await.unwrap_err();
    assert_eq!(
        err.downcast_ref::<PriceError>(),
        Some(&PriceError::NoPrices)
    );
    assert!(store.madd_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn update_pass_feeds_subsequent_reads() {
    let store = Arc::new(MemoryStore::default().with_score("AAA:G1", 1));
    let chain = ScriptedChain::new(T).paths("AAA", vec![path(Some("AAA"), "2500")]);
    let engine = service(store.clone(), chain);

    engine.update_prices().await.unwrap();
    let data = engine.get_price("AAA:G1").await.unwrap();
    assert_eq!(data.current_price, dec!(0.2));
    assert_eq!(data.percentage_price_change_24h, None);
    // Read hit on top of the initial score.
    assert_eq!(store.score("AAA:G1"), Some(2));
}

#[tokio::test]
async fn init_bootstraps_series_counters_and_flag() {
    let store = Arc::new(MemoryStore::default());
    let catalog = FixedCatalog(vec![
        Token::native(),
        Token::new("ABC:G1"),
        Token::new("DEF:G2"),
    ]);
    let engine = PriceCacheService::new(
        store.clone(),
        Arc::new(catalog),
        PriceCalculator::new(Arc::new(ScriptedChain::new(T))),
    );

    engine.init_price_cache().await.unwrap();

    for key in ["XLM", "ABC:G1", "DEF:G2"] {
        assert!(store.has_series(key), "{key} missing");
        assert_eq!(store.score(key), Some(1), "{key} not counted");
        // Initialization does not populate prices.
        assert_eq!(store.points(key), vec![]);
    }
    assert_eq!(
        store
            .get_string(PRICE_CACHE_INITIALIZED_KEY)
            .await
            .unwrap()
            .as_deref(),
        Some("true")
    );
}

#[tokio::test]
async fn update_walks_tokens_most_read_first() {
    let store = Arc::new(
        MemoryStore::default()
            .with_score("AAA:G1", 1)
            .with_score("BBB:G2", 9),
    );
    let members = store.members_by_score_desc(TOKEN_COUNTER_KEY).await.unwrap();
    assert_eq!(members, vec!["BBB:G2".to_string(), "AAA:G1".to_string()]);
}
