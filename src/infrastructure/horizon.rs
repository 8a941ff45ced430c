//! HTTP client for the chain's Horizon API.
//!
//! Used by the price deriver for two queries: the latest ledger close time
//! and strict-receive path finding. Transport failures are retried with
//! exponential backoff before surfacing as `Upstream` errors.

use crate::domain::{Asset, ChainClient, PathRecord, PriceError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::debug;

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum retry attempts
const MAX_RETRIES: usize = 3;

#[derive(Debug, Deserialize)]
struct Embedded<T> {
    records: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(rename = "_embedded")]
    embedded: Embedded<T>,
}

#[derive(Debug, Deserialize)]
struct LedgerRecord {
    closed_at: DateTime<Utc>,
}

/// Horizon API client.
#[derive(Clone)]
pub struct HorizonClient {
    client: Client,
    base_url: String,
}

impl HorizonClient {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent("WalletPriceCache/1.0")
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Internal method to make a GET request with retry logic
    async fn get_json<T: DeserializeOwned>(&self, path_and_query: &str) -> Result<T, PriceError> {
        let url = format!("{}{}", self.base_url, path_and_query);
        debug!("Fetching from Horizon: {}", url);

        let retry_strategy = ExponentialBackoff::from_millis(100)
            .map(jitter)
            .take(MAX_RETRIES);

        let response = Retry::spawn(retry_strategy, || async {
            self.client
                .get(&url)
                .header("Accept", "application/json")
                .send()
                .await
        })
        .await
        .map_err(|e| PriceError::Upstream(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(PriceError::Upstream(format!(
                "Horizon returned {status} for {url}: {error_body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| PriceError::Upstream(format!("failed to parse JSON from {url}: {e}")))
    }
}

/// Query-string form of an asset in a `source_assets` list.
fn source_param(asset: &Asset) -> String {
    match asset {
        Asset::Native => "native".to_string(),
        Asset::Credit { code, issuer } => format!("{code}:{issuer}"),
    }
}

/// Horizon asset-type discriminator for a destination asset.
fn asset_type(asset: &Asset) -> &'static str {
    match asset {
        Asset::Native => "native",
        Asset::Credit { code, .. } if code.len() <= 4 => "credit_alphanum4",
        Asset::Credit { .. } => "credit_alphanum12",
    }
}

#[async_trait]
impl ChainClient for HorizonClient {
    async fn latest_ledger_close_ms(&self) -> Result<i64, PriceError> {
        let page: Page<LedgerRecord> = self.get_json("/ledgers?order=desc&limit=1").await?;
        let record = page
            .embedded
            .records
            .first()
            .ok_or_else(|| PriceError::Upstream("ledger query returned no records".to_string()))?;
        Ok(record.closed_at.timestamp_millis())
    }

    async fn strict_receive_paths(
        &self,
        sources: &[Asset],
        destination: &Asset,
        destination_amount: Decimal,
    ) -> Result<Vec<PathRecord>, PriceError> {
        let source_assets = sources
            .iter()
            .map(source_param)
            .collect::<Vec<_>>()
            .join(",");
        let mut query = format!(
            "/paths/strict-receive?source_assets={}&destination_amount={}&destination_asset_type={}",
            source_assets,
            destination_amount,
            asset_type(destination)
        );
        if let Asset::Credit { code, issuer } = destination {
            query.push_str(&format!(
                "&destination_asset_code={code}&destination_asset_issuer={issuer}"
            ));
        }
        let page: Page<PathRecord> = self.get_json(&query).await?;
        Ok(page.embedded.records)
    }
}
