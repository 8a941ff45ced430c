//! Paginated asset catalog walker.
//!
//! Collects the initial token set from a public asset explorer, ordered by
//! 7-day volume. The walk is best-effort: any page failure ends it and the
//! tokens gathered so far are kept.

use crate::domain::constants::{CATALOG_PAGE_DELAY_MS, INITIAL_TOKEN_COUNT};
use crate::domain::{Token, TokenCatalog};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, error, info};

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Deserialize)]
struct TomlInfo {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    issuer: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetRecord {
    asset: String,
    #[serde(rename = "tomlInfo", default)]
    toml_info: Option<TomlInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct PageEmbedded {
    #[serde(default)]
    records: Vec<AssetRecord>,
}

#[derive(Debug, Default, Deserialize)]
struct PageLink {
    href: String,
}

#[derive(Debug, Default, Deserialize)]
struct PageLinks {
    #[serde(default)]
    next: Option<PageLink>,
}

#[derive(Debug, Default, Deserialize)]
struct AssetPage {
    #[serde(rename = "_embedded", default)]
    embedded: PageEmbedded,
    #[serde(rename = "_links", default)]
    links: PageLinks,
}

/// Client for the public asset explorer.
pub struct AssetCatalogClient {
    client: Client,
    base_url: String,
}

impl AssetCatalogClient {
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

    async fn fetch_page(&self, url: &str) -> anyhow::Result<AssetPage> {
        debug!("Fetching catalog page: {}", url);
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("catalog returned {status} for {url}");
        }
        Ok(response.json().await?)
    }

    /// Resolve a possibly-relative `next` link against the catalog base.
    fn absolutize(&self, href: &str) -> String {
        if href.starts_with("http") {
            href.to_string()
        } else {
            format!("{}{}", self.base_url, href)
        }
    }
}

/// Token identifier for a catalog record, if it names one.
///
/// The structured `tomlInfo` code/issuer pair is preferred; otherwise the
/// `asset` field is expected to read `CODE-ISSUER…`. The native asset and
/// the USDC quote asset are excluded from the tracked set.
fn record_token(record: &AssetRecord) -> Option<String> {
    if record.asset == "XLM" || record.asset == "USDC" {
        return None;
    }
    if let Some(info) = &record.toml_info {
        if let (Some(code), Some(issuer)) = (&info.code, &info.issuer) {
            return Some(format!("{code}:{issuer}"));
        }
    }
    let mut parts = record.asset.split('-');
    match (parts.next(), parts.next()) {
        (Some(code), Some(issuer)) if !code.is_empty() && !issuer.is_empty() => {
            Some(format!("{code}:{issuer}"))
        }
        _ => None,
    }
}

/// Fold a page of records into the output list, deduplicating and stopping
/// at the configured cap. Returns false once the cap is reached.
fn collect_page(records: &[AssetRecord], seen: &mut HashSet<String>, out: &mut Vec<Token>) -> bool {
    for record in records {
        if out.len() >= INITIAL_TOKEN_COUNT {
            return false;
        }
        let Some(id) = record_token(record) else {
            continue;
        };
        if seen.insert(id.clone()) {
            out.push(Token::new(&id));
        }
    }
    out.len() < INITIAL_TOKEN_COUNT
}

#[async_trait]
impl TokenCatalog for AssetCatalogClient {
    async fn fetch_all_tokens(&self) -> Vec<Token> {
        let mut tokens = vec![Token::native()];
        let mut seen: HashSet<String> =
            tokens.iter().map(|t| t.ts_key().to_string()).collect();
        let mut url = format!(
            "{}/explorer/public/asset?sort=volume7d&order=desc",
            self.base_url
        );

        loop {
            let page = match self.fetch_page(&url).await {
                Ok(page) => page,
                Err(e) => {
                    // Partial results are acceptable; the periodic update
                    // loop and lazy admission fill in the rest over time.
                    error!("catalog walk ended early: {:#}", e);
                    break;
                }
            };

            if !collect_page(&page.embedded.records, &mut seen, &mut tokens) {
                break;
            }

            match page.links.next {
                Some(link) => {
                    url = self.absolutize(&link.href);
                    tokio::time::sleep(Duration::from_millis(CATALOG_PAGE_DELAY_MS)).await;
                }
                None => break,
            }
        }

        info!(count = tokens.len(), "collected tokens from asset catalog");
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(asset: &str) -> AssetRecord {
        AssetRecord {
            asset: asset.to_string(),
            toml_info: None,
        }
    }

    fn toml_record(asset: &str, code: &str, issuer: &str) -> AssetRecord {
        AssetRecord {
            asset: asset.to_string(),
            toml_info: Some(TomlInfo {
                code: Some(code.to_string()),
                issuer: Some(issuer.to_string()),
            }),
        }
    }

    #[test]
    fn toml_info_is_preferred_over_asset_splitting() {
        let rec = toml_record("YBX-GABC-1", "yBX", "GABC");
        assert_eq!(record_token(&rec), Some("yBX:GABC".to_string()));
    }

    #[test]
    fn asset_field_is_split_on_dashes() {
        let rec = record("ABC-GXYZ-credit_alphanum4");
        assert_eq!(record_token(&rec), Some("ABC:GXYZ".to_string()));
    }

    #[test]
    fn native_and_quote_assets_are_skipped() {
        assert_eq!(record_token(&record("XLM")), None);
        assert_eq!(record_token(&record("USDC")), None);
    }

    #[test]
    fn unparseable_records_are_skipped() {
        assert_eq!(record_token(&record("JUSTACODE")), None);
    }

    #[test]
    fn pages_are_deduplicated() {
        let mut seen = HashSet::from(["XLM".to_string()]);
        let mut out = vec![Token::native()];
        let records = vec![
            record("ABC-G1-1"),
            record("ABC-G1-1"),
            record("DEF-G2-1"),
        ];
        assert!(collect_page(&records, &mut seen, &mut out));
        let keys: Vec<&str> = out.iter().map(|t| t.ts_key()).collect();
        assert_eq!(keys, vec!["XLM", "ABC:G1", "DEF:G2"]);
    }

    #[test]
    fn walk_stops_exactly_at_the_token_cap() {
        let mut seen = HashSet::from(["XLM".to_string()]);
        let mut out = vec![Token::native()];
        let records: Vec<AssetRecord> = (0..INITIAL_TOKEN_COUNT + 50)
            .map(|i| record(&format!("T{i}-G{i}-1")))
            .collect();
        assert!(!collect_page(&records, &mut seen, &mut out));
        assert_eq!(out.len(), INITIAL_TOKEN_COUNT);
    }
}
