//! Price cache worker.
//!
//! Keeps the token price cache warm: bootstraps the tracked token set from
//! the asset catalog on first start, then refreshes prices on a fixed
//! interval, most-read tokens first.
//!
//! # Configuration
//!
//! The worker is configured via `config.yaml` and environment variables:
//! - `REDIS_URL`: Redis connection string; without it the cache is disabled
//!   and every read resolves to null
//! - `UPDATE_INTERVAL_SECS`: overrides the configured update cadence
//! - `RUST_LOG`: logging level (default: info)
//! - `LOG_FORMAT`: `text` (default) or `json`
//!
//! # Quick Start
//!
//! ```bash
//! export REDIS_URL="redis://localhost:6379"
//! cargo run --release
//! ```

use anyhow::Context;
use wallet_price_cache::application::{PriceCacheService, PriceCalculator};
use wallet_price_cache::domain::constants::PRICE_CACHE_INITIALIZED_KEY;
use wallet_price_cache::domain::TimeSeriesStore;
use wallet_price_cache::infrastructure::{AssetCatalogClient, HorizonClient, RedisTimeSeries};
use serde::Deserialize;
use std::env;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Top-level worker configuration loaded from `config.yaml`.
#[derive(Deserialize, Debug, Clone)]
struct Config {
    /// Chain API endpoint
    #[serde(default)]
    horizon: HorizonConfig,
    /// Asset catalog endpoint
    #[serde(default)]
    catalog: CatalogConfig,
    /// Update loop settings
    #[serde(default)]
    cache: CacheConfig,
}

#[derive(Deserialize, Debug, Clone)]
struct HorizonConfig {
    #[serde(default = "default_horizon_url")]
    url: String,
}

#[derive(Deserialize, Debug, Clone)]
struct CatalogConfig {
    #[serde(default = "default_catalog_url")]
    url: String,
}

#[derive(Deserialize, Debug, Clone)]
struct CacheConfig {
    /// Seconds between price update passes
    #[serde(default = "default_update_interval_secs")]
    update_interval_secs: u64,
}

fn default_horizon_url() -> String {
    "https://horizon.stellar.org".to_string()
}
fn default_catalog_url() -> String {
    "https://api.stellar.expert".to_string()
}
fn default_update_interval_secs() -> u64 {
    60
}

impl Default for HorizonConfig {
    fn default() -> Self {
        Self {
            url: default_horizon_url(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: default_catalog_url(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: default_update_interval_secs(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let env_filter = EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()));

    if log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // Load Config
    let config_content = fs::read_to_string("config.yaml")
        .context("Failed to read config.yaml - ensure file exists in working directory")?;
    let config: Config = serde_yaml::from_str(&config_content)
        .context("Failed to parse config.yaml - check YAML syntax and structure")?;

    let redis_url = env::var("REDIS_URL").ok();
    if redis_url.is_none() {
        tracing::warn!("REDIS_URL not found in env - price cache disabled, reads resolve to null");
    }

    // Infrastructure
    let store = Arc::new(RedisTimeSeries::new(redis_url));
    let horizon = Arc::new(HorizonClient::new(&config.horizon.url));
    let catalog = Arc::new(AssetCatalogClient::new(&config.catalog.url));

    // Application
    let service = Arc::new(PriceCacheService::new(
        store.clone(),
        catalog,
        PriceCalculator::new(horizon),
    ));

    // The engine never reads the initialization flag itself; gating the
    // one-time bootstrap on it is this runner's job.
    if store.available() {
        let initialized = store
            .get_string(PRICE_CACHE_INITIALIZED_KEY)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("could not read initialization flag: {:#}", e);
                None
            });
        if initialized.as_deref() != Some("true") {
            service
                .init_price_cache()
                .await
                .context("price cache initialization failed")?;
        }
    }

    let interval_secs = env::var("UPDATE_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(config.cache.update_interval_secs);
    tracing::info!("price update loop running every {}s", interval_secs);

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    // One pass at a time: the next tick is not polled until the current
    // pass finishes, so passes never overlap.
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutting down price cache worker");
                break;
            }
            _ = interval.tick() => {
                if let Err(e) = service.update_prices().await {
                    tracing::error!("price update pass failed: {:#}", e);
                }
            }
        }
    }

    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C) to initiate graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}
