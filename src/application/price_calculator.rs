//! On-chain USD price derivation.
//!
//! A token's price is derived from the chain's strict-receive path finding:
//! how much of the token buys a fixed notional of USDC over the most
//! favorable reachable route. The whole derivation races a hard timeout;
//! whichever side finishes first wins and the loser is abandoned.

use crate::domain::constants::{PRICE_CALCULATION_TIMEOUT_MS, USD_RECEIVE_VALUE};
use crate::domain::{Asset, ChainClient, PathRecord, PriceError, PricePoint, Token};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct PriceCalculator {
    chain: Arc<dyn ChainClient>,
}

impl PriceCalculator {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self { chain }
    }

    /// Derive the token's USD price, stamped with the close time of the
    /// latest ledger. Fails with `Timeout`, `NoPaths`, `BadToken` or
    /// `Upstream`.
    pub async fn calculate_price_in_usd(&self, token: &Token) -> Result<PricePoint, PriceError> {
        let timeout = Duration::from_millis(PRICE_CALCULATION_TIMEOUT_MS);
        match tokio::time::timeout(timeout, self.price_from_paths(token)).await {
            Ok(result) => result,
            Err(_) => Err(PriceError::Timeout(token.to_string())),
        }
    }

    async fn price_from_paths(&self, token: &Token) -> Result<PricePoint, PriceError> {
        let sources = token.source_assets()?;
        let timestamp_ms = self.chain.latest_ledger_close_ms().await?;

        let receive_value = Decimal::from(USD_RECEIVE_VALUE);
        let records = self
            .chain
            .strict_receive_paths(&sources, &Asset::usdc(), receive_value)
            .await?;
        if records.is_empty() {
            return Err(PriceError::NoPaths(token.to_string()));
        }

        let min_source = min_source_amount(&records, token.code())?;
        debug!(token = %token, %min_source, "selected cheapest source amount");

        let price = receive_value
            .checked_div(min_source)
            .ok_or_else(|| {
                PriceError::Upstream(format!("unusable source amount {min_source} for {token}"))
            })?;
        Ok(PricePoint { timestamp_ms, price })
    }
}

/// Cheapest source amount among the returned paths.
///
/// The accumulator is seeded with the first record overall, then folded
/// over the records whose source asset code matches the primary source.
/// When nothing matches the filter (native sources carry no code), the
/// seed stands: the first record is used as-is. That fallback is
/// intentional, not an oversight.
pub fn min_source_amount(records: &[PathRecord], code: &str) -> Result<Decimal, PriceError> {
    let first = records
        .first()
        .ok_or_else(|| PriceError::NoPaths(code.to_string()))?;
    let seed = parse_amount(&first.source_amount)?;
    records
        .iter()
        .filter(|r| r.source_asset_code.as_deref() == Some(code))
        .try_fold(seed, |min, record| {
            let amount = parse_amount(&record.source_amount)?;
            Ok(if amount < min { amount } else { min })
        })
}

fn parse_amount(raw: &str) -> Result<Decimal, PriceError> {
    Decimal::from_str(raw)
        .map_err(|e| PriceError::Upstream(format!("unparseable source amount {raw:?}: {e}")))
}
