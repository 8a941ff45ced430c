//! Token price cache engine for a wallet backend.
//!
//! Maintains a queryable view of per-token USD prices and their 24h change,
//! derived from the chain's path-finding endpoint and stored in a
//! time-series cache with bounded retention.
//!
//! The crate follows a clean layering:
//! - **Domain**: token/price entities, error taxonomy, and the traits for
//!   the time-series store, chain client and asset catalog
//! - **Application**: the price deriver and the cache engine
//! - **Infrastructure**: Redis, Horizon and asset-explorer implementations

pub mod application;
pub mod domain;
pub mod infrastructure;
