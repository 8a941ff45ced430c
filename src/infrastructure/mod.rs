pub mod catalog;
pub mod horizon;
pub mod redis;

pub use catalog::AssetCatalogClient;
pub use horizon::HorizonClient;
pub use redis::RedisTimeSeries;
