pub mod price_cache;
pub mod price_calculator;

pub use price_cache::PriceCacheService;
pub use price_calculator::PriceCalculator;
