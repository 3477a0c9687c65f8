//! Market price lookups consumed by the breach monitor.

pub mod circuit_breaker;
pub mod fixed;
pub mod http;
pub mod provider;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use fixed::{parse_quote, FixedPriceFeed};
pub use http::HttpPriceFeed;
pub use provider::{checked_price, PriceError, PriceFeed};
