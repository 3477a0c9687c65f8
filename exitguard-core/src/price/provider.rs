//! Price feed trait and structured error types.
//!
//! The breach monitor only ever asks one question of the market: the last trade
//! price of an instrument. `PriceFeed` abstracts over where that answer comes
//! from so the monitor can run against the HTTP feed or an in-memory fake.

use thiserror::Error;

/// Structured error types for price lookups.
///
/// Every variant is a per-instrument, per-sweep failure: the monitor logs it and
/// retries the position on the next sweep.
#[derive(Debug, Error)]
pub enum PriceError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by price feed (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("no price for instrument: {instrument}")]
    InstrumentNotFound { instrument: String },

    #[error("unusable price {price} for {instrument}")]
    InvalidPrice { instrument: String, price: f64 },

    #[error("hard stop: price feed is refusing requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("price feed error: {0}")]
    Other(String),
}

/// Source of last-trade prices.
pub trait PriceFeed: Send + Sync {
    /// Human-readable name of this feed.
    fn name(&self) -> &str;

    /// Last trade price for an instrument.
    fn last_price(&self, instrument: &str) -> Result<f64, PriceError>;

    /// Whether the feed is currently accepting requests.
    fn is_available(&self) -> bool {
        true
    }
}

/// Reject NaN, infinite, zero and negative quotes.
pub fn checked_price(instrument: &str, price: f64) -> Result<f64, PriceError> {
    if price.is_finite() && price > 0.0 {
        Ok(price)
    } else {
        Err(PriceError::InvalidPrice {
            instrument: instrument.to_string(),
            price,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checked_price_rejects_garbage() {
        assert_eq!(checked_price("XAUUSD", 1989.5).unwrap(), 1989.5);
        assert!(checked_price("XAUUSD", 0.0).is_err());
        assert!(checked_price("XAUUSD", -1.0).is_err());
        assert!(checked_price("XAUUSD", f64::NAN).is_err());
        assert!(checked_price("XAUUSD", f64::INFINITY).is_err());
    }
}
