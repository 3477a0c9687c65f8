//! In-memory price feed: quotes set by hand.
//!
//! Used for manual one-shot sweeps (`exitguard sweep --quote XAUUSD=1989`) and
//! as the fake feed in tests.

use std::collections::HashMap;
use std::sync::RwLock;

use super::provider::{checked_price, PriceError, PriceFeed};

#[derive(Debug, Default)]
pub struct FixedPriceFeed {
    quotes: RwLock<HashMap<String, f64>>,
}

impl FixedPriceFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quotes<I, S>(quotes: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let feed = Self::new();
        for (instrument, price) in quotes {
            feed.set(instrument, price);
        }
        feed
    }

    pub fn set(&self, instrument: impl Into<String>, price: f64) {
        if let Ok(mut quotes) = self.quotes.write() {
            quotes.insert(instrument.into(), price);
        }
    }
}

impl PriceFeed for FixedPriceFeed {
    fn name(&self) -> &str {
        "fixed"
    }

    fn last_price(&self, instrument: &str) -> Result<f64, PriceError> {
        let quotes = self
            .quotes
            .read()
            .map_err(|_| PriceError::Other("quote table poisoned".into()))?;
        let price = quotes
            .get(instrument)
            .copied()
            .ok_or_else(|| PriceError::InstrumentNotFound {
                instrument: instrument.to_string(),
            })?;
        checked_price(instrument, price)
    }
}

/// Parse `SYMBOL=PRICE`.
pub fn parse_quote(input: &str) -> Result<(String, f64), String> {
    let (symbol, price) = input
        .split_once('=')
        .ok_or_else(|| format!("expected SYMBOL=PRICE, got '{input}'"))?;
    let symbol = symbol.trim();
    if symbol.is_empty() {
        return Err(format!("missing symbol in '{input}'"));
    }
    let price: f64 = price
        .trim()
        .parse()
        .map_err(|e| format!("bad price in '{input}': {e}"))?;
    Ok((symbol.to_string(), price))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_set_quotes() {
        let feed = FixedPriceFeed::with_quotes([("XAUUSD", 1989.0)]);
        assert_eq!(feed.last_price("XAUUSD").unwrap(), 1989.0);
        feed.set("XAUUSD", 1991.5);
        assert_eq!(feed.last_price("XAUUSD").unwrap(), 1991.5);
    }

    #[test]
    fn unknown_instrument_errors() {
        let feed = FixedPriceFeed::new();
        assert!(matches!(
            feed.last_price("EURUSD"),
            Err(PriceError::InstrumentNotFound { .. })
        ));
    }

    #[test]
    fn parse_quote_forms() {
        assert_eq!(parse_quote("XAUUSD=1989.5").unwrap(), ("XAUUSD".into(), 1989.5));
        assert!(parse_quote("XAUUSD").is_err());
        assert!(parse_quote("=1").is_err());
        assert!(parse_quote("XAUUSD=abc").is_err());
    }
}
