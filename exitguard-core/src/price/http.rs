//! HTTP price feed.
//!
//! Fetches `GET {base_url}/last-price/{instrument}` and expects
//! `{"price": <number>}`. Handles rate limiting, short retries with exponential
//! backoff, and the circuit breaker. Retries are kept short: a slow quote only
//! delays one position, and the next sweep asks again anyway.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{checked_price, PriceError, PriceFeed};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct LastPriceResponse {
    price: f64,
}

/// Price feed backed by a market-data HTTP service.
pub struct HttpPriceFeed {
    client: reqwest::blocking::Client,
    base_url: String,
    circuit_breaker: Arc<CircuitBreaker>,
    max_retries: u32,
    base_delay: Duration,
}

impl HttpPriceFeed {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, PriceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("exitguard/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PriceError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            circuit_breaker,
            max_retries: 2,
            base_delay: Duration::from_millis(200),
        })
    }

    fn price_url(&self, instrument: &str) -> Result<String, PriceError> {
        let safe = !instrument.is_empty()
            && instrument
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !safe {
            return Err(PriceError::InstrumentNotFound {
                instrument: instrument.to_string(),
            });
        }
        Ok(format!("{}/last-price/{instrument}", self.base_url))
    }

    fn fetch_with_retry(&self, instrument: &str) -> Result<f64, PriceError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(PriceError::CircuitBreakerTripped);
        }

        let url = self.price_url(instrument)?;
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                std::thread::sleep(self.base_delay * 2u32.pow(attempt - 1));
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(PriceError::CircuitBreakerTripped);
            }

            match self.client.get(&url).send() {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::FORBIDDEN {
                        self.circuit_breaker.trip();
                        return Err(PriceError::CircuitBreakerTripped);
                    }

                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Err(PriceError::InstrumentNotFound {
                            instrument: instrument.to_string(),
                        });
                    }

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        self.circuit_breaker.record_failure();
                        let retry_after = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(1);
                        // Do not sleep out a long retry-after inside a sweep.
                        return Err(PriceError::RateLimited {
                            retry_after_secs: retry_after,
                        });
                    }

                    if !status.is_success() {
                        self.circuit_breaker.record_failure();
                        last_error = Some(PriceError::Other(format!("HTTP {status} for {instrument}")));
                        continue;
                    }

                    let body: LastPriceResponse = resp.json().map_err(|e| {
                        PriceError::ResponseFormatChanged(format!(
                            "failed to parse price for {instrument}: {e}"
                        ))
                    })?;

                    let price = checked_price(instrument, body.price)?;
                    self.circuit_breaker.record_success();
                    return Ok(price);
                }
                Err(e) => {
                    self.circuit_breaker.record_failure();
                    if e.is_connect() || e.is_timeout() {
                        last_error = Some(PriceError::NetworkUnreachable(e.to_string()));
                        continue;
                    }
                    return Err(PriceError::NetworkUnreachable(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| PriceError::Other("max retries exceeded".into())))
    }
}

impl PriceFeed for HttpPriceFeed {
    fn name(&self) -> &str {
        "http"
    }

    fn last_price(&self, instrument: &str) -> Result<f64, PriceError> {
        self.fetch_with_retry(instrument)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}
