//! Circuit breaker for the price feed.
//!
//! After `failure_threshold` consecutive failures (or an immediate trip on HTTP
//! 403), every lookup is refused for the cooldown. A tripped breaker turns a
//! dead feed into fast per-position skips instead of a sweep that spends its
//! whole interval waiting on timeouts.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Whether price lookups may reach the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Lookups go out.
    Closed,
    /// Lookups are refused until the cooldown has run from `tripped_at`.
    Open { tripped_at: Instant },
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
}

/// Shared by every lookup against one feed; while open, the sweep skips positions.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    cooldown: Duration,
    failure_threshold: u32,
}

impl CircuitBreaker {
    pub fn new(cooldown: Duration, failure_threshold: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
            }),
            cooldown,
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// Whether the next lookup may hit the feed. Closes again once the cooldown has run out.
    pub fn is_allowed(&self) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open { tripped_at } => {
                if tripped_at.elapsed() >= self.cooldown {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// The feed answered; the failure streak restarts.
    pub fn record_success(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.consecutive_failures = 0;
        }
    }

    /// The feed failed; opens after `failure_threshold` in a row.
    pub fn record_failure(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.consecutive_failures += 1;
            if inner.consecutive_failures >= self.failure_threshold {
                inner.state = BreakerState::Open {
                    tripped_at: Instant::now(),
                };
            }
        }
    }

    /// Open now regardless of the streak (the feed answered 403).
    pub fn trip(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.state = BreakerState::Open {
                tripped_at: Instant::now(),
            };
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner
            .lock()
            .map(|inner| inner.state)
            .unwrap_or(BreakerState::Closed)
    }
}
