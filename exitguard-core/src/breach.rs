//! Breach checking: has the live price reached a hidden exit level?
//!
//! BUY: stop breached if price <= stop, target breached if price >= target.
//! SELL: stop breached if price >= stop, target breached if price <= target.
//!
//! Pure functions only; the monitor decides what to do with the result.

use crate::domain::{CloseReason, HiddenExitLevels, Side};

/// Raw breach flags for one price observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BreachFlags {
    pub stop: bool,
    pub target: bool,
}

impl BreachFlags {
    pub fn any(&self) -> bool {
        self.stop || self.target
    }
}

/// A breach the monitor should act on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breach {
    pub reason: CloseReason,
    /// The hidden level that was crossed. Recorded as the command's expected price.
    pub level: f64,
}

/// Directional comparison of `price` against both levels.
pub fn check_levels(side: Side, price: f64, stop: f64, target: f64) -> BreachFlags {
    match side {
        Side::Buy => BreachFlags {
            stop: price <= stop,
            target: price >= target,
        },
        Side::Sell => BreachFlags {
            stop: price >= stop,
            target: price <= target,
        },
    }
}

/// Evaluate a position's hidden levels against the live price.
///
/// Levels are validated at open (BUY stop < target, SELL stop > target) so both
/// flags cannot be set at once; if stored data ever allows it, the stop wins.
pub fn evaluate(side: Side, price: f64, levels: &HiddenExitLevels) -> Option<Breach> {
    if !price.is_finite() {
        return None;
    }

    let flags = check_levels(side, price, levels.stop(), levels.target());
    if !flags.any() {
        return None;
    }
    if flags.stop {
        Some(Breach {
            reason: CloseReason::StopHit,
            level: levels.stop(),
        })
    } else {
        Some(Breach {
            reason: CloseReason::TargetHit,
            level: levels.target(),
        })
    }
}

/// Level ordering a position must satisfy at open.
pub fn levels_are_ordered(side: Side, stop: f64, target: f64) -> bool {
    match side {
        Side::Buy => stop < target,
        Side::Sell => stop > target,
    }
}
