//! Position record and its hidden exit levels.
//!
//! The stop/target pair is fixed when the position is opened and never leaves
//! this crate: `HiddenExitLevels` has no `Serialize` impl, a redacted `Debug`,
//! and only a crate-private accessor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ids::{DeviceId, PositionId};
use super::ParseEnumError;

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            _ => Err(ParseEnumError::new("side", s)),
        }
    }
}

/// Position lifecycle: OPEN → CLOSING (command issued) → CLOSED (executed ack).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closing,
    Closed,
}

impl PositionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PositionStatus::Open => "OPEN",
            PositionStatus::Closing => "CLOSING",
            PositionStatus::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PositionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(PositionStatus::Open),
            "CLOSING" => Ok(PositionStatus::Closing),
            "CLOSED" => Ok(PositionStatus::Closed),
            _ => Err(ParseEnumError::new("position status", s)),
        }
    }
}

/// Why a position is being (or was) closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    StopHit,
    TargetHit,
    Manual,
    MaxDuration,
    DrawdownGuard,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::StopHit => "stop_hit",
            CloseReason::TargetHit => "target_hit",
            CloseReason::Manual => "manual",
            CloseReason::MaxDuration => "max_duration",
            CloseReason::DrawdownGuard => "drawdown_guard",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloseReason {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stop_hit" => Ok(CloseReason::StopHit),
            "target_hit" => Ok(CloseReason::TargetHit),
            "manual" => Ok(CloseReason::Manual),
            "max_duration" => Ok(CloseReason::MaxDuration),
            "drawdown_guard" => Ok(CloseReason::DrawdownGuard),
            _ => Err(ParseEnumError::new("close reason", s)),
        }
    }
}

/// Server-only exit levels. Deliberately not `Serialize`.
#[derive(Clone, Copy, PartialEq)]
pub struct HiddenExitLevels {
    stop: f64,
    target: f64,
}

impl HiddenExitLevels {
    pub(crate) fn new(stop: f64, target: f64) -> Self {
        Self { stop, target }
    }

    pub(crate) fn stop(&self) -> f64 {
        self.stop
    }

    pub(crate) fn target(&self) -> f64 {
        self.target
    }
}

impl fmt::Debug for HiddenExitLevels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HiddenExitLevels(<redacted>)")
    }
}

/// One trading position as persisted by the position store.
#[derive(Debug, Clone)]
pub struct Position {
    pub id: PositionId,
    pub device_id: DeviceId,
    pub instrument: String,
    pub side: Side,
    pub requested_entry_price: f64,
    pub requested_volume: f64,
    /// Reconciled fill, recorded when the device acknowledges the open.
    pub actual_entry_price: Option<f64>,
    pub filled_volume: Option<f64>,
    pub entry_broker_reference: Option<String>,
    pub entry_filled_at: Option<DateTime<Utc>>,
    pub(crate) exit_levels: HiddenExitLevels,
    pub status: PositionStatus,
    pub close_price: Option<f64>,
    pub close_reason: Option<CloseReason>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    pub(crate) fn exit_levels(&self) -> &HiddenExitLevels {
        &self.exit_levels
    }

    pub fn is_closed(&self) -> bool {
        self.status == PositionStatus::Closed
    }

    /// How long the position has been held as of `now`.
    pub fn holding_duration(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.opened_at)
    }
}

/// Input for opening a position. The exit levels are consumed here and become hidden.
#[derive(Debug, Clone)]
pub struct NewPosition {
    pub device_id: DeviceId,
    pub instrument: String,
    pub side: Side,
    pub entry_price: f64,
    pub volume: f64,
    pub stop_level: f64,
    pub target_level: f64,
}
