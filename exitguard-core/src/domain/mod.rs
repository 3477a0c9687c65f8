//! Domain types for exitguard

pub mod close_command;
pub mod device;
pub mod ids;
pub mod position;

pub use close_command::{AckOutcome, CloseCommand, CommandStatus, PendingClose};
pub use device::Device;
pub use ids::{CommandId, DeviceId, PositionId};
pub use position::{CloseReason, HiddenExitLevels, NewPosition, Position, PositionStatus, Side};

use thiserror::Error;

/// A stored or wire string did not name a known enum variant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind}: '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
