//! Close command types and the command state machine.
//!
//! ```text
//! PENDING ──receipt──▶ ACKNOWLEDGED
//! PENDING ──executed─▶ EXECUTED (terminal)
//! PENDING ──failed───▶ FAILED   (terminal)
//! ACKNOWLEDGED ──executed─▶ EXECUTED
//! ACKNOWLEDGED ──failed───▶ FAILED
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ids::{CommandId, DeviceId, PositionId};
use super::position::{CloseReason, Side};
use super::ParseEnumError;

/// Close command lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandStatus {
    /// Issued, waiting for the device to pick it up.
    Pending,
    /// Device confirmed receipt; execution outcome not yet reported.
    Acknowledged,
    /// Device closed the position.
    Executed,
    /// Device could not close the position (requote, off quotes, ...).
    Failed,
}

impl CommandStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandStatus::Pending => "PENDING",
            CommandStatus::Acknowledged => "ACKNOWLEDGED",
            CommandStatus::Executed => "EXECUTED",
            CommandStatus::Failed => "FAILED",
        }
    }

    /// PENDING or ACKNOWLEDGED: at most one such command per position.
    pub fn is_active(self) -> bool {
        matches!(self, CommandStatus::Pending | CommandStatus::Acknowledged)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn can_transition_to(self, next: CommandStatus) -> bool {
        use CommandStatus::*;
        matches!(
            (self, next),
            (Pending, Acknowledged)
                | (Pending, Executed)
                | (Pending, Failed)
                | (Acknowledged, Executed)
                | (Acknowledged, Failed)
        )
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(CommandStatus::Pending),
            "ACKNOWLEDGED" => Ok(CommandStatus::Acknowledged),
            "EXECUTED" => Ok(CommandStatus::Executed),
            "FAILED" => Ok(CommandStatus::Failed),
            _ => Err(ParseEnumError::new("command status", s)),
        }
    }
}

/// One instruction to close one position.
///
/// Not `Serialize`: `expected_price` is the breached hidden level. Devices get
/// a reduced view built in the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseCommand {
    pub id: CommandId,
    pub position_id: PositionId,
    /// Denormalized owner, checked on every device request.
    pub device_id: DeviceId,
    pub reason: CloseReason,
    /// The level that triggered the command (audit only, never sent to devices).
    pub expected_price: f64,
    pub actual_close_price: Option<f64>,
    pub broker_reference: Option<String>,
    pub status: CommandStatus,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl CloseCommand {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Outcome recorded on a terminal command, `None` while still active.
    pub fn recorded_outcome(&self) -> Option<AckOutcome> {
        match self.status {
            CommandStatus::Executed => Some(AckOutcome::Executed {
                actual_close_price: self.actual_close_price.unwrap_or(f64::NAN),
                broker_reference: self.broker_reference.clone(),
            }),
            CommandStatus::Failed => Some(AckOutcome::Failed {
                error_message: self.error_message.clone().unwrap_or_default(),
            }),
            CommandStatus::Pending | CommandStatus::Acknowledged => None,
        }
    }
}

/// An active command joined with the position fields a device needs to act on it.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingClose {
    pub command: CloseCommand,
    pub instrument: String,
    pub side: Side,
}

/// Execution outcome reported by a device.
#[derive(Debug, Clone, PartialEq)]
pub enum AckOutcome {
    Executed {
        actual_close_price: f64,
        broker_reference: Option<String>,
    },
    Failed {
        error_message: String,
    },
}

impl AckOutcome {
    pub fn target_status(&self) -> CommandStatus {
        match self {
            AckOutcome::Executed { .. } => CommandStatus::Executed,
            AckOutcome::Failed { .. } => CommandStatus::Failed,
        }
    }

    /// Whether a repeated ack describes the same result as the recorded one.
    ///
    /// Executed acks match on fill price; a differing broker reference on a
    /// resend is tolerated. Failed acks match on kind alone, since terminals
    /// reword error text between retries.
    pub fn matches(&self, recorded: &AckOutcome) -> bool {
        match (self, recorded) {
            (
                AckOutcome::Executed {
                    actual_close_price: a,
                    ..
                },
                AckOutcome::Executed {
                    actual_close_price: b,
                    ..
                },
            ) => a == b,
            (AckOutcome::Failed { .. }, AckOutcome::Failed { .. }) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_and_terminal_partition_states() {
        assert!(CommandStatus::Pending.is_active());
        assert!(CommandStatus::Acknowledged.is_active());
        assert!(CommandStatus::Executed.is_terminal());
        assert!(CommandStatus::Failed.is_terminal());
    }

    #[test]
    fn transitions_follow_state_machine() {
        use CommandStatus::*;
        assert!(Pending.can_transition_to(Acknowledged));
        assert!(Pending.can_transition_to(Executed));
        assert!(Acknowledged.can_transition_to(Failed));
        assert!(!Acknowledged.can_transition_to(Pending));
        assert!(!Executed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Executed));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn executed_outcomes_match_on_price() {
        let a = AckOutcome::Executed {
            actual_close_price: 1988.5,
            broker_reference: Some("T1".into()),
        };
        let b = AckOutcome::Executed {
            actual_close_price: 1988.5,
            broker_reference: None,
        };
        let c = AckOutcome::Executed {
            actual_close_price: 1988.0,
            broker_reference: Some("T1".into()),
        };
        assert!(a.matches(&b));
        assert!(!a.matches(&c));
    }

    #[test]
    fn executed_never_matches_failed() {
        let executed = AckOutcome::Executed {
            actual_close_price: 1.0,
            broker_reference: None,
        };
        let failed = AckOutcome::Failed {
            error_message: "requote".into(),
        };
        assert!(!executed.matches(&failed));
        assert!(!failed.matches(&executed));
    }
}
