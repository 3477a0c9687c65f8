//! Wire schemas for the device endpoints.
//!
//! Response types here are the only things the gateway serializes. They are
//! built field by field from core records and have no field that could hold an
//! exit level or the command's expected price.

use chrono::{DateTime, Utc};
use exitguard_core::domain::{
    AckOutcome, CloseReason, CommandId, PendingClose, Position, PositionId, PositionStatus, Side,
};
use exitguard_core::EntryFill;
use serde::{Deserialize, Serialize};

// ─── Responses ──────────────────────────────────────────────────────

/// One close instruction as a device sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseCommandView {
    pub command_id: CommandId,
    pub position_id: PositionId,
    pub instrument: String,
    pub side: Side,
    pub reason: CloseReason,
    pub created_at: DateTime<Utc>,
}

impl From<&PendingClose> for CloseCommandView {
    fn from(p: &PendingClose) -> Self {
        Self {
            command_id: p.command.id,
            position_id: p.command.position_id,
            instrument: p.instrument.clone(),
            side: p.side,
            reason: p.command.reason,
            created_at: p.command.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCommandsResponse {
    pub commands: Vec<CloseCommandView>,
}

/// A device's own position, without its exit levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionView {
    pub position_id: PositionId,
    pub instrument: String,
    pub side: Side,
    pub status: PositionStatus,
    pub requested_entry_price: f64,
    pub requested_volume: f64,
    pub actual_entry_price: Option<f64>,
    pub filled_volume: Option<f64>,
    pub close_price: Option<f64>,
    pub close_reason: Option<CloseReason>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl From<&Position> for PositionView {
    fn from(p: &Position) -> Self {
        Self {
            position_id: p.id,
            instrument: p.instrument.clone(),
            side: p.side,
            status: p.status,
            requested_entry_price: p.requested_entry_price,
            requested_volume: p.requested_volume,
            actual_entry_price: p.actual_entry_price,
            filled_volume: p.filled_volume,
            close_price: p.close_price,
            close_reason: p.close_reason,
            opened_at: p.opened_at,
            closed_at: p.closed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionsResponse {
    pub positions: Vec<PositionView>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    pub const OK: OkResponse = OkResponse { ok: true };
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub ok: bool,
    pub error: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

// ─── Requests ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Executed,
    Failed,
}

/// `POST /client/close-ack`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloseAckRequest {
    pub command_id: CommandId,
    pub outcome: OutcomeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_close_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl CloseAckRequest {
    /// Check that the fields required by `outcome` are present.
    pub fn into_outcome(self) -> Result<(CommandId, AckOutcome), &'static str> {
        let outcome = match self.outcome {
            OutcomeKind::Executed => {
                let price = self
                    .actual_close_price
                    .ok_or("executed outcome requires actual_close_price")?;
                if !price.is_finite() || price <= 0.0 {
                    return Err("actual_close_price must be a positive number");
                }
                AckOutcome::Executed {
                    actual_close_price: price,
                    broker_reference: self
                        .broker_reference
                        .map(|r| r.trim().to_string())
                        .filter(|r| !r.is_empty()),
                }
            }
            OutcomeKind::Failed => {
                let message = self
                    .error_message
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .ok_or("failed outcome requires error_message")?;
                AckOutcome::Failed {
                    error_message: message,
                }
            }
        };
        Ok((self.command_id, outcome))
    }
}

/// `POST /client/close-receipt`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReceiptRequest {
    pub command_id: CommandId,
}

/// `POST /client/open-ack`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenAckRequest {
    pub position_id: PositionId,
    pub actual_entry_price: f64,
    pub filled_volume: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_reference: Option<String>,
}

impl OpenAckRequest {
    pub fn into_fill(self) -> (PositionId, EntryFill) {
        (
            self.position_id,
            EntryFill {
                actual_entry_price: self.actual_entry_price,
                filled_volume: self.filled_volume,
                broker_reference: self
                    .broker_reference
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty()),
            },
        )
    }
}
