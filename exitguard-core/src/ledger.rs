//! Close-command ledger: the only writer of close commands.
//!
//! Two primitives carry the whole lifecycle:
//! - [`Ledger::create`]: issue a command for a position, refusing while another
//!   command for the same position is PENDING/ACKNOWLEDGED.
//! - [`Ledger::apply_ack`]: move a command to EXECUTED/FAILED from a device report,
//!   closing the position on success.
//!
//! Both run in a single IMMEDIATE transaction. The partial unique index on
//! `close_commands(position_id)` backs the single-active rule at the storage
//! layer, and terminal updates are guarded on the active states so concurrent
//! acks linearize: the first one wins, later ones are absorbed or rejected.
//!
//! Commands never hold a handle to their position; everything is resolved by id.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{
    AckOutcome, CloseCommand, CloseReason, CommandId, CommandStatus, DeviceId, PendingClose,
    PositionId, PositionStatus,
};
use crate::store::{commands, positions, Database, StoreError};

/// Errors from ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("position {0} not found")]
    PositionNotFound(PositionId),

    #[error("position {0} is already closed")]
    PositionClosed(PositionId),

    #[error("position {position_id} already has active close command {command_id}")]
    ActiveCommandExists {
        position_id: PositionId,
        command_id: CommandId,
    },

    #[error("close command {0} not found")]
    CommandNotFound(CommandId),

    #[error("close command {command_id} is already {status} with a different outcome")]
    Conflict {
        command_id: CommandId,
        status: CommandStatus,
    },

    #[error("invalid outcome: {0}")]
    InvalidOutcome(&'static str),

    #[error("invalid expected price")]
    InvalidPrice,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Handle to the close-command ledger. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Ledger {
    db: Arc<Database>,
}

impl Ledger {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Issue a new PENDING command and move the position to CLOSING.
    pub fn create(
        &self,
        position_id: PositionId,
        reason: CloseReason,
        expected_price: f64,
        now: DateTime<Utc>,
    ) -> Result<CloseCommand, LedgerError> {
        if !expected_price.is_finite() || expected_price <= 0.0 {
            return Err(LedgerError::InvalidPrice);
        }

        let command = self.db.write(|tx| {
            let position =
                positions::get(tx, position_id)?.ok_or(LedgerError::PositionNotFound(position_id))?;
            if position.status == PositionStatus::Closed {
                return Err(LedgerError::PositionClosed(position_id));
            }
            if let Some(active) = commands::active_for_position(tx, position_id)? {
                return Err(LedgerError::ActiveCommandExists {
                    position_id,
                    command_id: active.id,
                });
            }

            let command = CloseCommand {
                id: CommandId::new(),
                position_id,
                device_id: position.device_id.clone(),
                reason,
                expected_price,
                actual_close_price: None,
                broker_reference: None,
                status: CommandStatus::Pending,
                created_at: now,
                acknowledged_at: None,
                executed_at: None,
                error_message: None,
            };

            if let Err(err) = commands::insert(tx, &command) {
                if err.is_unique_violation() {
                    let active = commands::active_for_position(tx, position_id)?;
                    return Err(LedgerError::ActiveCommandExists {
                        position_id,
                        command_id: active.map(|c| c.id).unwrap_or(command.id),
                    });
                }
                return Err(err.into());
            }
            positions::mark_closing(tx, position_id)?;
            Ok(command)
        })?;

        info!(
            command_id = %command.id,
            position_id = %command.position_id,
            device_id = %command.device_id,
            reason = %command.reason,
            "close command issued"
        );
        Ok(command)
    }

    /// The "create if none active" primitive shared by every close trigger.
    ///
    /// Returns `Ok(None)` when the position already has an active command.
    pub fn create_if_none_active(
        &self,
        position_id: PositionId,
        reason: CloseReason,
        expected_price: f64,
        now: DateTime<Utc>,
    ) -> Result<Option<CloseCommand>, LedgerError> {
        match self.create(position_id, reason, expected_price, now) {
            Ok(command) => Ok(Some(command)),
            Err(LedgerError::ActiveCommandExists { command_id, .. }) => {
                debug!(%position_id, %command_id, "close command already active");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Apply a device's execution report.
    ///
    /// Repeating a matching outcome on a terminal command returns the stored
    /// record unchanged; a different outcome is a [`LedgerError::Conflict`].
    /// A command not owned by `device_id` is reported as not found.
    pub fn apply_ack(
        &self,
        command_id: CommandId,
        device_id: &DeviceId,
        outcome: AckOutcome,
        now: DateTime<Utc>,
    ) -> Result<CloseCommand, LedgerError> {
        validate_outcome(&outcome)?;

        let (command, changed) = self.db.write(|tx| {
            let current = owned_command(tx, command_id, device_id)?;
            if !current.status.can_transition_to(outcome.target_status()) {
                return resolve_repeat(current, &outcome).map(|c| (c, false));
            }

            if !commands::finalize(tx, command_id, &outcome, now)? {
                // Another writer finalized it first.
                let current = owned_command(tx, command_id, device_id)?;
                return resolve_repeat(current, &outcome).map(|c| (c, false));
            }

            if let AckOutcome::Executed {
                actual_close_price, ..
            } = &outcome
            {
                let closed = positions::mark_closed(
                    tx,
                    current.position_id,
                    *actual_close_price,
                    current.reason,
                    now,
                )?;
                if !closed {
                    warn!(
                        position_id = %current.position_id,
                        %command_id,
                        "executed close for a position that was not CLOSING"
                    );
                }
            }

            let updated =
                commands::get(tx, command_id)?.ok_or(LedgerError::CommandNotFound(command_id))?;
            Ok((updated, true))
        })?;

        if changed {
            match command.status {
                CommandStatus::Executed => info!(
                    %command_id,
                    position_id = %command.position_id,
                    "close command executed, position closed"
                ),
                _ => warn!(
                    %command_id,
                    position_id = %command.position_id,
                    error = command.error_message.as_deref().unwrap_or(""),
                    "close command failed, position stays CLOSING"
                ),
            }
        } else {
            debug!(%command_id, "duplicate ack absorbed");
        }
        Ok(command)
    }

    /// Optional receipt: PENDING → ACKNOWLEDGED. Idempotent while active.
    pub fn mark_received(
        &self,
        command_id: CommandId,
        device_id: &DeviceId,
        now: DateTime<Utc>,
    ) -> Result<CloseCommand, LedgerError> {
        self.db.write(|tx| {
            let current = owned_command(tx, command_id, device_id)?;
            match current.status {
                CommandStatus::Acknowledged => Ok(current),
                status if status.can_transition_to(CommandStatus::Acknowledged) => {
                    commands::mark_acknowledged(tx, command_id, now)?;
                    commands::get(tx, command_id)?.ok_or(LedgerError::CommandNotFound(command_id))
                }
                status => Err(LedgerError::Conflict { command_id, status }),
            }
        })
    }

    pub fn get(&self, command_id: CommandId) -> Result<Option<CloseCommand>, LedgerError> {
        self.db
            .read(|conn| commands::get(conn, command_id).map_err(LedgerError::from))
    }

    pub fn active_for_position(
        &self,
        position_id: PositionId,
    ) -> Result<Option<CloseCommand>, LedgerError> {
        self.db.read(|conn| {
            commands::active_for_position(conn, position_id).map_err(LedgerError::from)
        })
    }

    /// Every command ever issued for a position, oldest first.
    pub fn history(&self, position_id: PositionId) -> Result<Vec<CloseCommand>, LedgerError> {
        self.db
            .read(|conn| commands::list_for_position(conn, position_id).map_err(LedgerError::from))
    }

    /// Commands a device still has to act on.
    pub fn pending_for_device(
        &self,
        device_id: &DeviceId,
        include_acknowledged: bool,
    ) -> Result<Vec<PendingClose>, LedgerError> {
        let statuses: &[CommandStatus] = if include_acknowledged {
            &[CommandStatus::Pending, CommandStatus::Acknowledged]
        } else {
            &[CommandStatus::Pending]
        };
        self.db.read(|conn| {
            commands::list_for_device(conn, device_id, statuses).map_err(LedgerError::from)
        })
    }

    /// Active commands older than `older_than`, for the external timeout job.
    pub fn stale_commands(
        &self,
        now: DateTime<Utc>,
        older_than: Duration,
    ) -> Result<Vec<CloseCommand>, LedgerError> {
        // Nothing can predate the start of the calendar.
        let Some(cutoff) = now.checked_sub_signed(older_than) else {
            return Ok(Vec::new());
        };
        self.db
            .read(|conn| commands::list_stale(conn, cutoff).map_err(LedgerError::from))
    }
}

fn validate_outcome(outcome: &AckOutcome) -> Result<(), LedgerError> {
    match outcome {
        AckOutcome::Executed {
            actual_close_price, ..
        } => {
            if !actual_close_price.is_finite() || *actual_close_price <= 0.0 {
                return Err(LedgerError::InvalidOutcome(
                    "actual_close_price must be a positive number",
                ));
            }
        }
        AckOutcome::Failed { error_message } => {
            if error_message.trim().is_empty() {
                return Err(LedgerError::InvalidOutcome("error_message must not be empty"));
            }
        }
    }
    Ok(())
}

fn owned_command(
    conn: &rusqlite::Connection,
    command_id: CommandId,
    device_id: &DeviceId,
) -> Result<CloseCommand, LedgerError> {
    match commands::get(conn, command_id)? {
        Some(command) if command.device_id == *device_id => Ok(command),
        _ => Err(LedgerError::CommandNotFound(command_id)),
    }
}

fn resolve_repeat(current: CloseCommand, outcome: &AckOutcome) -> Result<CloseCommand, LedgerError> {
    match current.recorded_outcome() {
        Some(recorded) if outcome.matches(&recorded) => Ok(current),
        _ => Err(LedgerError::Conflict {
            command_id: current.id,
            status: current.status,
        }),
    }
}
