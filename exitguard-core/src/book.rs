//! Position book: opens positions and answers position lookups.
//!
//! Status changes after open belong to the ledger; the book only creates rows
//! and reads them back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

use crate::breach::levels_are_ordered;
use crate::domain::{
    DeviceId, HiddenExitLevels, NewPosition, Position, PositionId, PositionStatus,
};
use crate::store::{devices, positions, Database, StoreError};

/// Errors from position book operations.
#[derive(Debug, Error)]
pub enum PositionError {
    #[error("invalid position: {0}")]
    Invalid(&'static str),

    #[error("device {0} is not registered or is revoked")]
    UnknownDevice(DeviceId),

    #[error("position {0} not found")]
    NotFound(PositionId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Handle to the position store. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PositionBook {
    db: Arc<Database>,
}

impl PositionBook {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Open a position for a device. The stop/target pair is fixed from here on.
    pub fn open_position(
        &self,
        new: NewPosition,
        now: DateTime<Utc>,
    ) -> Result<Position, PositionError> {
        validate(&new)?;

        let position = Position {
            id: PositionId::new(),
            device_id: new.device_id,
            instrument: new.instrument.trim().to_string(),
            side: new.side,
            requested_entry_price: new.entry_price,
            requested_volume: new.volume,
            actual_entry_price: None,
            filled_volume: None,
            entry_broker_reference: None,
            entry_filled_at: None,
            exit_levels: HiddenExitLevels::new(new.stop_level, new.target_level),
            status: PositionStatus::Open,
            close_price: None,
            close_reason: None,
            opened_at: now,
            closed_at: None,
        };

        self.db.write(|tx| {
            match devices::get(tx, &position.device_id)? {
                Some(device) if device.is_active() => {}
                _ => return Err(PositionError::UnknownDevice(position.device_id.clone())),
            }
            positions::insert(tx, &position)?;
            Ok(())
        })?;

        info!(
            position_id = %position.id,
            device_id = %position.device_id,
            instrument = %position.instrument,
            side = %position.side,
            "position opened"
        );
        Ok(position)
    }

    pub fn get(&self, id: PositionId) -> Result<Position, PositionError> {
        self.db
            .read(|conn| positions::get(conn, id).map_err(PositionError::from))?
            .ok_or(PositionError::NotFound(id))
    }

    /// Positions the breach monitor must look at: OPEN, plus CLOSING ones whose
    /// last command failed and which therefore need a fresh command.
    pub fn monitorable(&self) -> Result<Vec<Position>, PositionError> {
        self.by_status(&[PositionStatus::Open, PositionStatus::Closing])
    }

    pub fn by_status(&self, statuses: &[PositionStatus]) -> Result<Vec<Position>, PositionError> {
        self.db
            .read(|conn| positions::list_by_status(conn, statuses).map_err(PositionError::from))
    }

    pub fn for_device(&self, device_id: &DeviceId) -> Result<Vec<Position>, PositionError> {
        self.db
            .read(|conn| positions::list_for_device(conn, device_id).map_err(PositionError::from))
    }
}

fn validate(new: &NewPosition) -> Result<(), PositionError> {
    if new.instrument.trim().is_empty() {
        return Err(PositionError::Invalid("instrument must not be empty"));
    }
    let prices = [new.entry_price, new.stop_level, new.target_level];
    if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
        return Err(PositionError::Invalid("prices must be positive numbers"));
    }
    if !new.volume.is_finite() || new.volume <= 0.0 {
        return Err(PositionError::Invalid("volume must be a positive number"));
    }
    if !levels_are_ordered(new.side, new.stop_level, new.target_level) {
        return Err(PositionError::Invalid(
            "exit levels out of order for side (BUY needs stop < target, SELL needs stop > target)",
        ));
    }
    Ok(())
}
