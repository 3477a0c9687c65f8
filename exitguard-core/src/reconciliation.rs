//! Reconciliation helper: entry fills reported by devices, and drift against the request.
//!
//! The recorded fill is audit data only. Breach evaluation keeps using the
//! exit levels fixed at open.

use std::io::Write;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{DeviceId, Position, PositionId, PositionStatus, Side};
use crate::store::{positions, Database, StoreError};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("position {0} not found")]
    NotFound(PositionId),

    #[error("position {0} already has a different recorded entry fill")]
    Conflict(PositionId),

    #[error("invalid entry fill: {0}")]
    Invalid(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Entry fill as reported by the device that opened the position.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryFill {
    pub actual_entry_price: f64,
    pub filled_volume: f64,
    pub broker_reference: Option<String>,
}

/// Requested vs actual entry for one filled position.
#[derive(Debug, Clone, PartialEq)]
pub struct DriftRow {
    pub position_id: PositionId,
    pub device_id: DeviceId,
    pub instrument: String,
    pub side: Side,
    pub status: PositionStatus,
    pub requested_entry_price: f64,
    pub actual_entry_price: f64,
    /// Price units, positive when the fill was worse than requested.
    pub slippage: f64,
    pub slippage_bps: f64,
    pub requested_volume: f64,
    pub filled_volume: f64,
    pub volume_shortfall: f64,
    pub entry_filled_at: Option<DateTime<Utc>>,
}

impl DriftRow {
    fn from_position(p: &Position) -> Option<Self> {
        let actual = p.actual_entry_price?;
        let filled = p.filled_volume?;
        let slippage = match p.side {
            Side::Buy => actual - p.requested_entry_price,
            Side::Sell => p.requested_entry_price - actual,
        };
        Some(Self {
            position_id: p.id,
            device_id: p.device_id.clone(),
            instrument: p.instrument.clone(),
            side: p.side,
            status: p.status,
            requested_entry_price: p.requested_entry_price,
            actual_entry_price: actual,
            slippage,
            slippage_bps: slippage / p.requested_entry_price * 10_000.0,
            requested_volume: p.requested_volume,
            filled_volume: filled,
            volume_shortfall: p.requested_volume - filled,
            entry_filled_at: p.entry_filled_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    db: Arc<Database>,
}

impl Reconciler {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Record the fill a device reports for a position it opened.
    ///
    /// The first report wins. Repeating it with the same price and volume is a
    /// no-op; different values are a conflict. Positions owned by another
    /// device are reported as not found.
    pub fn record_entry_fill(
        &self,
        position_id: PositionId,
        device_id: &DeviceId,
        fill: EntryFill,
        now: DateTime<Utc>,
    ) -> Result<Position, ReconcileError> {
        if !fill.actual_entry_price.is_finite() || fill.actual_entry_price <= 0.0 {
            return Err(ReconcileError::Invalid(
                "actual_entry_price must be a positive number",
            ));
        }
        if !fill.filled_volume.is_finite() || fill.filled_volume <= 0.0 {
            return Err(ReconcileError::Invalid("filled_volume must be a positive number"));
        }

        let (position, changed) = self.db.write(|tx| {
            let current = match positions::get(tx, position_id)? {
                Some(p) if p.device_id == *device_id => p,
                _ => return Err(ReconcileError::NotFound(position_id)),
            };

            if let Some(recorded) = current.actual_entry_price {
                let same = recorded == fill.actual_entry_price
                    && current.filled_volume == Some(fill.filled_volume);
                return if same {
                    Ok((current, false))
                } else {
                    Err(ReconcileError::Conflict(position_id))
                };
            }

            positions::record_entry_fill(
                tx,
                position_id,
                fill.actual_entry_price,
                fill.filled_volume,
                fill.broker_reference.as_deref(),
                now,
            )?;
            let updated =
                positions::get(tx, position_id)?.ok_or(ReconcileError::NotFound(position_id))?;
            Ok((updated, true))
        })?;

        if changed {
            info!(%position_id, device_id = %device_id, "entry fill recorded");
        } else {
            debug!(%position_id, "duplicate entry fill absorbed");
        }
        Ok(position)
    }

    /// Drift for every position with a recorded fill, oldest first.
    pub fn drift_report(&self) -> Result<Vec<DriftRow>, ReconcileError> {
        let all = self
            .db
            .read(|conn| positions::list_all(conn).map_err(ReconcileError::from))?;
        Ok(all.iter().filter_map(DriftRow::from_position).collect())
    }
}

/// Write drift rows as CSV.
pub fn write_drift_csv<W: Write>(rows: &[DriftRow], out: W) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_writer(out);

    wtr.write_record([
        "position_id",
        "device_id",
        "instrument",
        "side",
        "status",
        "requested_entry_price",
        "actual_entry_price",
        "slippage",
        "slippage_bps",
        "requested_volume",
        "filled_volume",
        "volume_shortfall",
        "entry_filled_at",
    ])?;

    for r in rows {
        wtr.write_record([
            &r.position_id.to_string(),
            r.device_id.as_str(),
            &r.instrument,
            r.side.as_str(),
            r.status.as_str(),
            &format!("{:.6}", r.requested_entry_price),
            &format!("{:.6}", r.actual_entry_price),
            &format!("{:.6}", r.slippage),
            &format!("{:.2}", r.slippage_bps),
            &format!("{:.6}", r.requested_volume),
            &format!("{:.6}", r.filled_volume),
            &format!("{:.6}", r.volume_shortfall),
            &r.entry_filled_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
