use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::{
    format_time, parse_column, parse_optional_column, parse_optional_time_column,
    parse_time_column, StoreError,
};
use crate::domain::{
    CloseReason, DeviceId, HiddenExitLevels, Position, PositionId, PositionStatus,
};

const COLUMNS: &str = "id, device_id, instrument, side, requested_entry_price, requested_volume, \
     actual_entry_price, filled_volume, entry_broker_reference, entry_filled_at, \
     stop_level, target_level, status, close_price, close_reason, opened_at, closed_at";

fn row_to_position(row: &Row<'_>) -> rusqlite::Result<Position> {
    Ok(Position {
        id: parse_column(row, 0)?,
        device_id: DeviceId::new(row.get::<_, String>(1)?),
        instrument: row.get(2)?,
        side: parse_column(row, 3)?,
        requested_entry_price: row.get(4)?,
        requested_volume: row.get(5)?,
        actual_entry_price: row.get(6)?,
        filled_volume: row.get(7)?,
        entry_broker_reference: row.get(8)?,
        entry_filled_at: parse_optional_time_column(row, 9)?,
        exit_levels: HiddenExitLevels::new(row.get(10)?, row.get(11)?),
        status: parse_column(row, 12)?,
        close_price: row.get(13)?,
        close_reason: parse_optional_column(row, 14)?,
        opened_at: parse_time_column(row, 15)?,
        closed_at: parse_optional_time_column(row, 16)?,
    })
}

pub fn insert(conn: &Connection, position: &Position) -> Result<(), StoreError> {
    let levels = position.exit_levels();
    let sql = format!(
        "INSERT INTO positions ({COLUMNS}) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
    );
    conn.execute(
        &sql,
        params![
            position.id.to_string(),
            position.device_id.as_str(),
            position.instrument,
            position.side.as_str(),
            position.requested_entry_price,
            position.requested_volume,
            position.actual_entry_price,
            position.filled_volume,
            position.entry_broker_reference,
            position.entry_filled_at.map(format_time),
            levels.stop(),
            levels.target(),
            position.status.as_str(),
            position.close_price,
            position.close_reason.map(CloseReason::as_str),
            format_time(position.opened_at),
            position.closed_at.map(format_time),
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: PositionId) -> Result<Option<Position>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM positions WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id.to_string()], row_to_position)
        .optional()?)
}

/// Positions whose status is one of `statuses`, oldest first.
pub fn list_by_status(
    conn: &Connection,
    statuses: &[PositionStatus],
) -> Result<Vec<Position>, StoreError> {
    if statuses.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; statuses.len()].join(", ");
    let sql = format!(
        "SELECT {COLUMNS} FROM positions WHERE status IN ({placeholders}) ORDER BY opened_at, id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params_from_iter(statuses.iter().map(|s| s.as_str())),
        row_to_position,
    )?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn list_for_device(conn: &Connection, device: &DeviceId) -> Result<Vec<Position>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM positions WHERE device_id = ?1 ORDER BY opened_at, id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![device.as_str()], row_to_position)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn list_all(conn: &Connection) -> Result<Vec<Position>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM positions ORDER BY opened_at, id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], row_to_position)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// OPEN → CLOSING. CLOSING stays CLOSING. Returns false if the position is CLOSED or missing.
pub fn mark_closing(conn: &Connection, id: PositionId) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "UPDATE positions SET status = 'CLOSING' WHERE id = ?1 AND status IN ('OPEN', 'CLOSING')",
        params![id.to_string()],
    )?;
    Ok(changed == 1)
}

/// CLOSING → CLOSED with close price and reason. Returns false if not CLOSING.
pub fn mark_closed(
    conn: &Connection,
    id: PositionId,
    close_price: f64,
    reason: CloseReason,
    at: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "UPDATE positions SET status = 'CLOSED', close_price = ?2, close_reason = ?3, closed_at = ?4 \
         WHERE id = ?1 AND status = 'CLOSING'",
        params![id.to_string(), close_price, reason.as_str(), format_time(at)],
    )?;
    Ok(changed == 1)
}

/// Record the reconciled entry fill. Only writes when no fill is recorded yet.
pub fn record_entry_fill(
    conn: &Connection,
    id: PositionId,
    actual_entry_price: f64,
    filled_volume: f64,
    broker_reference: Option<&str>,
    at: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "UPDATE positions SET actual_entry_price = ?2, filled_volume = ?3, \
         entry_broker_reference = ?4, entry_filled_at = ?5 \
         WHERE id = ?1 AND actual_entry_price IS NULL",
        params![
            id.to_string(),
            actual_entry_price,
            filled_volume,
            broker_reference,
            format_time(at)
        ],
    )?;
    Ok(changed == 1)
}
