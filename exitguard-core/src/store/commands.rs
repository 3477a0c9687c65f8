use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::{
    format_time, parse_column, parse_optional_time_column, parse_time_column, StoreError,
};
use crate::domain::{
    AckOutcome, CloseCommand, CommandId, CommandStatus, DeviceId, PendingClose, PositionId,
};

const COLUMNS: &str = "c.id, c.position_id, c.device_id, c.reason, c.expected_price, \
     c.actual_close_price, c.broker_reference, c.status, c.created_at, c.acknowledged_at, \
     c.executed_at, c.error_message";

const COLUMN_COUNT: usize = 12;

fn row_to_command(row: &Row<'_>) -> rusqlite::Result<CloseCommand> {
    Ok(CloseCommand {
        id: parse_column(row, 0)?,
        position_id: parse_column(row, 1)?,
        device_id: DeviceId::new(row.get::<_, String>(2)?),
        reason: parse_column(row, 3)?,
        expected_price: row.get(4)?,
        actual_close_price: row.get(5)?,
        broker_reference: row.get(6)?,
        status: parse_column(row, 7)?,
        created_at: parse_time_column(row, 8)?,
        acknowledged_at: parse_optional_time_column(row, 9)?,
        executed_at: parse_optional_time_column(row, 10)?,
        error_message: row.get(11)?,
    })
}

fn collect(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<CloseCommand>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, row_to_command)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Insert a new command. Fails with a UNIQUE violation if the position already
/// has an active command.
pub fn insert(conn: &Connection, command: &CloseCommand) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO close_commands (id, position_id, device_id, reason, expected_price, \
         actual_close_price, broker_reference, status, created_at, acknowledged_at, \
         executed_at, error_message) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            command.id.to_string(),
            command.position_id.to_string(),
            command.device_id.as_str(),
            command.reason.as_str(),
            command.expected_price,
            command.actual_close_price,
            command.broker_reference,
            command.status.as_str(),
            format_time(command.created_at),
            command.acknowledged_at.map(format_time),
            command.executed_at.map(format_time),
            command.error_message,
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: CommandId) -> Result<Option<CloseCommand>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM close_commands c WHERE c.id = ?1");
    Ok(conn
        .query_row(&sql, params![id.to_string()], row_to_command)
        .optional()?)
}

pub fn active_for_position(
    conn: &Connection,
    position_id: PositionId,
) -> Result<Option<CloseCommand>, StoreError> {
    let sql = format!(
        "SELECT {COLUMNS} FROM close_commands c \
         WHERE c.position_id = ?1 AND c.status IN ('PENDING', 'ACKNOWLEDGED')"
    );
    Ok(conn
        .query_row(&sql, params![position_id.to_string()], row_to_command)
        .optional()?)
}

/// Full command history of a position, oldest first.
pub fn list_for_position(
    conn: &Connection,
    position_id: PositionId,
) -> Result<Vec<CloseCommand>, StoreError> {
    let sql = format!(
        "SELECT {COLUMNS} FROM close_commands c WHERE c.position_id = ?1 \
         ORDER BY c.created_at, c.id"
    );
    collect(conn, &sql, params![position_id.to_string()])
}

/// Commands of `device` in one of `statuses`, joined with instrument and side.
pub fn list_for_device(
    conn: &Connection,
    device: &DeviceId,
    statuses: &[CommandStatus],
) -> Result<Vec<PendingClose>, StoreError> {
    if statuses.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; statuses.len()].join(", ");
    let sql = format!(
        "SELECT {COLUMNS}, p.instrument, p.side FROM close_commands c \
         JOIN positions p ON p.id = c.position_id \
         WHERE c.device_id = ? AND c.status IN ({placeholders}) \
         ORDER BY c.created_at, c.id"
    );
    let mut values: Vec<String> = vec![device.as_str().to_string()];
    values.extend(statuses.iter().map(|s| s.as_str().to_string()));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
        Ok(PendingClose {
            command: row_to_command(row)?,
            instrument: row.get(COLUMN_COUNT)?,
            side: parse_column(row, COLUMN_COUNT + 1)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Active commands created before `before`, oldest first.
pub fn list_stale(
    conn: &Connection,
    before: DateTime<Utc>,
) -> Result<Vec<CloseCommand>, StoreError> {
    let sql = format!(
        "SELECT {COLUMNS} FROM close_commands c \
         WHERE c.status IN ('PENDING', 'ACKNOWLEDGED') AND c.created_at < ?1 \
         ORDER BY c.created_at, c.id"
    );
    collect(conn, &sql, params![format_time(before)])
}

/// PENDING → ACKNOWLEDGED. Returns false if the command was not PENDING.
pub fn mark_acknowledged(
    conn: &Connection,
    id: CommandId,
    at: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "UPDATE close_commands SET status = 'ACKNOWLEDGED', acknowledged_at = ?2 \
         WHERE id = ?1 AND status = 'PENDING'",
        params![id.to_string(), format_time(at)],
    )?;
    Ok(changed == 1)
}

/// Active → EXECUTED/FAILED. Guarded on the active states so that of two racing
/// acks only the first changes the row; returns false for the loser.
pub fn finalize(
    conn: &Connection,
    id: CommandId,
    outcome: &AckOutcome,
    at: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let changed = match outcome {
        AckOutcome::Executed {
            actual_close_price,
            broker_reference,
        } => conn.execute(
            "UPDATE close_commands SET status = 'EXECUTED', actual_close_price = ?2, \
             broker_reference = ?3, executed_at = ?4 \
             WHERE id = ?1 AND status IN ('PENDING', 'ACKNOWLEDGED')",
            params![
                id.to_string(),
                actual_close_price,
                broker_reference,
                format_time(at)
            ],
        )?,
        AckOutcome::Failed { error_message } => conn.execute(
            "UPDATE close_commands SET status = 'FAILED', error_message = ?2, executed_at = ?3 \
             WHERE id = ?1 AND status IN ('PENDING', 'ACKNOWLEDGED')",
            params![id.to_string(), error_message, format_time(at)],
        )?,
    };
    Ok(changed == 1)
}
