use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_time, parse_time_column, StoreError};
use crate::domain::{Device, DeviceId};

const COLUMNS: &str = "id, secret, revoked, created_at";

fn row_to_device(row: &Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        id: DeviceId::new(row.get::<_, String>(0)?),
        secret: row.get(1)?,
        revoked: row.get::<_, i64>(2)? != 0,
        created_at: parse_time_column(row, 3)?,
    })
}

pub fn insert(conn: &Connection, device: &Device) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO devices (id, secret, revoked, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            device.id.as_str(),
            device.secret,
            device.revoked as i64,
            format_time(device.created_at)
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: &DeviceId) -> Result<Option<Device>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM devices WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id.as_str()], row_to_device)
        .optional()?)
}

pub fn list(conn: &Connection) -> Result<Vec<Device>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM devices ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], row_to_device)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Returns false when the device does not exist.
pub fn set_revoked(conn: &Connection, id: &DeviceId, revoked: bool) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "UPDATE devices SET revoked = ?2 WHERE id = ?1",
        params![id.as_str(), revoked as i64],
    )?;
    Ok(changed == 1)
}
