//! Schema migrations, applied in order and tracked with `PRAGMA user_version`.

/// Migration 1: devices, positions, close commands.
///
/// `idx_close_commands_one_active` is the storage-level guarantee that a position
/// never has two PENDING/ACKNOWLEDGED commands, even with several writers on
/// the same file.
pub const MIGRATION_V1: &str = r#"
CREATE TABLE IF NOT EXISTS devices (
    id          TEXT PRIMARY KEY,
    secret      TEXT NOT NULL,
    revoked     INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS positions (
    id                      TEXT PRIMARY KEY,
    device_id               TEXT NOT NULL REFERENCES devices(id),
    instrument              TEXT NOT NULL,
    side                    TEXT NOT NULL CHECK (side IN ('BUY', 'SELL')),
    requested_entry_price   REAL NOT NULL,
    requested_volume        REAL NOT NULL,
    actual_entry_price      REAL,
    filled_volume           REAL,
    entry_broker_reference  TEXT,
    entry_filled_at         TEXT,
    stop_level              REAL NOT NULL,
    target_level            REAL NOT NULL,
    status                  TEXT NOT NULL CHECK (status IN ('OPEN', 'CLOSING', 'CLOSED')),
    close_price             REAL,
    close_reason            TEXT,
    opened_at               TEXT NOT NULL,
    closed_at               TEXT
);

CREATE INDEX IF NOT EXISTS idx_positions_status ON positions(status);
CREATE INDEX IF NOT EXISTS idx_positions_device ON positions(device_id);

CREATE TRIGGER IF NOT EXISTS positions_exit_levels_immutable
BEFORE UPDATE OF stop_level, target_level ON positions
BEGIN
    SELECT RAISE(ABORT, 'exit levels are immutable');
END;

CREATE TABLE IF NOT EXISTS close_commands (
    id                  TEXT PRIMARY KEY,
    position_id         TEXT NOT NULL REFERENCES positions(id),
    device_id           TEXT NOT NULL REFERENCES devices(id),
    reason              TEXT NOT NULL,
    expected_price      REAL NOT NULL,
    actual_close_price  REAL,
    broker_reference    TEXT,
    status              TEXT NOT NULL
                        CHECK (status IN ('PENDING', 'ACKNOWLEDGED', 'EXECUTED', 'FAILED')),
    created_at          TEXT NOT NULL,
    acknowledged_at     TEXT,
    executed_at         TEXT,
    error_message       TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_close_commands_one_active
    ON close_commands(position_id)
    WHERE status IN ('PENDING', 'ACKNOWLEDGED');

CREATE INDEX IF NOT EXISTS idx_close_commands_device_status
    ON close_commands(device_id, status);

CREATE INDEX IF NOT EXISTS idx_close_commands_position
    ON close_commands(position_id, created_at);

CREATE TRIGGER IF NOT EXISTS close_commands_terminal_immutable
BEFORE UPDATE ON close_commands
WHEN OLD.status IN ('EXECUTED', 'FAILED')
BEGIN
    SELECT RAISE(ABORT, 'terminal close command is immutable');
END;
"#;

/// All migrations; index + 1 is the resulting `user_version`.
pub const MIGRATIONS: &[&str] = &[MIGRATION_V1];
