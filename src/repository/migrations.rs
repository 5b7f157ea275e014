//! Schema creation for the aggregate store.
//!
//! Tables are created idempotently when the store is opened, so an existing
//! database from an earlier run is reused as-is.

use diesel::connection::SimpleConnection;
use diesel::SqliteConnection;

use super::diesel_pool::DieselError;

/// Dimension tables: one unique string per row with a stable surrogate id.
const DIMENSION_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS addresses (
    id INTEGER PRIMARY KEY,
    value TEXT UNIQUE,
    first_seen TIMESTAMP
);

CREATE TABLE IF NOT EXISTS agents (
    id INTEGER PRIMARY KEY,
    value TEXT UNIQUE,
    first_seen TIMESTAMP
);

CREATE TABLE IF NOT EXISTS paths (
    id INTEGER PRIMARY KEY,
    value TEXT UNIQUE,
    first_seen TIMESTAMP
);
"#;

/// Fact table: one row per (day, address, agent, path, status).
const FACT_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS daily_logs (
    date TEXT,
    address_id INTEGER,
    agent_id INTEGER,
    path_id INTEGER,
    status INTEGER,
    count INTEGER,
    last_updated TIMESTAMP,
    PRIMARY KEY(date, address_id, agent_id, path_id, status)
);

CREATE INDEX IF NOT EXISTS idx_daily_logs_agent ON daily_logs(agent_id, date);
CREATE INDEX IF NOT EXISTS idx_daily_logs_path ON daily_logs(path_id, date);
"#;

const KV_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value INTEGER,
    updated_at TIMESTAMP
);
"#;

/// Create every table and index the store needs.
pub fn run_migrations(conn: &mut SqliteConnection) -> Result<(), DieselError> {
    conn.batch_execute(DIMENSION_TABLES)?;
    conn.batch_execute(FACT_TABLE)?;
    conn.batch_execute(KV_TABLE)?;
    Ok(())
}
