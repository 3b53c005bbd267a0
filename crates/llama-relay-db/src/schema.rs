// Database schema definitions for the relay

use super::db_error;
use rusqlite::Connection;

/// Name of the single persisted status row.
pub const STATUS_KEY: &str = "resource";

const CREATE_STATUS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS resource_status (
    name TEXT PRIMARY KEY,
    status TEXT NOT NULL DEFAULT 'not_loaded',
    detail_message TEXT,
    progress_percent INTEGER,
    updated_at INTEGER NOT NULL
)
"#;

const CREATE_CONFIG_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS relay_config (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    resource_locator TEXT,
    listen_addr TEXT,
    boundary_chars TEXT,
    job_timeout_secs INTEGER,
    updated_at INTEGER NOT NULL
)
"#;

/// Initialize the database schema (create all tables)
pub fn initialize(conn: &Connection) -> Result<(), String> {
    let statements = [
        ("resource_status", CREATE_STATUS_TABLE),
        ("relay_config", CREATE_CONFIG_TABLE),
    ];

    for (name, sql) in statements.iter() {
        conn.execute(sql, [])
            .map_err(db_error(&format!("create {name}")))?;
    }

    // Insert default config row if it doesn't exist
    conn.execute(
        "INSERT OR IGNORE INTO relay_config (id, updated_at) VALUES (1, ?1)",
        [super::current_timestamp_millis()],
    )
    .map_err(db_error("insert default config"))?;

    Ok(())
}
