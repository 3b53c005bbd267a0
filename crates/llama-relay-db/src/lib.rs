// SQLite database for the relay
// Holds the persisted resource status and the relay configuration row.
// The coordinator is the only writer; the worker and clients only read.

pub mod config;
pub mod schema;
pub mod status;

use rusqlite::{Connection, OpenFlags};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub use config::RelayConfig;

/// How long a connection waits on a lock held by another process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Main database wrapper
pub struct Database {
    conn: Mutex<Connection>,
}

/// Shared database type for passing across async boundaries
pub type SharedDatabase = Arc<Database>;

/// Helper function to create standardized database error messages
///
/// Usage: `.map_err(db_error("save status"))?`
pub fn db_error(context: &str) -> impl Fn(rusqlite::Error) -> String + '_ {
    move |e| format!("Failed to {context}: {e}")
}

impl Database {
    /// Open (or create) the database and initialize schema
    pub fn new(db_path: &str) -> Result<Self, String> {
        let conn = Connection::open(db_path).map_err(db_error("open database"))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(db_error("set busy timeout"))?;

        schema::initialize(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an existing database without creating or migrating anything.
    /// Clients use this so a stray client never creates the status record.
    pub fn open_read_only(db_path: &str) -> Result<Self, String> {
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(db_error("open database read-only"))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(db_error("set busy timeout"))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database with the full schema (tests, throwaway runs)
    pub fn open_in_memory() -> Result<Self, String> {
        let conn = Connection::open_in_memory().map_err(db_error("open in-memory database"))?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Get a reference to the connection (locked)
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave a rusqlite connection
        // half-written, so a poisoned lock is still usable.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Get current timestamp in milliseconds since Unix epoch
pub fn current_timestamp_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
