// Configuration database operations

use super::{current_timestamp_millis, db_error, Database};
use rusqlite::params;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7878";
pub const DEFAULT_RESOURCE_LOCATOR: &str = "echo://default";

/// Relay configuration stored in database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Passed to the resource host with every init command.
    pub resource_locator: String,
    /// Address the coordinator listens on for clients.
    pub listen_addr: String,
    /// Characters that end an output chunk. `None` = built-in punctuation
    /// and whitespace classes.
    pub boundary_chars: Option<String>,
    /// Reject a pending job after this many seconds. `None` = wait forever.
    pub job_timeout_secs: Option<u64>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            resource_locator: DEFAULT_RESOURCE_LOCATOR.to_string(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            boundary_chars: None,
            job_timeout_secs: None,
        }
    }
}

impl Database {
    /// Load configuration from database, falling back to defaults per column
    pub fn load_config(&self) -> RelayConfig {
        let defaults = RelayConfig::default();
        let conn = self.connection();
        let result = conn.query_row(
            "SELECT resource_locator, listen_addr, boundary_chars, job_timeout_secs
             FROM relay_config WHERE id = 1",
            [],
            |row| {
                Ok(RelayConfig {
                    resource_locator: row
                        .get::<_, Option<String>>(0)?
                        .unwrap_or_else(|| defaults.resource_locator.clone()),
                    listen_addr: row
                        .get::<_, Option<String>>(1)?
                        .unwrap_or_else(|| defaults.listen_addr.clone()),
                    boundary_chars: row
                        .get::<_, Option<String>>(2)?
                        .filter(|s| !s.is_empty()),
                    job_timeout_secs: row
                        .get::<_, Option<i64>>(3)?
                        .and_then(|secs| u64::try_from(secs).ok())
                        .filter(|secs| *secs > 0),
                })
            },
        );

        match result {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Failed to load relay config, using defaults: {e}");
                defaults
            }
        }
    }

    /// Save configuration to database
    pub fn save_config(&self, config: &RelayConfig) -> Result<(), String> {
        let conn = self.connection();
        conn.execute(
            "INSERT OR REPLACE INTO relay_config
                (id, resource_locator, listen_addr, boundary_chars, job_timeout_secs, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5)",
            params![
                config.resource_locator,
                config.listen_addr,
                config.boundary_chars,
                config.job_timeout_secs.map(|secs| secs as i64),
                current_timestamp_millis(),
            ],
        )
        .map_err(db_error("save config"))?;
        Ok(())
    }
}
