// Persisted resource status
//
// One flat row keyed by `schema::STATUS_KEY`. Written after every lifecycle
// transition by the coordinator; read by clients on (re)activation.

use super::schema::STATUS_KEY;
use super::{current_timestamp_millis, db_error, Database};
use llama_relay_types::{ResourceStatus, StatusRecord};
use rusqlite::{params, OptionalExtension};

impl Database {
    /// Load the persisted status, `None` if no coordinator ever wrote one.
    pub fn load_status(&self) -> Result<Option<StatusRecord>, String> {
        let conn = self.connection();
        let row = conn
            .query_row(
                "SELECT status, detail_message, progress_percent
                 FROM resource_status WHERE name = ?1",
                [STATUS_KEY],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(db_error("load status"))?;

        Ok(row.map(|(status, detail_message, progress_percent)| {
            let status = ResourceStatus::parse(&status).unwrap_or_else(|| {
                log::warn!("Unknown persisted status '{status}', treating as not_loaded");
                ResourceStatus::NotLoaded
            });
            StatusRecord {
                status,
                detail_message,
                progress_percent: progress_percent.map(|p| p.clamp(0, 100) as u8),
            }
        }))
    }

    /// Write the status row (insert or replace, last writer wins).
    pub fn save_status(&self, record: &StatusRecord) -> Result<(), String> {
        let conn = self.connection();
        conn.execute(
            "INSERT INTO resource_status (name, status, detail_message, progress_percent, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(name) DO UPDATE SET
                status = excluded.status,
                detail_message = excluded.detail_message,
                progress_percent = excluded.progress_percent,
                updated_at = excluded.updated_at",
            params![
                STATUS_KEY,
                record.status.as_str(),
                record.detail_message,
                record.progress_percent.map(i64::from),
                current_timestamp_millis(),
            ],
        )
        .map_err(db_error("save status"))?;
        Ok(())
    }

    /// Return the persisted status, creating a `NotLoaded` row on the very
    /// first activation.
    pub fn ensure_status(&self) -> Result<StatusRecord, String> {
        if let Some(record) = self.load_status()? {
            return Ok(record);
        }
        let record = StatusRecord::not_loaded();
        self.save_status(&record)?;
        Ok(record)
    }
}
