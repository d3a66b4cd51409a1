use super::Store;
use crate::error::{UploadError, UploadResult};
use crate::upload_manager::progress::current_timestamp;
use rusqlite::{params, OptionalExtension};

pub(crate) const SETTINGS_TABLE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at_millis INTEGER NOT NULL
);";

impl Store {
    pub fn get_setting(&self, key: &str) -> UploadResult<Option<String>> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT value FROM settings WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| UploadError::Storage(format!("failed to query setting {key}: {e}")))
        })
    }

    pub fn set_setting(&self, key: &str, value: &str) -> UploadResult<()> {
        let updated_at = current_timestamp();
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO settings (key, value, updated_at_millis) VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at_millis = excluded.updated_at_millis",
                params![key, value, updated_at],
            )
            .map_err(|e| UploadError::Storage(format!("failed to upsert setting {key}: {e}")))?;
            Ok(())
        })
    }
}
