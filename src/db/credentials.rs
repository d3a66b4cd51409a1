use super::Store;
use crate::error::{UploadError, UploadResult};
use crate::upload_manager::progress::current_timestamp;
use crate::upload_manager::services::CredentialProvider;
use rusqlite::{params, OptionalExtension};

/// api key 单行表，跨多次启动复用登录状态。
pub(crate) const CREDENTIALS_TABLE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS credentials (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    api_key TEXT NOT NULL,
    updated_at_millis INTEGER NOT NULL
);";

impl Store {
    pub fn save_api_key(&self, api_key: &str) -> UploadResult<()> {
        if api_key.trim().is_empty() {
            return Err(UploadError::InvalidInput("api key cannot be empty".to_string()));
        }
        let updated_at = current_timestamp();
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO credentials (id, api_key, updated_at_millis) VALUES (1, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    api_key = excluded.api_key,
                    updated_at_millis = excluded.updated_at_millis",
                params![api_key.trim(), updated_at],
            )
            .map_err(|e| UploadError::Storage(format!("failed to save api key: {e}")))?;
            Ok(())
        })
    }

    pub fn load_api_key(&self) -> UploadResult<Option<String>> {
        self.with_connection(|conn| {
            conn.query_row("SELECT api_key FROM credentials WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| UploadError::Storage(format!("failed to read api key: {e}")))
        })
    }

    pub fn clear_api_key(&self) -> UploadResult<()> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM credentials WHERE id = 1", [])
                .map_err(|e| UploadError::Storage(format!("failed to clear api key: {e}")))?;
            Ok(())
        })
    }
}

impl CredentialProvider for Store {
    fn api_key(&self) -> UploadResult<String> {
        self.load_api_key()?.ok_or_else(|| {
            UploadError::Credential("not signed in; run `dropupload login` first".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::at(dir.path().join("test.db"));

        assert!(matches!(store.api_key(), Err(UploadError::Credential(_))));
        store.save_api_key(" secret ").unwrap();
        assert_eq!(store.api_key().unwrap(), "secret");

        store.clear_api_key().unwrap();
        assert_eq!(store.load_api_key().unwrap(), None);
        assert!(matches!(
            store.save_api_key("  "),
            Err(UploadError::InvalidInput(_))
        ));
    }
}
