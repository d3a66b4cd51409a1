use crate::error::{UploadError, UploadResult};
use directories::ProjectDirs;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};

pub mod credentials;
pub mod settings;

const QUALIFIER: &str = "com";
const ORGANIZATION: &str = "Dropupload";
const APPLICATION: &str = "Dropupload";
const DB_FILE_NAME: &str = "dropupload.db";

/// 本地 SQLite 存储：设置项与 api key。每次操作单独打开连接。
#[derive(Clone, Debug)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    /// 平台数据目录下的默认数据库文件。
    pub fn open_default() -> UploadResult<Self> {
        let dirs = ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION).ok_or_else(|| {
            UploadError::Storage("failed to resolve application data directory".to_string())
        })?;
        let store = Self::at(dirs.data_dir().join(DB_FILE_NAME));
        store.init()?;
        Ok(store)
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 建库建表；后续每次打开连接时也会执行，重复调用无副作用。
    pub fn init(&self) -> UploadResult<()> {
        self.with_connection(|_| Ok(()))
    }

    pub(crate) fn with_connection<T, F>(&self, operation: F) -> UploadResult<T>
    where
        F: FnOnce(&Connection) -> UploadResult<T>,
    {
        let conn = self.open_connection()?;
        operation(&conn)
    }

    fn open_connection(&self) -> UploadResult<Connection> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| {
                UploadError::Storage(format!("failed to create database directory {dir:?}: {e}"))
            })?;
        }

        let conn = Connection::open(&self.path)
            .map_err(|e| UploadError::Storage(format!("failed to open SQLite database: {e}")))?;
        apply_migrations(&conn)?;
        Ok(conn)
    }
}

fn apply_migrations(conn: &Connection) -> UploadResult<()> {
    let schema = [
        settings::SETTINGS_TABLE_SCHEMA,
        credentials::CREDENTIALS_TABLE_SCHEMA,
    ]
    .concat();
    conn.execute_batch(&schema)
        .map_err(|e| UploadError::Storage(format!("failed to initialize database schema: {e}")))
}
