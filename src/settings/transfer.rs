use crate::db::Store;
use crate::error::{UploadError, UploadResult};
use std::time::Duration;

const REQUEST_TIMEOUT_KEY: &str = "request_timeout_secs";
const ROLLBACK_KEY: &str = "rollback_on_failure";
pub const MIN_REQUEST_TIMEOUT_SECS: u64 = 5;
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 300;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// 目录类请求的超时；缺失时返回默认值，越界值被夹到 [MIN, MAX]。
/// 上传请求本身不受此限制。
pub fn get_request_timeout(store: &Store) -> UploadResult<Duration> {
    let secs = match store.get_setting(REQUEST_TIMEOUT_KEY)? {
        Some(value) => parse_and_clamp(&value)?,
        None => DEFAULT_REQUEST_TIMEOUT_SECS,
    };
    Ok(Duration::from_secs(secs))
}

pub fn set_request_timeout(store: &Store, secs: u64) -> UploadResult<u64> {
    if !(MIN_REQUEST_TIMEOUT_SECS..=MAX_REQUEST_TIMEOUT_SECS).contains(&secs) {
        return Err(UploadError::InvalidConfig(format!(
            "request timeout must be between {MIN_REQUEST_TIMEOUT_SECS} and {MAX_REQUEST_TIMEOUT_SECS} seconds"
        )));
    }
    store.set_setting(REQUEST_TIMEOUT_KEY, &secs.to_string())?;
    Ok(secs)
}

pub fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

/// 失败时是否删除已创建的目录，默认开启。
pub fn get_rollback_on_failure(store: &Store) -> UploadResult<bool> {
    match store.get_setting(ROLLBACK_KEY)? {
        Some(value) => value
            .parse::<bool>()
            .map_err(|e| UploadError::InvalidConfig(format!("invalid rollback flag {value}: {e}"))),
        None => Ok(true),
    }
}

pub fn set_rollback_on_failure(store: &Store, enabled: bool) -> UploadResult<bool> {
    store.set_setting(ROLLBACK_KEY, &enabled.to_string())?;
    Ok(enabled)
}

fn parse_and_clamp(raw: &str) -> UploadResult<u64> {
    let parsed = raw
        .parse::<u64>()
        .map_err(|e| UploadError::InvalidConfig(format!("invalid request timeout value: {e}")))?;
    Ok(parsed.clamp(MIN_REQUEST_TIMEOUT_SECS, MAX_REQUEST_TIMEOUT_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_defaults_and_clamps() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::at(dir.path().join("test.db"));

        assert_eq!(get_request_timeout(&store).unwrap(), Duration::from_secs(30));
        assert!(set_request_timeout(&store, 1).is_err());
        assert_eq!(set_request_timeout(&store, 60).unwrap(), 60);
        assert_eq!(get_request_timeout(&store).unwrap(), Duration::from_secs(60));

        // 手工写入的越界值读取时被夹住
        store.set_setting("request_timeout_secs", "9999").unwrap();
        assert_eq!(get_request_timeout(&store).unwrap(), Duration::from_secs(300));
    }

    #[test]
    fn rollback_flag_defaults_to_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::at(dir.path().join("test.db"));

        assert!(get_rollback_on_failure(&store).unwrap());
        set_rollback_on_failure(&store, false).unwrap();
        assert!(!get_rollback_on_failure(&store).unwrap());
    }
}
