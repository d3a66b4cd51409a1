use crate::db::Store;
use crate::error::{UploadError, UploadResult};
use std::env;
use url::Url;

const API_ENDPOINT_KEY: &str = "api_endpoint";
pub const API_ENDPOINT_ENV: &str = "DROPUPLOAD_API_ENDPOINT";
const DEFAULT_API_ENDPOINT: &str = "http://localhost:8080/api";

/// 读取 API 根地址：设置表优先，其次环境变量，最后内置默认值。
pub fn get_api_endpoint(store: &Store) -> UploadResult<Url> {
    if let Some(value) = store.get_setting(API_ENDPOINT_KEY)? {
        return parse_endpoint(&value);
    }
    match env::var(API_ENDPOINT_ENV) {
        Ok(value) if !value.trim().is_empty() => parse_endpoint(&value),
        _ => default_api_endpoint(),
    }
}

pub fn set_api_endpoint(store: &Store, raw: &str) -> UploadResult<Url> {
    let url = parse_endpoint(raw)?;
    store.set_setting(API_ENDPOINT_KEY, url.as_str())?;
    Ok(url)
}

pub fn default_api_endpoint() -> UploadResult<Url> {
    parse_endpoint(DEFAULT_API_ENDPOINT)
}

fn parse_endpoint(raw: &str) -> UploadResult<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| UploadError::InvalidConfig(format!("invalid api endpoint {raw}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(UploadError::InvalidConfig(format!(
            "api endpoint must use http or https: {raw}"
        )));
    }
    Ok(url)
}
