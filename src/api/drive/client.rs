use super::models::ApiEnvelope;
use crate::error::{UploadError, UploadResult};
use reqwest::{redirect::Policy, Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

/// 构建统一重定向策略的异步 HTTP 客户端。
/// `timeout` 为 None 时不设整体超时：上传可能持续很久，由用户决定是否取消。
pub(crate) fn build_client(timeout: Option<Duration>) -> UploadResult<Client> {
    let mut builder = Client::builder().redirect(Policy::limited(10));
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| UploadError::InvalidConfig(format!("failed to build HTTP client: {e}")))
}

/// 在 API 根地址后拼接接口路径，保留根地址已有的路径前缀。
pub(crate) fn endpoint(base: &Url, path: &str) -> UploadResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| UploadError::InvalidConfig(format!("api endpoint {base} cannot be a base")))?
        .pop_if_empty()
        .push(path);
    Ok(url)
}

/// 解析目录类接口的 `{error, data}` 响应；`action` 只用于拼接错误信息。
pub(crate) async fn read_envelope<T: DeserializeOwned>(
    response: Response,
    action: &str,
) -> UploadResult<Option<T>> {
    let status = response.status();
    if status.as_u16() == 401 {
        return Err(UploadError::Credential(
            "api key rejected by server; please sign in again".to_string(),
        ));
    }
    if !status.is_success() {
        return Err(UploadError::DirectoryService(format!(
            "server returned HTTP {status} while {action}"
        )));
    }
    let envelope: ApiEnvelope<T> = response.json().await.map_err(|e| {
        UploadError::DirectoryService(format!("failed to parse response while {action}: {e}"))
    })?;
    if let Some(message) = envelope.reported_error() {
        return Err(UploadError::DirectoryService(format!(
            "server reported error while {action}: {message}"
        )));
    }
    Ok(envelope.data)
}
