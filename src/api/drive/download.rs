use super::client::endpoint;
use crate::config::UploaderConfig;
use crate::error::{UploadError, UploadResult};
use crate::upload_manager::services::CredentialProvider;
use url::Url;

/// 构造 `{base}/download?id=<nodeId>&apikey=<token>`，参数按 query 规则编码。
pub fn download_url(base: &Url, node_id: &str, api_key: &str) -> UploadResult<Url> {
    if node_id.trim().is_empty() {
        return Err(UploadError::InvalidInput("node id is required".to_string()));
    }
    let mut url = endpoint(base, "download")?;
    url.query_pairs_mut()
        .append_pair("id", node_id)
        .append_pair("apikey", api_key);
    Ok(url)
}

/// 用系统浏览器打开下载链接，返回打开的地址。
pub fn open_download(
    config: &UploaderConfig,
    credentials: &dyn CredentialProvider,
    node_id: &str,
) -> UploadResult<Url> {
    let url = download_url(&config.api_endpoint, node_id, &credentials.api_key()?)?;
    webbrowser::open(url.as_str()).map_err(|e| UploadError::Browser(e.to_string()))?;
    tracing::info!(node = node_id, "download link opened");
    Ok(url)
}
