use super::client::{endpoint, read_envelope};
use super::models::DriveNode;
use crate::error::{UploadError, UploadResult};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use url::Url;

#[derive(Serialize)]
struct DeleteNodesRequest<'a> {
    apikey: &'a str,
    ids: Vec<&'a str>,
}

/// 批量删除节点，用于撤销本次上传创建的目录。
pub(crate) async fn delete_nodes(
    client: &Client,
    base: &Url,
    api_key: &str,
    nodes: &[DriveNode],
) -> UploadResult<()> {
    if nodes.is_empty() {
        return Ok(());
    }

    let url = endpoint(base, "delete")?;
    let request = DeleteNodesRequest {
        apikey: api_key,
        ids: nodes.iter().map(|node| node.id.as_str()).collect(),
    };
    let response = client
        .post(url)
        .header("Accept", "application/json")
        .json(&request)
        .send()
        .await
        .map_err(|e| UploadError::DirectoryService(format!("failed to delete nodes: {e}")))?;

    read_envelope::<Value>(response, "deleting nodes").await?;
    Ok(())
}
