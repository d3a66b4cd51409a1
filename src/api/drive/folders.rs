use super::client::{build_client, endpoint, read_envelope};
use super::delete::delete_nodes;
use super::models::{id_from_value, DriveNode};
use crate::config::UploaderConfig;
use crate::error::{UploadError, UploadResult};
use crate::upload_manager::entry::{VirtualDirectory, VirtualId};
use crate::upload_manager::materializer::{DirectoryService, IdMap, MaterializedFolders};
use crate::upload_manager::services::CredentialProvider;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;

/// 通过 HTTP 接口批量建目录、删除节点。
pub struct HttpDirectoryService {
    client: Client,
    base: Url,
    credentials: Arc<dyn CredentialProvider>,
}

#[derive(Serialize)]
struct CreateFoldersRequest<'a> {
    apikey: &'a str,
    parent: &'a str,
    folders: Vec<FolderSpec<'a>>,
}

#[derive(Serialize)]
struct FolderSpec<'a> {
    id: VirtualId,
    parent: VirtualId,
    name: &'a str,
}

impl<'a> From<&'a VirtualDirectory> for FolderSpec<'a> {
    fn from(dir: &'a VirtualDirectory) -> Self {
        Self {
            id: dir.virtual_id,
            parent: dir.parent_virtual_id,
            name: &dir.name,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedFolders {
    id_map: BTreeMap<String, Value>,
    #[serde(default)]
    nodes: Vec<DriveNode>,
}

impl HttpDirectoryService {
    pub fn new(
        config: &UploaderConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> UploadResult<Self> {
        Ok(Self {
            client: build_client(Some(config.request_timeout))?,
            base: config.api_endpoint.clone(),
            credentials,
        })
    }
}

#[async_trait]
impl DirectoryService for HttpDirectoryService {
    async fn create_folders(
        &self,
        directories: &[VirtualDirectory],
        target_parent: &str,
    ) -> UploadResult<MaterializedFolders> {
        let api_key = self.credentials.api_key()?;
        let url = endpoint(&self.base, "createFolders")?;
        let request = CreateFoldersRequest {
            apikey: &api_key,
            parent: target_parent,
            folders: directories.iter().map(FolderSpec::from).collect(),
        };

        let response = self
            .client
            .post(url)
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| UploadError::DirectoryService(format!("failed to create folders: {e}")))?;

        let created: CreatedFolders = read_envelope(response, "creating folders")
            .await?
            .ok_or_else(|| {
                UploadError::DirectoryService("create folders response carries no data".to_string())
            })?;

        Ok(MaterializedFolders {
            id_map: parse_id_map(created.id_map)?,
            nodes: created.nodes,
        })
    }

    async fn delete_nodes(&self, nodes: &[DriveNode]) -> UploadResult<()> {
        let api_key = self.credentials.api_key()?;
        delete_nodes(&self.client, &self.base, &api_key, nodes).await
    }
}

fn parse_id_map(raw: BTreeMap<String, Value>) -> UploadResult<IdMap> {
    raw.into_iter()
        .map(|(key, value)| {
            let virtual_id: VirtualId = key.parse().map_err(|e| {
                UploadError::DirectoryService(format!("invalid virtual id {key} in idMap: {e}"))
            })?;
            let real_id = id_from_value(value).map_err(UploadError::DirectoryService)?;
            Ok((virtual_id, real_id))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_map_accepts_numeric_and_string_ids() {
        let raw = BTreeMap::from([
            ("0".to_string(), json!(17)),
            ("1".to_string(), json!("abc")),
            ("-1".to_string(), json!("root")),
        ]);
        let map = parse_id_map(raw).unwrap();
        assert_eq!(map[&0], "17");
        assert_eq!(map[&1], "abc");
        assert_eq!(map[&-1], "root");
    }

    #[test]
    fn id_map_rejects_bad_keys() {
        let raw = BTreeMap::from([("x".to_string(), json!(1))]);
        assert!(matches!(
            parse_id_map(raw),
            Err(UploadError::DirectoryService(_))
        ));
    }

    #[test]
    fn request_body_uses_virtual_directory_layout() {
        let dirs = vec![VirtualDirectory {
            virtual_id: 0,
            parent_virtual_id: -1,
            name: "docs".to_string(),
        }];
        let body = serde_json::to_value(CreateFoldersRequest {
            apikey: "k",
            parent: "root",
            folders: dirs.iter().map(FolderSpec::from).collect(),
        })
        .unwrap();
        assert_eq!(
            body,
            json!({
                "apikey": "k",
                "parent": "root",
                "folders": [{"id": 0, "parent": -1, "name": "docs"}]
            })
        );
    }
}
