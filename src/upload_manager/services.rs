use super::progress::recover_lock;
use crate::api::drive::models::DriveNode;
use crate::error::{UploadError, UploadResult};
use std::collections::HashMap;
use std::sync::Mutex;

/// 提供上传表单里的 apikey。
pub trait CredentialProvider: Send + Sync {
    fn api_key(&self) -> UploadResult<String>;
}

/// 固定 key，主要用于测试与脚本场景。
#[derive(Clone, Debug)]
pub struct StaticCredential(pub String);

impl CredentialProvider for StaticCredential {
    fn api_key(&self) -> UploadResult<String> {
        if self.0.trim().is_empty() {
            return Err(UploadError::Credential("api key is empty".to_string()));
        }
        Ok(self.0.clone())
    }
}

/// 把新建的文件 / 目录节点提交到应用状态。
pub trait NodeRegistry: Send + Sync {
    fn register_nodes(&self, nodes: Vec<DriveNode>);
}

/// 进程内的节点缓存，按 id 覆盖写入。
#[derive(Debug, Default)]
pub struct NodeCache {
    nodes: Mutex<HashMap<String, DriveNode>>,
}

impl NodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<DriveNode> {
        recover_lock(&self.nodes).get(id).cloned()
    }

    pub fn len(&self) -> usize {
        recover_lock(&self.nodes).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 指定父目录下的子节点，按名称排序。
    pub fn children_of(&self, parent: &str) -> Vec<DriveNode> {
        let mut children: Vec<DriveNode> = recover_lock(&self.nodes)
            .values()
            .filter(|node| node.parent.as_deref() == Some(parent))
            .cloned()
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        children
    }
}

impl NodeRegistry for NodeCache {
    fn register_nodes(&self, nodes: Vec<DriveNode>) {
        let mut cache = recover_lock(&self.nodes);
        for node in nodes {
            cache.insert(node.id.clone(), node);
        }
    }
}
