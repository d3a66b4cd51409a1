#![allow(dead_code)]

use async_trait::async_trait;
use dropupload::api::drive::{DriveNode, NodeKind};
use dropupload::upload_manager::{
    DirectoryService, MaterializedFolders, NodeCache, ProgressCallback, StaticCredential,
    TransportReply, UploadForm, UploadManager, UploadOptions, UploadServices, UploadTransport,
    VirtualDirectory, VirtualFile, VirtualId, ROOT_VIRTUAL_ID,
};
use dropupload::UploadResult;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const TARGET: &str = "root";

/// 每个虚拟目录 n 被映射为真实 id "d{n}"，`omit` 中的 id 不出现在结果里。
#[derive(Default)]
pub struct FakeDirectories {
    omit: Vec<VirtualId>,
    pub created: Mutex<Vec<Vec<VirtualDirectory>>>,
    pub deleted: Mutex<Vec<String>>,
}

impl FakeDirectories {
    pub fn omitting(omit: Vec<VirtualId>) -> Self {
        Self {
            omit,
            ..Self::default()
        }
    }

    pub fn create_calls(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn deleted_ids(&self) -> Vec<String> {
        let mut ids = self.deleted.lock().unwrap().clone();
        ids.sort();
        ids
    }
}

fn real_id(virtual_id: VirtualId, target: &str) -> String {
    if virtual_id == ROOT_VIRTUAL_ID {
        target.to_string()
    } else {
        format!("d{virtual_id}")
    }
}

#[async_trait]
impl DirectoryService for FakeDirectories {
    async fn create_folders(
        &self,
        directories: &[VirtualDirectory],
        target_parent: &str,
    ) -> UploadResult<MaterializedFolders> {
        self.created.lock().unwrap().push(directories.to_vec());
        let mut folders = MaterializedFolders::default();
        for dir in directories {
            if self.omit.contains(&dir.virtual_id) {
                continue;
            }
            let id = real_id(dir.virtual_id, target_parent);
            folders.id_map.insert(dir.virtual_id, id.clone());
            folders.nodes.push(DriveNode {
                id,
                parent: Some(real_id(dir.parent_virtual_id, target_parent)),
                name: dir.name.clone(),
                kind: NodeKind::Dir,
                size: None,
                last_modified: None,
            });
        }
        Ok(folders)
    }

    async fn delete_nodes(&self, nodes: &[DriveNode]) -> UploadResult<()> {
        self.deleted
            .lock()
            .unwrap()
            .extend(nodes.iter().map(|node| node.id.clone()));
        Ok(())
    }
}

pub enum Reply {
    Respond { status: u16, body: String },
    /// 报告一半进度后永远挂起，只能被取消。
    Block,
}

pub struct FakeTransport {
    reply: Reply,
    pub started: Notify,
    pub forms: Mutex<Vec<Vec<String>>>,
}

impl FakeTransport {
    pub fn respond(status: u16, body: &str) -> Self {
        Self::with_reply(Reply::Respond {
            status,
            body: body.to_string(),
        })
    }

    pub fn blocking() -> Self {
        Self::with_reply(Reply::Block)
    }

    fn with_reply(reply: Reply) -> Self {
        Self {
            reply,
            started: Notify::new(),
            forms: Mutex::new(Vec::new()),
        }
    }

    pub fn sent_keys(&self) -> Vec<Vec<String>> {
        self.forms.lock().unwrap().clone()
    }
}

#[async_trait]
impl UploadTransport for FakeTransport {
    async fn send(
        &self,
        form: UploadForm,
        progress: ProgressCallback,
    ) -> UploadResult<TransportReply> {
        self.forms
            .lock()
            .unwrap()
            .push(form.fields().iter().map(|field| field.key.clone()).collect());
        let total = form.file_bytes();

        match &self.reply {
            Reply::Block => {
                progress(total / 2);
                self.started.notify_one();
                std::future::pending::<UploadResult<TransportReply>>().await
            }
            Reply::Respond { status, body } => {
                // 重复与回退的累计值都应被容忍
                for loaded in [total / 3, total / 3, total / 4, total * 2 / 3, total, total] {
                    progress(loaded);
                }
                Ok(TransportReply {
                    status: *status,
                    body: body.clone(),
                })
            }
        }
    }
}

pub struct Harness {
    pub manager: UploadManager,
    pub directories: Arc<FakeDirectories>,
    pub transport: Arc<FakeTransport>,
    pub registry: Arc<NodeCache>,
}

pub fn harness(
    directories: FakeDirectories,
    transport: FakeTransport,
    options: UploadOptions,
) -> Harness {
    let directories = Arc::new(directories);
    let transport = Arc::new(transport);
    let registry = Arc::new(NodeCache::new());
    let manager = UploadManager::new(
        UploadServices {
            directories: directories.clone(),
            transport: transport.clone(),
            registry: registry.clone(),
            credentials: Arc::new(StaticCredential("secret".to_string())),
        },
        options,
    );
    Harness {
        manager,
        directories,
        transport,
        registry,
    }
}

pub fn file(name: &str, body: &str) -> VirtualFile {
    VirtualFile::from_bytes(name, body.as_bytes().to_vec(), 1_700_000_000_000)
}
