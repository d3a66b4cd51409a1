use super::entry::{DropPayload, FileMap, RealId};
use super::materializer::{materialize, rollback_directories, translate, DirectoryService};
use super::progress::{recover_lock, ProgressBus, ProgressTracker, UploadProgressUpdate};
use super::resolver::resolve_entries;
use super::services::{CredentialProvider, NodeRegistry};
use super::session::{
    CancelHandle, CancelOutcome, SessionHandle, UploadSessionSnapshot, UploadState,
};
use super::transport::{build_upload_form, parse_upload_reply, ProgressCallback, UploadTransport};
use crate::api::drive::{HttpDirectoryService, HttpUploadTransport};
use crate::api::drive::models::DriveNode;
use crate::config::UploaderConfig;
use crate::error::{UploadError, UploadResult};
use std::sync::{mpsc::Receiver, Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// 上传流程依赖的外部协作方。
#[derive(Clone)]
pub struct UploadServices {
    pub directories: Arc<dyn DirectoryService>,
    pub transport: Arc<dyn UploadTransport>,
    pub registry: Arc<dyn NodeRegistry>,
    pub credentials: Arc<dyn CredentialProvider>,
}

#[derive(Clone, Copy, Debug)]
pub struct UploadOptions {
    /// 失败时是否删除本次已创建的目录；取消时总是会删除。
    pub rollback_on_failure: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            rollback_on_failure: true,
        }
    }
}

/// 持有全部上传会话的集合，UI 通过快照或进度订阅观察它。
#[derive(Clone)]
pub struct UploadManager {
    sessions: Arc<Mutex<Vec<SessionHandle>>>,
    services: UploadServices,
    options: UploadOptions,
    bus: ProgressBus,
}

impl UploadManager {
    pub fn new(services: UploadServices, options: UploadOptions) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(Vec::new())),
            services,
            options,
            bus: ProgressBus::default(),
        }
    }

    /// 使用 HTTP 协作方组装管理器。
    pub fn from_config(
        config: &UploaderConfig,
        credentials: Arc<dyn CredentialProvider>,
        registry: Arc<dyn NodeRegistry>,
    ) -> UploadResult<Self> {
        let directories = HttpDirectoryService::new(config, credentials.clone())?;
        let transport = HttpUploadTransport::new(config)?;
        Ok(Self::new(
            UploadServices {
                directories: Arc::new(directories),
                transport: Arc::new(transport),
                registry,
                credentials,
            },
            UploadOptions {
                rollback_on_failure: config.rollback_on_failure,
            },
        ))
    }

    /// 新建一个处于 init 状态的会话并加入集合。
    pub fn create_session(&self) -> SessionHandle {
        let session = SessionHandle::new(self.bus.clone());
        recover_lock(&self.sessions).push(session.clone());
        session
    }

    /// 创建会话并执行完整流程，返回结束后的会话。错误已记录在会话上。
    pub async fn upload(&self, target_parent: &str, payload: DropPayload) -> SessionHandle {
        let session = self.create_session();
        let _ = self.run_session(&session, target_parent, payload).await;
        session
    }

    /// 依次执行：解析 → 建目录 → 传输。任何失败都会把会话置为 failed，
    /// 用户取消时会话保持 aborted。
    pub async fn run_session(
        &self,
        session: &SessionHandle,
        target_parent: &str,
        payload: DropPayload,
    ) -> UploadResult<()> {
        let outcome = self.execute(session, target_parent, payload).await;
        match &outcome {
            Ok(()) => tracing::info!(session = %session.id(), "upload finished"),
            Err(UploadError::AbortedByUser) => {
                tracing::info!(session = %session.id(), "upload aborted")
            }
            Err(err) => {
                let (failed, created) =
                    session.update(|s| (s.fail(err), s.created_directory_nodes.clone()));
                if failed {
                    tracing::warn!(session = %session.id(), "upload failed: {err}");
                    if self.options.rollback_on_failure {
                        rollback_directories(
                            self.services.directories.as_ref(),
                            &created,
                            session.id(),
                        )
                        .await;
                    }
                }
            }
        }
        outcome
    }

    async fn execute(
        &self,
        session: &SessionHandle,
        target_parent: &str,
        payload: DropPayload,
    ) -> UploadResult<()> {
        session.update(|s| s.transition(UploadState::Started))?;

        let (file_map, created_nodes) = self.prepare(session, target_parent, payload).await?;
        let api_key = self.services.credentials.api_key()?;
        let form = build_upload_form(&file_map, api_key, session).await;

        let token = CancellationToken::new();
        let cancel = CancelHandle::new(
            token.clone(),
            self.services.directories.clone(),
            created_nodes.clone(),
        );
        let cancel_requested = session.update(|s| {
            s.transition(UploadState::UploadFiles)?;
            s.cancel = Some(cancel);
            Ok::<_, UploadError>(s.cancel_requested)
        })?;
        if cancel_requested {
            // 句柄挂上之前收到的取消，此时 token 已触发，下面的 select 直接返回
            session.cancel().await?;
        }
        tracing::debug!(
            session = %session.id(),
            fields = form.fields().len(),
            bytes = form.file_bytes(),
            "sending upload request"
        );

        let reply = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(UploadError::AbortedByUser),
            reply = self.services.transport.send(form, progress_callback(session.clone())) => reply,
        };
        // 取消优先：已被中止时不再把传输结果当作失败上报
        if session.state() == UploadState::Aborted {
            return Err(UploadError::AbortedByUser);
        }
        let file_nodes = parse_upload_reply(&reply?)?;

        let registry = self.services.registry.clone();
        session.update(move |s| {
            if s.state == UploadState::Aborted {
                return Err(UploadError::AbortedByUser);
            }
            let mut nodes = file_nodes;
            nodes.extend(created_nodes);
            registry.register_nodes(nodes);
            s.transition(UploadState::Done)
        })
    }

    /// 把拖放数据转换成以真实目录 id 为 key 的文件表，必要时先批量建目录。
    async fn prepare(
        &self,
        session: &SessionHandle,
        target_parent: &str,
        payload: DropPayload,
    ) -> UploadResult<(FileMap<RealId>, Vec<DriveNode>)> {
        if !payload.has_tree_entries() {
            let flat = FileMap::from([(target_parent.to_string(), payload.files)]);
            return Ok((flat, Vec::new()));
        }

        let DropPayload { files, entries } = payload;
        let tree = resolve_entries(files, entries.unwrap_or_default()).await;

        if !tree.directories.is_empty() {
            let names: Vec<String> = tree.directories.iter().map(|d| d.name.clone()).collect();
            session.update(|s| {
                s.transition(UploadState::CreateDirs)?;
                s.directory_names = names;
                Ok::<_, UploadError>(())
            })?;
        }

        let folders = materialize(
            self.services.directories.as_ref(),
            &tree.directories,
            target_parent,
        )
        .await?;
        if !folders.nodes.is_empty() {
            let nodes = folders.nodes.clone();
            session.update(|s| s.created_directory_nodes = nodes);
        }

        let file_map = translate(tree.file_map, &tree.directories, &folders.id_map)?;
        Ok((file_map, folders.nodes))
    }

    pub fn session(&self, id: &str) -> Option<SessionHandle> {
        recover_lock(&self.sessions)
            .iter()
            .find(|session| session.id() == id)
            .cloned()
    }

    pub fn sessions(&self) -> Vec<SessionHandle> {
        recover_lock(&self.sessions).clone()
    }

    pub fn snapshot(&self) -> Vec<UploadSessionSnapshot> {
        self.sessions()
            .iter()
            .map(SessionHandle::snapshot)
            .collect()
    }

    pub async fn cancel(&self, id: &str) -> UploadResult<()> {
        let session = self
            .session(id)
            .ok_or_else(|| UploadError::UnknownSession(id.to_string()))?;
        session.cancel().await
    }

    /// 可以在传输开始前调用的取消，见 [`SessionHandle::request_cancel`]。
    pub async fn request_cancel(&self, id: &str) -> UploadResult<CancelOutcome> {
        let session = self
            .session(id)
            .ok_or_else(|| UploadError::UnknownSession(id.to_string()))?;
        session.request_cancel().await
    }

    /// 清空会话集合；进行中的上传不受影响，只是不再被集合跟踪。
    pub fn reset(&self) {
        recover_lock(&self.sessions).clear();
    }

    /// 订阅进度事件；新订阅者会先收到每个进行中会话的当前进度。
    pub fn subscribe_progress(&self) -> Receiver<UploadProgressUpdate> {
        let (tx, rx) = self.bus.subscribe();
        for session in self.sessions() {
            let update = session.current_progress();
            if !update.state.is_terminal() {
                let _ = tx.try_send(update);
            }
        }
        rx
    }
}

fn progress_callback(session: SessionHandle) -> ProgressCallback {
    let tracker = Mutex::new(ProgressTracker::new());
    Arc::new(move |loaded| {
        let delta = recover_lock(&tracker).observe(loaded);
        if delta == 0 {
            return;
        }
        session.update(|s| {
            if s.state == UploadState::UploadFiles {
                s.advance(delta);
            }
        });
    })
}
