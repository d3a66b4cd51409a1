use super::materializer::{rollback_directories, DirectoryService};
use super::progress::{
    current_timestamp, recover_lock, ProgressBus, SpeedMeter, UploadProgressUpdate,
};
use crate::api::drive::models::DriveNode;
use crate::error::{UploadError, UploadResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 上传会话状态机。
///
/// `init → started → create-dirs → upload-files → done`，其中 `create-dirs`
/// 可以跳过；`aborted` / `failed` 可以从任一进行中的状态进入。三个终态之后不再迁移。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UploadState {
    Init,
    Started,
    CreateDirs,
    UploadFiles,
    Done,
    Aborted,
    Failed,
}

impl UploadState {
    pub fn as_str(self) -> &'static str {
        match self {
            UploadState::Init => "init",
            UploadState::Started => "started",
            UploadState::CreateDirs => "create-dirs",
            UploadState::UploadFiles => "upload-files",
            UploadState::Done => "done",
            UploadState::Aborted => "aborted",
            UploadState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadState::Done | UploadState::Aborted | UploadState::Failed
        )
    }

    pub fn can_transition_to(self, next: UploadState) -> bool {
        use UploadState::*;
        matches!(
            (self, next),
            (Init, Started)
                | (Started, CreateDirs)
                | (Started, UploadFiles)
                | (CreateDirs, UploadFiles)
                | (UploadFiles, Done)
                | (Started | CreateDirs | UploadFiles, Aborted | Failed)
        )
    }

    /// 唯一的状态迁移入口，非法迁移返回错误而不是静默覆盖。
    pub fn transition(self, next: UploadState) -> UploadResult<UploadState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(UploadError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单次拖放对应的上传记录，由解析、建目录、传输三个阶段依次修改。
#[derive(Debug)]
pub struct UploadSession {
    pub(crate) id: String,
    pub(crate) state: UploadState,
    pub(crate) total_bytes: u64,
    pub(crate) done_bytes: u64,
    pub(crate) directory_names: Vec<String>,
    pub(crate) file_names: Vec<String>,
    pub(crate) created_directory_nodes: Vec<DriveNode>,
    pub(crate) error_message: Option<String>,
    pub(crate) started_at: i64,
    pub(crate) completed_at: Option<i64>,
    pub(crate) cancel: Option<CancelHandle>,
    /// 句柄挂上之前收到的取消请求，挂上句柄时立即兑现。
    pub(crate) cancel_requested: bool,
}

/// `request_cancel` 的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    /// 已中止传输并开始回滚
    Cancelled,
    /// 传输尚未开始，取消会在句柄挂上时执行
    Deferred,
}

/// 会话的只读视图，不含取消句柄，可序列化给 UI。
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSessionSnapshot {
    pub id: String,
    pub state: UploadState,
    pub total_bytes: u64,
    pub done_bytes: u64,
    pub directory_names: Vec<String>,
    pub file_names: Vec<String>,
    pub created_directory_nodes: Vec<DriveNode>,
    pub error_message: Option<String>,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub cancellable: bool,
}

impl UploadSession {
    pub(crate) fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            state: UploadState::Init,
            total_bytes: 0,
            done_bytes: 0,
            directory_names: Vec::new(),
            file_names: Vec::new(),
            created_directory_nodes: Vec::new(),
            error_message: None,
            started_at: current_timestamp(),
            completed_at: None,
            cancel: None,
            cancel_requested: false,
        }
    }

    pub(crate) fn transition(&mut self, next: UploadState) -> UploadResult<()> {
        self.state = self.state.transition(next)?;
        if next.is_terminal() {
            self.completed_at = Some(current_timestamp());
            self.cancel = None;
        }
        Ok(())
    }

    /// 进入 failed 并记录原因；已处于终态（例如已被用户中止）时不做任何修改。
    pub(crate) fn fail(&mut self, err: &UploadError) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.error_message = Some(err.to_string());
        self.transition(UploadState::Failed).is_ok()
    }

    pub(crate) fn add_total(&mut self, bytes: u64) {
        self.total_bytes = self.total_bytes.saturating_add(bytes);
    }

    /// done 只增不减，且不会超过 total。
    pub(crate) fn advance(&mut self, delta: u64) {
        self.done_bytes = self
            .done_bytes
            .saturating_add(delta)
            .min(self.total_bytes);
    }

    /// 只读取标量字段，发布进度时不复制名字列表。
    pub(crate) fn progress_update(&self, speed_bps: Option<f64>) -> UploadProgressUpdate {
        UploadProgressUpdate {
            session_id: self.id.clone(),
            state: self.state,
            done_bytes: self.done_bytes,
            total_bytes: self.total_bytes,
            speed_bps,
            timestamp_millis: current_timestamp(),
        }
    }

    pub fn snapshot(&self) -> UploadSessionSnapshot {
        UploadSessionSnapshot {
            id: self.id.clone(),
            state: self.state,
            total_bytes: self.total_bytes,
            done_bytes: self.done_bytes,
            directory_names: self.directory_names.clone(),
            file_names: self.file_names.clone(),
            created_directory_nodes: self.created_directory_nodes.clone(),
            error_message: self.error_message.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            cancellable: self.cancel.is_some() && !self.state.is_terminal(),
        }
    }
}

/// 传输开始后才会挂到会话上的取消句柄。
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

struct CancelInner {
    token: CancellationToken,
    fired: AtomicBool,
    directories: Arc<dyn DirectoryService>,
    nodes: Vec<DriveNode>,
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("fired", &self.inner.fired.load(Ordering::Relaxed))
            .field("nodes", &self.inner.nodes.len())
            .finish()
    }
}

impl CancelHandle {
    pub(crate) fn new(
        token: CancellationToken,
        directories: Arc<dyn DirectoryService>,
        nodes: Vec<DriveNode>,
    ) -> Self {
        Self {
            inner: Arc::new(CancelInner {
                token,
                fired: AtomicBool::new(false),
                directories,
                nodes,
            }),
        }
    }

    /// 中止传输并回滚已创建的目录；只有第一次调用会真正生效。
    async fn fire(&self, session_id: &str) {
        if self.inner.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.token.cancel();
        rollback_directories(self.inner.directories.as_ref(), &self.inner.nodes, session_id).await;
    }
}

/// 会话的共享句柄：所有修改都经过 `update`，修改后立即向订阅者推送进度。
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    inner: Arc<Mutex<UploadSession>>,
    bus: ProgressBus,
    meter: Arc<Mutex<SpeedMeter>>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish()
    }
}

impl SessionHandle {
    pub(crate) fn new(bus: ProgressBus) -> Self {
        let session = UploadSession::new();
        Self {
            id: session.id.clone(),
            inner: Arc::new(Mutex::new(session)),
            bus,
            meter: Arc::new(Mutex::new(SpeedMeter::default())),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> UploadState {
        recover_lock(&self.inner).state
    }

    pub fn snapshot(&self) -> UploadSessionSnapshot {
        recover_lock(&self.inner).snapshot()
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut UploadSession) -> R) -> R {
        let (result, mut update) = {
            let mut session = recover_lock(&self.inner);
            let result = f(&mut session);
            (result, session.progress_update(None))
        };
        update.speed_bps = recover_lock(&self.meter).sample(update.done_bytes);
        self.bus.broadcast(update);
        result
    }

    pub(crate) fn current_progress(&self) -> UploadProgressUpdate {
        recover_lock(&self.inner).progress_update(None)
    }

    /// 用户取消：置为 aborted、中止进行中的请求，并尽力删除本次创建的目录。
    ///
    /// 传输开始前（句柄为空）或会话已结束时返回 `NotCancellable`。
    pub async fn cancel(&self) -> UploadResult<()> {
        let handle = self.update(|session| {
            if session.state.is_terminal() {
                return Err(UploadError::NotCancellable(session.id.clone()));
            }
            let handle = session
                .cancel
                .clone()
                .ok_or_else(|| UploadError::NotCancellable(session.id.clone()))?;
            session.transition(UploadState::Aborted)?;
            Ok(handle)
        })?;
        tracing::info!(session = %self.id, "upload cancelled by user");
        handle.fire(&self.id).await;
        Ok(())
    }

    /// 与 `cancel` 相同，但传输开始前的请求会被记下，等句柄挂上后再执行。
    pub async fn request_cancel(&self) -> UploadResult<CancelOutcome> {
        let handle = self.update(|session| {
            if session.state.is_terminal() {
                return Err(UploadError::NotCancellable(session.id.clone()));
            }
            match session.cancel.clone() {
                Some(handle) => {
                    session.transition(UploadState::Aborted)?;
                    Ok(Some(handle))
                }
                None => {
                    session.cancel_requested = true;
                    Ok(None)
                }
            }
        })?;
        match handle {
            Some(handle) => {
                tracing::info!(session = %self.id, "upload cancelled by user");
                handle.fire(&self.id).await;
                Ok(CancelOutcome::Cancelled)
            }
            None => {
                tracing::info!(session = %self.id, "cancel requested before transport start");
                Ok(CancelOutcome::Deferred)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use UploadState::*;

    #[test]
    fn happy_path_transitions_are_legal() {
        let mut state = Init;
        for next in [Started, CreateDirs, UploadFiles, Done] {
            state = state.transition(next).unwrap();
        }
        assert_eq!(state, Done);
        assert_eq!(Started.transition(UploadFiles).unwrap(), UploadFiles);
    }

    #[test]
    fn terminal_states_are_final() {
        for terminal in [Done, Aborted, Failed] {
            for next in [Init, Started, CreateDirs, UploadFiles, Done, Aborted, Failed] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn interruptions_only_from_running_states() {
        assert!(!Init.can_transition_to(Aborted));
        assert!(!Init.can_transition_to(Failed));
        for running in [Started, CreateDirs, UploadFiles] {
            assert!(running.can_transition_to(Aborted));
            assert!(running.can_transition_to(Failed));
        }
        assert!(matches!(
            UploadFiles.transition(CreateDirs),
            Err(UploadError::InvalidTransition { from: UploadFiles, to: CreateDirs })
        ));
    }

    #[test]
    fn state_serializes_kebab_case() {
        assert_eq!(serde_json::to_string(&CreateDirs).unwrap(), "\"create-dirs\"");
        assert_eq!(UploadFiles.to_string(), "upload-files");
    }

    #[test]
    fn done_bytes_never_exceed_total() {
        let mut session = UploadSession::new();
        session.add_total(10);
        session.advance(4);
        session.advance(20);
        assert_eq!(session.done_bytes, 10);
    }

    #[test]
    fn fail_is_ignored_after_abort() {
        let mut session = UploadSession::new();
        session.transition(Started).unwrap();
        session.transition(UploadFiles).unwrap();
        session.transition(Aborted).unwrap();
        assert!(!session.fail(&UploadError::Transport("HTTP 500".into())));
        assert_eq!(session.state, Aborted);
        assert!(session.error_message.is_none());
        assert!(session.completed_at.is_some());
    }

    #[tokio::test]
    async fn cancel_before_transport_is_rejected() {
        let handle = SessionHandle::new(ProgressBus::default());
        handle.update(|s| s.transition(Started)).unwrap();
        assert!(matches!(
            handle.cancel().await,
            Err(UploadError::NotCancellable(_))
        ));
        assert_eq!(handle.state(), Started);
    }

    #[tokio::test]
    async fn early_cancel_request_is_recorded() {
        let handle = SessionHandle::new(ProgressBus::default());
        handle.update(|s| s.transition(Started)).unwrap();
        assert_eq!(handle.request_cancel().await.unwrap(), CancelOutcome::Deferred);
        assert!(handle.update(|s| s.cancel_requested));
        assert_eq!(handle.state(), Started);

        handle.update(|s| s.transition(Failed)).unwrap();
        assert!(matches!(
            handle.request_cancel().await,
            Err(UploadError::NotCancellable(_))
        ));
    }

    #[test]
    fn publishing_cost_does_not_grow_with_file_count() {
        let bus = ProgressBus::default();
        let (_tx, rx) = bus.subscribe();
        let handle = SessionHandle::new(bus);
        handle.update(|s| {
            s.file_names = (0..20_000).map(|i| format!("file-{i}.bin")).collect();
            s.directory_names = (0..5_000).map(|i| format!("dir-{i}")).collect();
            s.add_total(10_000);
        });

        let started = Instant::now();
        for _ in 0..5_000 {
            handle.update(|s| s.advance(1));
        }
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "5000 updates took {:?}",
            started.elapsed()
        );

        let first = rx.recv().unwrap();
        assert_eq!(first.total_bytes, 10_000);
        assert_eq!(first.done_bytes, 0);
        assert_eq!(first.session_id, handle.id());
        let current = handle.current_progress();
        assert_eq!(current.done_bytes, 5_000);
        assert_eq!(current.state, Init);
    }
}
