use crate::upload_manager::entry::VirtualId;
use crate::upload_manager::session::UploadState;
use thiserror::Error;

/// 上传流程中所有可上报的错误。
/// 解析单个文件失败（ResolutionSkip）不在此列：它只会记录日志并跳过。
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("no real directory id found for virtual id {virtual_id}")]
    Mapping { virtual_id: VirtualId },

    #[error("upload transport failed: {0}")]
    Transport(String),

    #[error("server rejected the upload: {0}")]
    ServerReported(String),

    #[error("upload aborted by user")]
    AbortedByUser,

    #[error("directory service failed: {0}")]
    DirectoryService(String),

    #[error("credential unavailable: {0}")]
    Credential(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("illegal upload state transition: {from} -> {to}")]
    InvalidTransition { from: UploadState, to: UploadState },

    #[error("upload session {0} cannot be cancelled in its current state")]
    NotCancellable(String),

    #[error("unknown upload session {0}")]
    UnknownSession(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to open browser: {0}")]
    Browser(String),
}

pub type UploadResult<T> = Result<T, UploadError>;
