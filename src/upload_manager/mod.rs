pub mod core;
pub mod entry;
pub mod materializer;
pub mod progress;
pub mod resolver;
pub mod services;
pub mod session;
pub mod transport;

pub use self::core::{UploadManager, UploadOptions, UploadServices};
pub use entry::{
    DirectoryEntry, DropEntry, DropPayload, FileContent, FileEntry, FileMap, RealId,
    VirtualDirectory, VirtualFile, VirtualId, ROOT_VIRTUAL_ID,
};
pub use materializer::{materialize, translate, DirectoryService, IdMap, MaterializedFolders};
pub use progress::{ProgressTracker, UploadProgressUpdate};
pub use resolver::{resolve_entries, ResolvedTree};
pub use services::{CredentialProvider, NodeCache, NodeRegistry, StaticCredential};
pub use session::{CancelOutcome, SessionHandle, UploadSessionSnapshot, UploadState};
pub use transport::{
    parse_upload_reply, FieldValue, FormField, ProgressCallback, TransportReply, UploadForm,
    UploadTransport, CREDENTIAL_FIELD,
};
