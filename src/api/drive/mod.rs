mod client;
mod delete;
mod download;
mod folders;
pub mod models;
mod upload;

pub use download::{download_url, open_download};
pub use folders::HttpDirectoryService;
pub use models::{DriveNode, NodeKind};
pub use upload::HttpUploadTransport;
