pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod settings;
pub mod telemetry;
pub mod upload_manager;

pub use config::UploaderConfig;
pub use error::{UploadError, UploadResult};
