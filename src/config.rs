use crate::db::Store;
use crate::error::UploadResult;
use crate::settings;
use std::time::Duration;
use url::Url;

/// 运行时配置，由设置表、环境变量与默认值组装而成。
#[derive(Clone, Debug, PartialEq)]
pub struct UploaderConfig {
    pub api_endpoint: Url,
    /// 只作用于目录类请求。
    pub request_timeout: Duration,
    pub rollback_on_failure: bool,
}

impl UploaderConfig {
    pub fn load(store: &Store) -> UploadResult<Self> {
        Ok(Self {
            api_endpoint: settings::get_api_endpoint(store)?,
            request_timeout: settings::get_request_timeout(store)?,
            rollback_on_failure: settings::get_rollback_on_failure(store)?,
        })
    }

    /// 指定根地址，其余取默认值。
    pub fn with_endpoint(api_endpoint: Url) -> Self {
        Self {
            api_endpoint,
            request_timeout: Duration::from_secs(settings::default_request_timeout_secs()),
            rollback_on_failure: true,
        }
    }
}
