pub mod api_endpoint;
pub mod transfer;

pub use api_endpoint::{
    default_api_endpoint, get_api_endpoint, set_api_endpoint, API_ENDPOINT_ENV,
};
pub use transfer::{
    default_request_timeout_secs, get_request_timeout, get_rollback_on_failure,
    set_request_timeout, set_rollback_on_failure, MAX_REQUEST_TIMEOUT_SECS,
    MIN_REQUEST_TIMEOUT_SECS,
};
