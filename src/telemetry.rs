use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "dropupload=info";

/// 初始化日志输出；`RUST_LOG` 优先。重复调用时静默忽略。
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .with_target(false)
        .try_init();
}
