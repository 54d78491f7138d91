//! 可观测性

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 安装全局 subscriber（RUST_LOG 可覆盖，默认 info）；已安装时静默跳过
pub fn init() {
    if let Err(e) = try_init() {
        eprintln!("tracing subscriber already installed: {e}");
    }
}

pub fn try_init() -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
}
