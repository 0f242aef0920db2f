//! 可观测性：tracing 日志初始化（RUST_LOG 可覆盖，默认 info）

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 初始化全局日志；重复调用时忽略（测试中多处初始化）
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}
