//! 可观测性：tracing 订阅器初始化
//!
//! 默认 info 级别，可通过 RUST_LOG 覆盖；Agent 审计行（`agent_audit`）同样走这里输出。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 默认过滤级别
pub const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// 安装全局订阅器；重复调用（如测试中）不会 panic
pub fn init() {
    let installed = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(false))
        .try_init();
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
