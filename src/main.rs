//! TripBee - Rust 自主行程编排器
//!
//! 入口：初始化日志、加载配置、装配编排器，按 [trip] 段跑一次并把结果以 JSON 输出。
//! 用法：`tripbee [config.toml]`

use std::path::PathBuf;

use anyhow::Context;
use serde_json::json;
use tripbee::config::{load_config, AppConfig};
use tripbee::core::{create_llm_from_config, OrchestratorBuilder};
use tripbee::observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = match load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            AppConfig::default()
        }
    };

    let llm = create_llm_from_config(&cfg.llm);
    let orchestrator = OrchestratorBuilder::from_app_config(&cfg, llm).build();

    let trip = cfg.trip.to_request();
    let state = orchestrator.run(trip).await;

    let output = json!({
        "itinerary_draft": state.text("itinerary_draft"),
        "total_cost": state.total_cost(),
        "remaining_budget": state.remaining_budget(),
        "is_budget_met": state.is_budget_met(),
        "messages": state.messages(),
        "trace": state.trace(),
    });
    let rendered = serde_json::to_string_pretty(&output).context("Failed to render result")?;
    println!("{rendered}");

    Ok(())
}
