//! TripBee - Rust 自主行程编排器
//!
//! 模块划分：
//! - **agents**: Agent 契约、注册表与内置 Agent（机票 / 住宿 / 餐饮 / 活动估算、总价检查、预算复核、行程生成）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 运行状态与合并、批执行器、编排主循环、构建器
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **observability**: 日志初始化
//! - **plan**: 计划与任务模型、能力清单、校验、兜底计划
//! - **planning**: 计划生成与缓存、初始规划、失败重规划

pub mod agents;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod plan;
pub mod planning;

pub use crate::config::{load_config, AppConfig};
pub use crate::core::{Orchestrator, OrchestratorBuilder, RunState, TripRequest};
