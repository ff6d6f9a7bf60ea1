//! 核心编排层：错误、运行状态与合并、批执行、主控循环、构建器

pub mod builder;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod state;

pub use builder::OrchestratorBuilder;
pub use error::{AgentError, PlanError};
pub use executor::{BatchExecutor, BatchReport, TaskOutcome, TaskStatus};
pub use orchestrator::{create_llm_from_config, Orchestrator, OrchestratorConfig, ORCHESTRATOR};
pub use state::{calculate_duration, CostCategory, Partial, RunState, TraceRecord, TripRequest};
