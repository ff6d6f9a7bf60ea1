//! 计划层：Task / Plan 数据模型、能力清单、校验、构建器与确定性兜底计划

pub mod builder;
pub mod manifest;
pub mod types;
pub mod validation;

pub use builder::fallback_plan;
pub use manifest::{CapabilityManifest, CapabilityOverride, CapabilitySpec, RetryStrategy};
pub use types::*;
pub use validation::{validate, validate_terminal, DEFAULT_MAX_TASKS};
