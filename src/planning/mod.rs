//! 规划层：生成抽象与缓存、LLM 生成器、初始规划、重规划

pub mod generation;
pub mod llm_planner;
pub mod planner;
pub mod replanner;

pub use generation::{
    generate_with_timeout, CacheKey, Generation, PlanCache, PlanGenerator, PlanRequest,
    PlanSource, ReplanGenerator, ReplanRequest, ScenarioFingerprint,
};
pub use llm_planner::{extract_json, parse_plan_output, LlmPlanGenerator, LlmReplanGenerator};
pub use planner::InitialPlanner;
pub use replanner::{apply_rules, FailureContext, Replanner};
