//! 编排器：主控循环
//!
//! 状态机 (index, plan, replan_count)：
//! - 开始：取得初始计划（生成 / 缓存 / 兜底），写 plan_adopted
//! - 推进：执行 index 处的一批，合并全部 Partial，重算剩余预算
//! - 失败：交给重规划器，replan_count += 1；超过上限则写 replan_exhausted，
//!   预算复核与行程生成各跑一次后返回；否则采用新计划并从 index = 0 重新开始
//! - 结束：计划跑完后，超支则先做预算复核，再生成行程
//!
//! run 从不返回错误，总会给出尽力而为的 RunState。

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agents::{template_itinerary, AgentRegistry};
use crate::config::LlmSection;
use crate::core::{BatchExecutor, Partial, RunState, TraceRecord, TripRequest};
use crate::llm::{create_deepseek_client, LlmClient, OpenAiClient};
use crate::plan::{nodes, CapabilityManifest, Plan, Task, DEFAULT_MAX_TASKS};
use crate::planning::{FailureContext, InitialPlanner, PlanSource, Replanner};

/// 编排器自身写入追踪记录时使用的节点名
pub const ORCHESTRATOR: &str = "ORCHESTRATOR";

/// [orchestrator] 段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_tasks: usize,
    pub max_replans: u32,
    pub max_workers: usize,
    /// 单次 Agent 调用超时（秒，可为小数）
    pub agent_timeout_secs: f64,
    /// 计划生成超时（秒，可为小数）
    pub generation_timeout_secs: f64,
    /// 场景指纹的预算分桶大小
    pub budget_bucket: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tasks: DEFAULT_MAX_TASKS,
            max_replans: 3,
            max_workers: 3,
            agent_timeout_secs: 30.0,
            generation_timeout_secs: 30.0,
            budget_bucket: 10_000.0,
        }
    }
}

/// 秒数转 Duration；负数按 0，溢出用 30 秒
pub(crate) fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::from_secs(30))
}

impl OrchestratorConfig {
    pub fn agent_timeout(&self) -> Duration {
        secs(self.agent_timeout_secs)
    }

    pub fn generation_timeout(&self) -> Duration {
        secs(self.generation_timeout_secs)
    }
}

/// 根据配置与环境变量选择 LLM 后端；provider 为 mock 或没有 API Key 时返回 None（离线确定性模式）
pub fn create_llm_from_config(cfg: &LlmSection) -> Option<Arc<dyn LlmClient>> {
    let provider = cfg.provider.to_lowercase();
    match provider.as_str() {
        "deepseek" => {
            let Some(key) = std::env::var("DEEPSEEK_API_KEY").ok() else {
                tracing::warn!("DEEPSEEK_API_KEY not set, running offline");
                return None;
            };
            let client = create_deepseek_client(cfg.model.as_deref(), &key, cfg.base_url.as_deref());
            tracing::info!(model = client.model(), "Using DeepSeek LLM");
            Some(Arc::new(client))
        }
        "openai" => {
            let Some(key) = std::env::var("OPENAI_API_KEY").ok() else {
                tracing::warn!("OPENAI_API_KEY not set, running offline");
                return None;
            };
            let model = cfg.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
            tracing::info!(model = %model, "Using OpenAI-compatible LLM");
            Some(Arc::new(OpenAiClient::new(cfg.base_url.as_deref(), &model, &key)))
        }
        other => {
            if other != "mock" {
                tracing::warn!(provider = other, "unknown LLM provider, running offline");
            }
            None
        }
    }
}

/// 编排器：持有注册表、能力清单、批执行器、初始规划器与重规划器
pub struct Orchestrator {
    config: OrchestratorConfig,
    manifest: Arc<CapabilityManifest>,
    registry: Arc<AgentRegistry>,
    executor: BatchExecutor,
    planner: InitialPlanner,
    replanner: Replanner,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        registry: Arc<AgentRegistry>,
        manifest: Arc<CapabilityManifest>,
        planner: InitialPlanner,
        replanner: Replanner,
    ) -> Self {
        let executor = BatchExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&manifest),
            config.max_workers,
            config.agent_timeout(),
        );
        Self {
            config,
            manifest,
            registry,
            executor,
            planner,
            replanner,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// 完整运行一次：规划 → 分批执行 → 失败重规划 → 终止步骤
    pub async fn run(&self, trip: TripRequest) -> RunState {
        let mut state = RunState::new(trip);
        tracing::info!(
            city = %state.trip().city,
            budget = state.budget(),
            duration_days = state.duration_days(),
            "orchestration started"
        );

        let (mut plan, source) = self
            .planner
            .plan(state.trip(), &self.manifest, &self.registry)
            .await;
        let mut replan_count: u32 = 0;
        adopt(&mut state, &plan, source, replan_count);

        let mut index = 0;
        while index < plan.len() {
            let report = self.executor.execute_batch(&plan, index, &state).await;
            let failed = report.failed_ids();
            let next_index = report.next_index();
            let batch_size = report.outcomes.len();
            let concurrent = report.is_concurrent();
            for outcome in report.outcomes {
                state.merge(outcome.partial);
            }
            let remaining = state.recompute_remaining_budget();
            tracing::info!(
                plan_id = %plan.plan_id,
                index,
                batch_size,
                concurrent,
                failed = failed.len(),
                remaining_budget = remaining,
                "batch complete"
            );

            let Some(ctx) = FailureContext::new(failed, state.clone()) else {
                index = next_index;
                continue;
            };

            let (next_plan, source) = self.replanner.replan(&ctx, &self.manifest, &plan).await;
            replan_count += 1;
            if replan_count > self.config.max_replans {
                tracing::warn!(replan_count, failing = %ctx.failing_task_id, "replan budget exhausted");
                state.record(
                    TraceRecord::new(ORCHESTRATOR, "replan_exhausted")
                        .with("replan_count", replan_count)
                        .with("failing_task_id", ctx.failing_task_id.clone())
                        .with("plan_id", plan.plan_id.clone()),
                );
                state.note("Replanning limit reached; finishing with the best available plan.");
                self.run_terminal(&mut state, nodes::BUDGET_REVIEW).await;
                self.run_terminal(&mut state, nodes::ITINERARY_PLANNER).await;
                return state;
            }

            plan = next_plan;
            adopt(&mut state, &plan, source, replan_count);
            index = 0;
        }

        if state.remaining_budget() < 0.0 {
            self.run_terminal(&mut state, nodes::BUDGET_REVIEW).await;
        }
        self.run_terminal(&mut state, nodes::ITINERARY_PLANNER).await;

        tracing::info!(
            remaining_budget = state.remaining_budget(),
            is_budget_met = state.is_budget_met(),
            replan_count,
            "orchestration finished"
        );
        state
    }

    /// 终止步骤：不受 agent_timeout 限制（内部 LLM 调用各自限时），panic 仍被捕获；
    /// 失败只记录不重规划。行程步骤没有产出时用模板补齐。
    async fn run_terminal(&self, state: &mut RunState, node: &str) {
        let task = Task::new(format!("final_{}", node.to_lowercase()), node);
        let outcome = self.executor.execute_terminal(task, state).await;
        if outcome.is_failure() {
            tracing::warn!(node, "terminal step failed");
        }
        state.merge(outcome.partial);

        if node == nodes::ITINERARY_PLANNER && state.text("itinerary_draft").is_none() {
            tracing::warn!("itinerary step produced no draft, rendering template");
            let draft = template_itinerary(state);
            let days = state.duration_days();
            state.merge(
                Partial::new()
                    .set("itinerary_draft", draft)
                    .set("next_action", "FINISH")
                    .message("Itinerary draft completed from template.")
                    .trace(
                        TraceRecord::new(ORCHESTRATOR, "itinerary_template")
                            .with("days", days),
                    ),
            );
        }
        state.recompute_remaining_budget();
    }
}

fn adopt(state: &mut RunState, plan: &Plan, source: PlanSource, replan_count: u32) {
    tracing::info!(
        plan_id = %plan.plan_id,
        source = source.as_str(),
        tasks = plan.len(),
        replan_count,
        "plan adopted"
    );
    state.record(
        TraceRecord::new(ORCHESTRATOR, "plan_adopted")
            .with("plan_id", plan.plan_id.clone())
            .with("source", source.as_str())
            .with("tasks", plan.task_ids())
            .with("replan_count", replan_count),
    );
}
