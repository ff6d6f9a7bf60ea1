//! 重规划器
//!
//! 先走生成路径（限时 + 缓存），生成失败、超时、解析失败或校验不通过时按规则处理，
//! 先匹配先生效：
//! 1. 重试：清单允许且尚未用完次数 → `<id>_retry`，输入加放宽标记
//! 2. 备用提供者：换成第一个备用节点 → `<id>_fallback`
//! 3. 删除失败任务
//!
//! 重规划从不失败；每次返回的计划都有新的 plan_id。

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::core::RunState;
use crate::plan::{
    nodes, validate, validate_terminal, CapabilityManifest, Plan, Task, TaskId, FALLBACK_MARKER,
    RETRY_ATTEMPT, RETRY_MARKER,
};
use crate::planning::generation::{
    generate_with_timeout, CacheKey, Generation, PlanCache, PlanSource, ReplanGenerator,
    ReplanRequest, ScenarioFingerprint,
};

const PREFIX: &str = "replan";

/// 失败上下文：首个失败任务、本批全部失败任务、状态快照
#[derive(Debug, Clone)]
pub struct FailureContext {
    pub failing_task_id: TaskId,
    pub failed_tasks: Vec<TaskId>,
    pub state_snapshot: RunState,
}

impl FailureContext {
    pub fn new(failed_tasks: Vec<TaskId>, state_snapshot: RunState) -> Option<Self> {
        let failing_task_id = failed_tasks.first()?.clone();
        Some(Self {
            failing_task_id,
            failed_tasks,
            state_snapshot,
        })
    }

    /// 写入重规划提示词的摘要
    pub fn summary(&self) -> Value {
        let state = &self.state_snapshot;
        serde_json::json!({
            "failing_task_id": self.failing_task_id,
            "failed_tasks": self.failed_tasks,
            "budget": state.budget(),
            "total_cost": state.total_cost(),
            "remaining_budget": state.remaining_budget(),
            "recent_messages": state.messages().iter().rev().take(5).collect::<Vec<_>>(),
        })
    }
}

/// 重试变体
fn retry_task(task: &Task) -> Task {
    let attempt = task.retry_attempts() + 1;
    let mut retry = task.clone();
    retry.task_id = format!("{}_retry", task.task_id);
    retry.inputs.insert(RETRY_MARKER.to_string(), Value::Bool(true));
    retry.inputs.insert(RETRY_ATTEMPT.to_string(), Value::from(attempt));
    retry.parallel = false;
    retry.on_failure = nodes::BUDGET_REVIEW.to_string();
    retry
}

/// 备用提供者替换
fn fallback_task(task: &Task, provider: &str) -> Task {
    let mut fallback = task.clone();
    fallback.task_id = format!("{}_fallback", task.task_id);
    fallback.node = provider.to_string();
    fallback
        .inputs
        .insert(FALLBACK_MARKER.to_string(), Value::Bool(true));
    fallback.parallel = false;
    fallback.on_failure = nodes::BUDGET_REVIEW.to_string();
    fallback
}

fn substitute(current: &Plan, failing_id: &str, replacement: &Task) -> Plan {
    let tasks = current
        .tasks
        .iter()
        .map(|t| {
            if t.task_id == failing_id {
                replacement.clone()
            } else {
                t.clone()
            }
        })
        .collect();
    Plan::new(PREFIX, tasks)
}

/// 确定性规则（不访问生成器）
pub fn apply_rules(
    failing_task_id: &str,
    manifest: &CapabilityManifest,
    current: &Plan,
    max_tasks: usize,
) -> (Plan, PlanSource) {
    let Some(task) = current.get(failing_task_id) else {
        return (Plan::new(PREFIX, current.tasks.clone()), PlanSource::Unchanged);
    };

    let max_retries = manifest.max_retries(&task.node);
    if max_retries > 0 && task.retry_attempts() < max_retries {
        let plan = substitute(current, failing_task_id, &retry_task(task));
        if validate(&plan, max_tasks).is_ok() {
            return (plan, PlanSource::Retry);
        }
    }

    if !task.is_fallback() {
        if let Some(provider) = manifest.fallback_providers(&task.node).first() {
            let plan = substitute(current, failing_task_id, &fallback_task(task, provider));
            if validate(&plan, max_tasks).is_ok() {
                return (plan, PlanSource::FallbackProvider);
            }
        }
    }

    let remaining = current
        .tasks
        .iter()
        .filter(|t| t.task_id != failing_task_id)
        .cloned()
        .collect();
    (Plan::new(PREFIX, remaining), PlanSource::Dropped)
}

pub struct Replanner {
    generator: Option<Arc<dyn ReplanGenerator>>,
    cache: Arc<PlanCache>,
    timeout: Duration,
    max_tasks: usize,
    bucket_size: f64,
}

impl Replanner {
    pub fn new(
        generator: Option<Arc<dyn ReplanGenerator>>,
        cache: Arc<PlanCache>,
        timeout: Duration,
        max_tasks: usize,
        bucket_size: f64,
    ) -> Self {
        Self {
            generator,
            cache,
            timeout,
            max_tasks,
            bucket_size,
        }
    }

    pub async fn replan(
        &self,
        ctx: &FailureContext,
        manifest: &CapabilityManifest,
        current: &Plan,
    ) -> (Plan, PlanSource) {
        if let Some(generator) = &self.generator {
            let key = CacheKey::replan(
                ScenarioFingerprint::new(ctx.state_snapshot.trip(), self.bucket_size),
                current,
                &ctx.failing_task_id,
            );
            if let Some(plan) = self.cache.get(&key, PREFIX).await {
                tracing::info!(plan_id = %plan.plan_id, "replan served from cache");
                return (plan, PlanSource::Cached);
            }

            let request = ReplanRequest {
                current_plan: current.clone(),
                failure: ctx.summary(),
                manifest: manifest.to_json(),
                max_tasks: self.max_tasks,
            };
            let generator = Arc::clone(generator);
            let generated = generate_with_timeout("replanner", self.timeout, async move {
                generator.replan(request).await
            })
            .await;

            match generated {
                Generation::Success(mut plan) => match validate(&plan, self.max_tasks) {
                    Ok(()) => {
                        // 生成器可能沿用旧 id，统一换新
                        plan.plan_id = crate::plan::new_plan_id(PREFIX);
                        self.cache.insert(key, plan.clone()).await;
                        return (plan, PlanSource::Generated);
                    }
                    Err(e) => tracing::warn!(error = %e, "generated replan invalid, using rules"),
                },
                Generation::Failed(reason) => {
                    tracing::warn!(reason = %reason, "replan generation failed, using rules")
                }
            }
        }

        let (plan, source) = apply_rules(&ctx.failing_task_id, manifest, current, self.max_tasks);
        if let Err(e) = validate_terminal(&plan, self.max_tasks) {
            // 当前计划本身不合法时才会发生；交给编排器按空计划终止
            tracing::warn!(error = %e, "rule-based replan invalid, dropping all tasks");
            return (Plan::new(PREFIX, Vec::new()), PlanSource::Dropped);
        }
        tracing::info!(
            plan_id = %plan.plan_id,
            source = source.as_str(),
            failing = %ctx.failing_task_id,
            "replanned"
        );
        (plan, source)
    }
}
