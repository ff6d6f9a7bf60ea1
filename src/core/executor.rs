//! 批执行器
//!
//! 按分组规则取下一批任务：单个任务同步执行；连续的并行任务放入 JoinSet 并发执行，
//! 并发度由 Semaphore 限制为 min(max_workers, 批大小)。所有工作协程共享批开始时的
//! Arc<RunState> 快照，互相看不到对方结果；执行器等待整批结束（屏障）后才返回。
//! 执行器本身不修改 RunState，只返回每个任务的 Partial 与成败。

use std::any::Any;
use std::collections::HashSet;
use std::ops::Range;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::agents::AgentRegistry;
use crate::core::{AgentError, Partial, RunState, TraceRecord};
use crate::plan::{CapabilityManifest, Plan, Task, TaskId};

/// 单个任务的执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Succeeded,
    Failed,
    /// 节点未注册：跳过，既不算成功也不触发重规划
    Skipped,
}

/// 单个任务的执行结果
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub node: String,
    pub status: TaskStatus,
    pub partial: Partial,
}

impl TaskOutcome {
    pub fn is_failure(&self) -> bool {
        self.status == TaskStatus::Failed
    }
}

/// 一批任务的汇总
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// 本批在计划中的下标区间
    pub range: Range<usize>,
    /// 并行批按收集（完成）顺序排列，不保证与提交顺序一致
    pub outcomes: Vec<TaskOutcome>,
}

impl BatchReport {
    pub fn next_index(&self) -> usize {
        self.range.end
    }

    pub fn is_concurrent(&self) -> bool {
        self.range.len() > 1
    }

    /// 失败任务 id（收集顺序）
    pub fn failed_ids(&self) -> Vec<TaskId> {
        self.outcomes
            .iter()
            .filter(|o| o.is_failure())
            .map(|o| o.task_id.clone())
            .collect()
    }
}

/// 批执行器：持有注册表、能力清单、并发上限与单次调用超时
#[derive(Clone)]
pub struct BatchExecutor {
    registry: Arc<AgentRegistry>,
    manifest: Arc<CapabilityManifest>,
    max_workers: usize,
    agent_timeout: Duration,
}

impl BatchExecutor {
    pub fn new(
        registry: Arc<AgentRegistry>,
        manifest: Arc<CapabilityManifest>,
        max_workers: usize,
        agent_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            manifest,
            max_workers: max_workers.max(1),
            agent_timeout,
        }
    }

    /// 执行从 start 开始的一批任务
    pub async fn execute_batch(&self, plan: &Plan, start: usize, state: &RunState) -> BatchReport {
        let range = plan.batch_range(start);
        let tasks = &plan.tasks[range.clone()];
        let snapshot = Arc::new(state.clone());

        let outcomes = match tasks {
            [] => Vec::new(),
            [task] => vec![self.run_task(task.clone(), snapshot, Some(self.agent_timeout)).await],
            _ => self.run_concurrent(tasks, snapshot).await,
        };

        BatchReport { range, outcomes }
    }

    async fn run_concurrent(&self, tasks: &[Task], snapshot: Arc<RunState>) -> Vec<TaskOutcome> {
        let workers = self.max_workers.min(tasks.len());
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut set = JoinSet::new();

        tracing::info!(batch = tasks.len(), workers, "running parallel batch");

        for task in tasks {
            let executor = self.clone();
            let task = task.clone();
            let snapshot = Arc::clone(&snapshot);
            let semaphore = Arc::clone(&semaphore);
            set.spawn(async move {
                // Semaphore 不会被关闭；拿不到许可时照常执行
                let _permit = semaphore.acquire_owned().await.ok();
                let limit = Some(executor.agent_timeout);
                executor.run_task(task, snapshot, limit).await
            });
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!(error = %e, "worker lost"),
            }
        }

        // 丢失的工作协程也要有结果，整批才算收齐
        let reported: HashSet<TaskId> = outcomes.iter().map(|o| o.task_id.clone()).collect();
        for task in tasks.iter().filter(|t| !reported.contains(&t.task_id)) {
            let err = AgentError::Panicked("worker lost before reporting".to_string());
            outcomes.push(failure_outcome(task, Partial::new(), &err));
        }

        outcomes
    }

    /// 终止步骤（预算复核、行程生成）：不套 agent_timeout，其内部的 LLM 调用各自限时；
    /// panic 与错误照常转为失败
    pub async fn execute_terminal(&self, task: Task, state: &RunState) -> TaskOutcome {
        self.run_task(task, Arc::new(state.clone()), None).await
    }

    /// 执行单个任务：未注册节点跳过；超时、panic、错误或主费用 ≤ 0 均为失败
    async fn run_task(&self, task: Task, snapshot: Arc<RunState>, limit: Option<Duration>) -> TaskOutcome {
        let Some(agent) = self.registry.get(&task.node) else {
            tracing::warn!(task_id = %task.task_id, node = %task.node, "unknown node, skipping");
            let partial = Partial::new()
                .message(format!("Unknown node {}, skipped.", task.node))
                .trace(
                    TraceRecord::new(task.node.clone(), "skipped")
                        .with("task_id", task.task_id.clone())
                        .with("reason", "unknown node"),
                );
            return TaskOutcome {
                task_id: task.task_id,
                node: task.node,
                status: TaskStatus::Skipped,
                partial,
            };
        };

        let mut inputs = task.inputs.clone();
        inputs.insert("task_id".to_string(), task.task_id.clone().into());

        let start = Instant::now();
        let call = AssertUnwindSafe(agent.invoke(&snapshot, &inputs)).catch_unwind();
        let finished = match limit {
            Some(limit) => timeout(limit, call).await.ok(),
            None => Some(call.await),
        };
        let result = match finished {
            Some(Ok(result)) => result,
            Some(Err(panic)) => Err(AgentError::Panicked(panic_message(panic))),
            None => Err(AgentError::Timeout(task.node.clone())),
        };

        let outcome = match result {
            Ok(partial) => self.check_headline_cost(&task, partial),
            Err(err) => failure_outcome(&task, Partial::new(), &err),
        };

        let audit = serde_json::json!({
            "event": "agent_audit",
            "task_id": task.task_id,
            "node": task.node,
            "ok": outcome.status == TaskStatus::Succeeded,
            "duration_ms": start.elapsed().as_millis() as u64,
            "inputs_preview": inputs_preview(&task),
        });
        tracing::info!(audit = %audit, "agent");

        outcome
    }

    /// 费用估算节点：主费用 ≤ 0 说明估算静默降级，按失败处理（保留其 Partial 以便合并）
    fn check_headline_cost(&self, task: &Task, partial: Partial) -> TaskOutcome {
        if let Some(field) = self.manifest.headline_cost(&task.node) {
            let cost = partial.number(field).unwrap_or(0.0);
            if cost <= 0.0 {
                let err = AgentError::Failed(format!("{} resolved to {}", field, cost));
                return failure_outcome(task, partial, &err);
            }
        }
        TaskOutcome {
            task_id: task.task_id.clone(),
            node: task.node.clone(),
            status: TaskStatus::Succeeded,
            partial,
        }
    }
}

fn failure_outcome(task: &Task, partial: Partial, err: &AgentError) -> TaskOutcome {
    tracing::warn!(task_id = %task.task_id, node = %task.node, error = %err, "task failed");
    let partial = partial
        .message(format!("Agent {} failed: {}", task.node, err))
        .trace(
            TraceRecord::new(task.node.clone(), "error")
                .with("task_id", task.task_id.clone())
                .with("error", err.to_string()),
        );
    TaskOutcome {
        task_id: task.task_id.clone(),
        node: task.node.clone(),
        status: TaskStatus::Failed,
        partial,
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn inputs_preview(task: &Task) -> String {
    let s = serde_json::Value::Object(task.inputs.clone()).to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
