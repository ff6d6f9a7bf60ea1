//! 计划生成抽象
//!
//! 生成能力（LLM 或其它）只返回 `Generation<Plan>`：成功给出计划，失败给出原因。
//! 调用都在独立任务中执行并加超时；超时后丢弃 JoinHandle，调用方走自己的确定性兜底。
//! 成功且通过校验的计划按场景指纹缓存，进程内有效。

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::core::TripRequest;
use crate::plan::{new_plan_id, Plan, TaskId};

/// 生成结果：成功或失败原因
#[derive(Debug, Clone, PartialEq)]
pub enum Generation<T> {
    Success(T),
    Failed(String),
}

impl<T> Generation<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Generation::Success(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Generation::Success(v) => Some(v),
            Generation::Failed(_) => None,
        }
    }
}

/// 计划来源（写入 plan_adopted 追踪记录）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    /// 生成器新产出
    Generated,
    /// 命中计划缓存
    Cached,
    /// 确定性兜底计划
    Fallback,
    /// 重试变体替换失败任务
    Retry,
    /// 备用提供者替换失败任务
    FallbackProvider,
    /// 删除失败任务
    Dropped,
    /// 失败任务不在计划中，原样换新 id
    Unchanged,
}

impl PlanSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanSource::Generated => "generated",
            PlanSource::Cached => "cached",
            PlanSource::Fallback => "fallback",
            PlanSource::Retry => "retry",
            PlanSource::FallbackProvider => "fallback_provider",
            PlanSource::Dropped => "dropped",
            PlanSource::Unchanged => "unchanged",
        }
    }
}

/// 初始规划请求
#[derive(Debug, Clone, Serialize)]
pub struct PlanRequest {
    /// 用户目标（行程参数）
    pub goal: Value,
    /// 能力清单
    pub manifest: Value,
    /// 附加上下文（可用节点描述等）
    pub context: Value,
    pub max_tasks: usize,
}

/// 重规划请求
#[derive(Debug, Clone, Serialize)]
pub struct ReplanRequest {
    pub current_plan: Plan,
    /// 失败上下文摘要
    pub failure: Value,
    pub manifest: Value,
    pub max_tasks: usize,
}

#[async_trait]
pub trait PlanGenerator: Send + Sync {
    async fn generate(&self, request: PlanRequest) -> Generation<Plan>;
}

#[async_trait]
pub trait ReplanGenerator: Send + Sync {
    async fn replan(&self, request: ReplanRequest) -> Generation<Plan>;
}

/// 在独立任务中执行生成并限时；超时或任务崩溃都转为 Failed
pub async fn generate_with_timeout<F, T>(label: &str, limit: Duration, generation: F) -> Generation<T>
where
    F: Future<Output = Generation<T>> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::spawn(generation);
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            tracing::warn!(label, error = %e, "generation task crashed");
            Generation::Failed(format!("{} generation crashed: {}", label, e))
        }
        Err(_) => {
            tracing::warn!(label, timeout_ms = limit.as_millis() as u64, "generation timed out");
            Generation::Failed(format!("{} generation timed out after {:?}", label, limit))
        }
    }
}

/// 场景指纹：小写城市名、天数、预算分桶
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScenarioFingerprint {
    pub city: String,
    pub duration_days: u32,
    pub budget_bucket: i64,
}

impl ScenarioFingerprint {
    pub fn new(trip: &TripRequest, bucket_size: f64) -> Self {
        let bucket_size = if bucket_size > 0.0 { bucket_size } else { 1.0 };
        Self {
            city: trip.city.trim().to_lowercase(),
            duration_days: trip.duration_days(),
            budget_bucket: (trip.budget / bucket_size).floor() as i64,
        }
    }
}

/// 缓存键：初始规划与重规划分开
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Initial(ScenarioFingerprint),
    /// 当前计划的 task_id 序列 + 失败任务 id；已执行过的变体不会命中同一条目
    Replan {
        scenario: ScenarioFingerprint,
        current_tasks: Vec<TaskId>,
        failing_task_id: TaskId,
    },
}

impl CacheKey {
    pub fn replan(scenario: ScenarioFingerprint, current: &Plan, failing_task_id: &str) -> Self {
        CacheKey::Replan {
            scenario,
            current_tasks: current.tasks.iter().map(|t| t.task_id.clone()).collect(),
            failing_task_id: failing_task_id.to_string(),
        }
    }
}

/// 进程内计划缓存；只存生成成功且通过校验的计划，从不失效
#[derive(Debug, Default)]
pub struct PlanCache {
    entries: RwLock<HashMap<CacheKey, Plan>>,
}

impl PlanCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 命中时返回带新 plan_id 的副本
    pub async fn get(&self, key: &CacheKey, prefix: &str) -> Option<Plan> {
        let entries = self.entries.read().await;
        entries.get(key).map(|plan| Plan {
            plan_id: new_plan_id(prefix),
            tasks: plan.tasks.clone(),
        })
    }

    pub async fn insert(&self, key: CacheKey, plan: Plan) {
        self.entries.write().await.insert(key, plan);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
