//! 计划类型定义
//!
//! Plan 是扁平的 Task 数组，后继关系用符号 task_id 表示（而非指针图），
//! 重规划时整体替换数组即可。

use std::ops::Range;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type TaskId = String;
pub type TaskInputs = Map<String, Value>;

/// 内置节点名
pub mod nodes {
    pub const FLIGHT: &str = "FLIGHT_AGENT";
    pub const ACCOMMODATION: &str = "ACCOMMODATION_AGENT";
    pub const FOOD: &str = "FOOD_AGENT";
    pub const ACTIVITIES: &str = "ACTIVITIES_AGENT";
    pub const TOTAL_COST_CHECK: &str = "TOTAL_COST_CHECK";
    pub const BUDGET_REVIEW: &str = "BUDGET_REVIEW";
    pub const ITINERARY_PLANNER: &str = "ITINERARY_PLANNER";
}

/// on_failure 的特殊取值：交给重规划器
pub const REPLAN: &str = "REPLAN";

/// 重试变体的输入标记（放宽约束）
pub const RETRY_MARKER: &str = "_retry_relax";
/// 重试次数
pub const RETRY_ATTEMPT: &str = "_retry_attempt";
/// 备用提供者替换的输入标记
pub const FALLBACK_MARKER: &str = "_from_fallback";

fn default_on_success() -> String {
    nodes::ITINERARY_PLANNER.to_string()
}

fn default_on_failure() -> String {
    nodes::BUDGET_REVIEW.to_string()
}

/// 计划中的一步
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    /// 能力名（在 AgentRegistry 中解析）
    pub node: String,
    #[serde(default)]
    pub inputs: TaskInputs,
    /// 与紧邻的并行任务组成一批并发执行
    #[serde(default)]
    pub parallel: bool,
    /// 下一个 task_id 或终止标记
    #[serde(default = "default_on_success")]
    pub on_success: String,
    /// 下一个 task_id、终止标记或 REPLAN
    #[serde(default = "default_on_failure")]
    pub on_failure: String,
}

impl Task {
    pub fn new(task_id: impl Into<TaskId>, node: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            node: node.into(),
            inputs: Map::new(),
            parallel: false,
            on_success: default_on_success(),
            on_failure: default_on_failure(),
        }
    }

    pub fn input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn on_success(mut self, next: impl Into<String>) -> Self {
        self.on_success = next.into();
        self
    }

    pub fn on_failure(mut self, next: impl Into<String>) -> Self {
        self.on_failure = next.into();
        self
    }

    /// 已经历的重试次数（由重规划器写入 RETRY_ATTEMPT）
    pub fn retry_attempts(&self) -> u32 {
        self.inputs
            .get(RETRY_ATTEMPT)
            .and_then(Value::as_u64)
            .map(|n| n as u32)
            .or_else(|| {
                self.inputs
                    .get(RETRY_MARKER)
                    .and_then(Value::as_bool)
                    .filter(|b| *b)
                    .map(|_| 1)
            })
            .unwrap_or(0)
    }

    /// 是否已是备用提供者替换出的任务
    pub fn is_fallback(&self) -> bool {
        self.inputs
            .get(FALLBACK_MARKER)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// 计划：有序任务列表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Plan {
    /// 以新生成的唯一 id 创建计划
    pub fn new(prefix: &str, tasks: Vec<Task>) -> Self {
        Self {
            plan_id: new_plan_id(prefix),
            tasks,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn position(&self, task_id: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.task_id == task_id)
    }

    pub fn get(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    /// 从 start 开始的下一批：若 tasks[start] 标记并行，则连同其后所有连续的并行任务；
    /// 否则只含 tasks[start]。start 越界时返回空区间。
    pub fn batch_range(&self, start: usize) -> Range<usize> {
        if start >= self.tasks.len() {
            return start..start;
        }
        let mut end = start + 1;
        if self.tasks[start].parallel {
            while end < self.tasks.len() && self.tasks[end].parallel {
                end += 1;
            }
        }
        start..end
    }

    pub fn task_ids(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.task_id.as_str()).collect()
    }
}

/// `<prefix>_<UTC 时间戳>_<uuid 前 8 位>`
pub fn new_plan_id(prefix: &str) -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}",
        prefix,
        chrono::Utc::now().format("%Y%m%d%H%M%S"),
        &uuid[..8]
    )
}
