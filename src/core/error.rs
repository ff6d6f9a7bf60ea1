//! 错误类型
//!
//! AgentError：单个 Agent 调用失败（由批执行器转为失败的 Partial，交给重规划器决策）；
//! PlanError：计划结构不合法（调用方丢弃并替换为确定性兜底计划）。
//! 两者都不会从 Orchestrator::run 向外传播。

use thiserror::Error;

/// Agent 调用过程中可能出现的错误（外部服务、超时、崩溃、输入缺失等）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Agent failed: {0}")]
    Failed(String),

    #[error("Agent timeout: {0}")]
    Timeout(String),

    /// 工作协程 panic，被 catch_unwind 捕获
    #[error("Agent panicked: {0}")]
    Panicked(String),

    #[error("Missing input: {0}")]
    MissingInput(String),
}

/// 计划校验错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("Plan has no tasks")]
    Empty,

    #[error("Plan has {count} tasks, max is {max}")]
    TooManyTasks { count: usize, max: usize },

    #[error("Task #{0} has empty task_id")]
    MissingTaskId(usize),

    #[error("Task {0} has empty node")]
    MissingNode(String),

    #[error("Duplicate task_id: {0}")]
    DuplicateTaskId(String),

    #[error("Malformed plan: {0}")]
    Malformed(String),
}
