//! Agent 注册表
//!
//! 所有 Agent 实现 Agent trait（name / description / invoke），由 AgentRegistry 按节点名注册与查找；
//! 批执行器调用时加超时与 panic 捕获，统一转为失败的 Partial。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::{AgentError, Partial, RunState};
use crate::plan::TaskInputs;

/// Agent trait：节点名、描述（写入规划提示词）、异步调用
///
/// `state` 是批开始时的只读快照；返回的 Partial 由编排器在汇合点合并。
#[async_trait]
pub trait Agent: Send + Sync {
    /// 节点名（计划中 Task.node 的取值）
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    async fn invoke(&self, state: &RunState, inputs: &TaskInputs) -> Result<Partial, AgentError>;
}

/// 注册表：按节点名存储 Arc<dyn Agent>
#[derive(Default, Clone)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, agent: impl Agent + 'static) {
        let name = agent.name().to_string();
        self.agents.insert(name, Arc::new(agent));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    /// (name, description) 列表，用于规划提示词
    pub fn descriptions(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .agents
            .iter()
            .map(|(name, agent)| (name.clone(), agent.description().to_string()))
            .collect();
        out.sort();
        out
    }
}

/// 读取输入：优先 task inputs，其次状态快照（含行程参数）
pub fn resolve_input(state: &RunState, inputs: &TaskInputs, key: &str) -> Option<Value> {
    inputs
        .get(key)
        .filter(|v| !v.is_null())
        .cloned()
        .or_else(|| state.lookup(key))
}

pub fn resolve_str(state: &RunState, inputs: &TaskInputs, key: &str) -> Option<String> {
    resolve_input(state, inputs, key).and_then(|v| match v {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

pub fn resolve_number(state: &RunState, inputs: &TaskInputs, key: &str) -> Option<f64> {
    resolve_input(state, inputs, key).and_then(|v| crate::core::state::as_number(&v))
}

/// 输入是否带有某个布尔标记（如 _retry_relax）
pub fn has_marker(inputs: &TaskInputs, key: &str) -> bool {
    inputs.get(key).and_then(Value::as_bool).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TripRequest;

    struct EchoAgent;

    #[async_trait]
    impl Agent for EchoAgent {
        fn name(&self) -> &str {
            "ECHO"
        }

        fn description(&self) -> &str {
            "echo inputs"
        }

        async fn invoke(&self, _state: &RunState, inputs: &TaskInputs) -> Result<Partial, AgentError> {
            Ok(Partial::new().set("echo", Value::Object(inputs.clone())))
        }
    }

    #[tokio::test]
    async fn test_register_and_invoke() {
        let mut registry = AgentRegistry::new();
        registry.register(EchoAgent);
        assert!(registry.contains("ECHO"));
        assert!(registry.get("MISSING").is_none());

        let state = RunState::new(TripRequest::new("Rome", "ROM", "2025-01-01", "2025-01-02", 10.0));
        let mut inputs = TaskInputs::new();
        inputs.insert("x".into(), Value::from(1));
        let partial = registry.get("ECHO").unwrap().invoke(&state, &inputs).await.unwrap();
        assert_eq!(partial.get("echo").unwrap()["x"], 1);
    }

    #[test]
    fn test_resolve_prefers_inputs() {
        let state = RunState::new(TripRequest::new("Rome", "ROM", "2025-01-01", "2025-01-02", 10.0));
        let mut inputs = TaskInputs::new();
        inputs.insert("city".into(), Value::from("Milan"));
        inputs.insert("budget".into(), Value::Null);
        assert_eq!(resolve_str(&state, &inputs, "city").as_deref(), Some("Milan"));
        assert_eq!(resolve_number(&state, &inputs, "budget"), Some(10.0));
        assert_eq!(resolve_str(&state, &inputs, "city_iata").as_deref(), Some("ROM"));
    }
}
