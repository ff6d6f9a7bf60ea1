//! 基于 LLM 的计划 / 重规划生成器
//!
//! 提示词包含用户目标、能力清单与上下文；从回复中提取 JSON（```json 代码块或最外层花括号），
//! 解析为 Plan。`{"error": ...}` 回复、无法解析的输出都视为 Failed。
//! LLM 调用失败时按 attempt × backoff 线性退避，最多 max_attempts 次。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::PlanError;
use crate::llm::{LlmClient, Message};
use crate::plan::{new_plan_id, Plan};
use crate::planning::generation::{
    Generation, PlanGenerator, PlanRequest, ReplanGenerator, ReplanRequest,
};

const PLANNER_PROMPT: &str = r#"You are an orchestration planner. Input: user_goal, agent manifest, context.
Return ONLY valid JSON following this schema EXACTLY:
{ "plan_id": string, "tasks": [ { "task_id": string, "node": string, "inputs": object, "parallel": boolean, "on_success": string, "on_failure": string } ] }
MAX tasks: {max_tasks}.
Consecutive tasks with "parallel": true run concurrently and must write different outputs.
If you cannot produce valid JSON, return {"error":"cannot_generate"}.
SAMPLE:
{"plan_id":"ex1","tasks":[{"task_id":"t1","node":"FLIGHT_AGENT","inputs":{},"parallel":false,"on_success":"t2","on_failure":"BUDGET_REVIEW"}]}"#;

const REPLANNER_PROMPT: &str = r#"You are a replanner. Never create placeholder tasks.
Rules:
1) Retry the failed task if its retry strategy allows (add "_retry_relax": true to its inputs)
2) Else use the first fallback provider if available
3) Else remove the failing task and keep a minimal valid plan
MAX tasks: {max_tasks}.
Return ONLY valid JSON with the same schema as the current plan."#;

/// 从 LLM 回复中提取 JSON 文本
pub fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        let body = rest.find("```").map(|end| &rest[..end]).unwrap_or(rest);
        return Some(body.trim());
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 解析 LLM 输出为 Plan；缺失或为空的 plan_id 用 prefix 重新生成
pub fn parse_plan_output(output: &str, prefix: &str) -> Result<Plan, PlanError> {
    let json = extract_json(output)
        .ok_or_else(|| PlanError::Malformed("no JSON object in output".to_string()))?;
    let mut value: Value =
        serde_json::from_str(json).map_err(|e| PlanError::Malformed(e.to_string()))?;

    let obj = value
        .as_object_mut()
        .ok_or_else(|| PlanError::Malformed("plan is not an object".to_string()))?;
    if let Some(err) = obj.get("error") {
        return Err(PlanError::Malformed(format!("generator declined: {}", err)));
    }
    if !obj.get("tasks").map(Value::is_array).unwrap_or(false) {
        return Err(PlanError::Malformed("missing tasks array".to_string()));
    }
    let has_id = obj
        .get("plan_id")
        .and_then(Value::as_str)
        .map(|s| !s.trim().is_empty())
        .unwrap_or(false);
    if !has_id {
        obj.insert("plan_id".to_string(), Value::from(new_plan_id(prefix)));
    }

    serde_json::from_value(value).map_err(|e| PlanError::Malformed(e.to_string()))
}

/// 共享的调用逻辑：有限次尝试 + 线性退避；解析失败立即返回 Failed
struct LlmCaller {
    llm: Arc<dyn LlmClient>,
    max_attempts: u32,
    backoff: Duration,
}

impl LlmCaller {
    async fn call(&self, label: &str, messages: &[Message], prefix: &str) -> Generation<Plan> {
        let attempts = self.max_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.llm.complete(messages).await {
                Ok(raw) => {
                    return match parse_plan_output(&raw, prefix) {
                        Ok(plan) => Generation::Success(plan),
                        Err(e) => {
                            let preview: String = raw.chars().take(500).collect();
                            tracing::warn!(label, error = %e, raw = %preview, "unusable plan output");
                            Generation::Failed(e.to_string())
                        }
                    };
                }
                Err(e) => {
                    tracing::warn!(label, attempt, error = %e, "llm call failed");
                    last_error = e;
                    if attempt < attempts {
                        tokio::time::sleep(self.backoff * attempt).await;
                    }
                }
            }
        }
        Generation::Failed(format!("llm failed after {} attempts: {}", attempts, last_error))
    }
}

pub struct LlmPlanGenerator {
    caller: LlmCaller,
}

impl LlmPlanGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            caller: LlmCaller {
                llm,
                max_attempts,
                backoff,
            },
        }
    }
}

#[async_trait]
impl PlanGenerator for LlmPlanGenerator {
    async fn generate(&self, request: PlanRequest) -> Generation<Plan> {
        let messages = [
            Message::system(PLANNER_PROMPT.replace("{max_tasks}", &request.max_tasks.to_string())),
            Message::user(format!(
                "USER_GOAL: {}\nMANIFEST: {}\nCONTEXT: {}\nReturn JSON only.",
                request.goal, request.manifest, request.context
            )),
        ];
        self.caller.call("planner", &messages, "plan").await
    }
}

pub struct LlmReplanGenerator {
    caller: LlmCaller,
}

impl LlmReplanGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            caller: LlmCaller {
                llm,
                max_attempts,
                backoff,
            },
        }
    }
}

#[async_trait]
impl ReplanGenerator for LlmReplanGenerator {
    async fn replan(&self, request: ReplanRequest) -> Generation<Plan> {
        let current = serde_json::to_string(&request.current_plan).unwrap_or_default();
        let messages = [
            Message::system(REPLANNER_PROMPT.replace("{max_tasks}", &request.max_tasks.to_string())),
            Message::user(format!(
                "CURRENT_PLAN: {}\nFAILURE: {}\nMANIFEST: {}",
                current, request.failure, request.manifest
            )),
        ];
        self.caller.call("replanner", &messages, "replan").await
    }
}
