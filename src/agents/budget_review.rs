//! 预算复核
//!
//! 剩余预算 ≥ 0 时直接跳过；超支时向 LLM 请求取舍建议（限时，失败用固定文案），
//! 并把航班 / 住宿 / 活动中最大的一项削减 20%，重新计算剩余预算。餐饮不参与削减。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::agents::registry::Agent;
use crate::core::{AgentError, CostCategory, Partial, RunState, TraceRecord};
use crate::llm::{LlmClient, Message};
use crate::plan::{nodes, TaskInputs};

/// 削减比例
pub const REDUCTION_RATIO: f64 = 0.20;

const FALLBACK_SUGGESTION: &str =
    "LLM unavailable or timed out; consider reducing the largest expense by ~20%.";

pub struct BudgetReview {
    llm: Option<Arc<dyn LlmClient>>,
    timeout: Duration,
}

impl BudgetReview {
    pub fn new(llm: Option<Arc<dyn LlmClient>>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    async fn suggestion(&self, state: &RunState, over_by: f64) -> String {
        let Some(llm) = &self.llm else {
            return FALLBACK_SUGGESTION.to_string();
        };

        let messages = [
            Message::system(format!(
                "You are a travel budget analyst. The user is over budget by ₹{:.2}. \
                 Suggest concise concrete trade-offs focusing on Flights, Hotel, Activities (bulleted list).",
                over_by
            )),
            Message::user(format!(
                "Current costs: Flight ₹{:.2}, Hotel ₹{:.2}, Food ₹{:.2}, Activities ₹{:.2}. Original Budget: ₹{:.2}.",
                state.cost(CostCategory::Flight),
                state.cost(CostCategory::Accommodation),
                state.cost(CostCategory::Food),
                state.cost(CostCategory::Activities),
                state.budget(),
            )),
        ];

        match tokio::time::timeout(self.timeout, llm.complete(&messages)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(Ok(_)) => FALLBACK_SUGGESTION.to_string(),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "budget suggestion failed, using fallback");
                FALLBACK_SUGGESTION.to_string()
            }
            Err(_) => {
                tracing::warn!(timeout_secs = self.timeout.as_secs(), "budget suggestion timed out");
                FALLBACK_SUGGESTION.to_string()
            }
        }
    }
}

/// 可削减类别中费用最大的一项；并列时取先出现的
fn largest_reducible(state: &RunState) -> CostCategory {
    let mut largest = CostCategory::REDUCIBLE[0];
    for category in CostCategory::REDUCIBLE.iter().skip(1) {
        if state.cost(*category) > state.cost(largest) {
            largest = *category;
        }
    }
    largest
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[async_trait]
impl Agent for BudgetReview {
    fn name(&self) -> &str {
        nodes::BUDGET_REVIEW
    }

    fn description(&self) -> &str {
        "When over budget, suggest trade-offs and cut the largest of flight / accommodation / activities by 20%."
    }

    async fn invoke(&self, state: &RunState, _inputs: &TaskInputs) -> Result<Partial, AgentError> {
        let remaining = state.remaining_budget();
        if remaining >= 0.0 {
            return Ok(Partial::new()
                .set("is_budget_met", true)
                .set("next_action", nodes::ITINERARY_PLANNER)
                .message("Budget review skipped: plan already within budget.")
                .trace(TraceRecord::new(nodes::BUDGET_REVIEW, "skipped").with("remaining_budget", remaining)));
        }

        let over_by = -remaining;
        tracing::info!(over_by, "running budget review");
        let suggestion = self.suggestion(state, over_by).await;

        let category = largest_reducible(state);
        let current = state.cost(category);
        let cut = round2(current * REDUCTION_RATIO);
        let reduced = (current - cut).max(0.0);

        let total_after = state.total_cost() - current + reduced;
        let new_remaining = round2(state.budget() - total_after);
        let met = new_remaining >= 0.0;
        let action = format!("Reduced {} by ₹{:.2}.", category.label(), cut);

        Ok(Partial::new()
            .set(category.field(), reduced)
            .set("suggestion", suggestion)
            .set("action", action.clone())
            .set("remaining_budget", new_remaining)
            .set("is_budget_met", met)
            .set(
                "next_action",
                if met { nodes::ITINERARY_PLANNER } else { nodes::BUDGET_REVIEW },
            )
            .message(format!("Budget review applied: {}", action))
            .message(format!("Recomputed remaining budget: ₹{:.2}.", new_remaining))
            .trace(
                TraceRecord::new(nodes::BUDGET_REVIEW, "reduce")
                    .with("category", category.field())
                    .with("cut", cut)
                    .with("remaining_budget", new_remaining),
            ))
    }
}
