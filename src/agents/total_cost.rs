//! 总费用检查：只读当前剩余预算，给出下一步建议

use async_trait::async_trait;

use crate::agents::registry::Agent;
use crate::core::{AgentError, Partial, RunState, TraceRecord};
use crate::plan::{nodes, TaskInputs};

pub struct TotalCostCheck;

#[async_trait]
impl Agent for TotalCostCheck {
    fn name(&self) -> &str {
        nodes::TOTAL_COST_CHECK
    }

    fn description(&self) -> &str {
        "Check the summed costs against the budget and decide between BUDGET_REVIEW and ITINERARY_PLANNER."
    }

    async fn invoke(&self, state: &RunState, _inputs: &TaskInputs) -> Result<Partial, AgentError> {
        let remaining = state.remaining_budget();
        let (message, next) = if remaining < 0.0 {
            ("Total cost exceeded budget.", nodes::BUDGET_REVIEW)
        } else {
            ("Total cost within budget.", nodes::ITINERARY_PLANNER)
        };

        Ok(Partial::new()
            .set("next_action", next)
            .message(message)
            .trace(
                TraceRecord::new(nodes::TOTAL_COST_CHECK, "check")
                    .with("total_cost", state.total_cost())
                    .with("remaining_budget", remaining),
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TripRequest;

    #[tokio::test]
    async fn test_over_budget_routes_to_review() {
        let mut state = RunState::new(TripRequest::new("Goa", "GOI", "2025-03-01", "2025-03-02", 100.0));
        state.merge(Partial::new().set("flight_cost", 150.0));
        state.recompute_remaining_budget();

        let out = TotalCostCheck.invoke(&state, &TaskInputs::new()).await.unwrap();
        assert_eq!(out.get("next_action").unwrap(), nodes::BUDGET_REVIEW);
        assert_eq!(out.messages, vec!["Total cost exceeded budget.".to_string()]);
    }

    #[tokio::test]
    async fn test_within_budget() {
        let state = RunState::new(TripRequest::new("Goa", "GOI", "2025-03-01", "2025-03-02", 100.0));
        let out = TotalCostCheck.invoke(&state, &TaskInputs::new()).await.unwrap();
        assert_eq!(out.get("next_action").unwrap(), nodes::ITINERARY_PLANNER);
    }
}
