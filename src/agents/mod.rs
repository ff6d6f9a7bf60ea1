//! 内置 Agent 与注册表
//!
//! - **registry**: Agent trait、AgentRegistry、输入解析
//! - **estimators**: 航班 / 住宿 / 餐饮 / 活动离线估算
//! - **total_cost**: 总费用检查
//! - **budget_review**: 超支复核
//! - **itinerary**: 逐日行程生成

pub mod budget_review;
pub mod estimators;
pub mod itinerary;
pub mod registry;
pub mod total_cost;

use std::sync::Arc;
use std::time::Duration;

pub use budget_review::BudgetReview;
pub use estimators::{AccommodationAgent, ActivitiesAgent, EstimatorRates, FlightAgent, FoodAgent};
pub use itinerary::{template_itinerary, DayBlocks, ItineraryPlanner};
pub use registry::{resolve_input, resolve_number, resolve_str, Agent, AgentRegistry};
pub use total_cost::TotalCostCheck;

use crate::llm::LlmClient;

/// 注册全部内置节点；llm 为 None 时预算建议与行程都走确定性文案
pub fn default_registry(
    rates: &EstimatorRates,
    llm: Option<Arc<dyn LlmClient>>,
    llm_timeout: Duration,
    llm_attempts: u32,
) -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    registry.register(FlightAgent::new(rates.clone()));
    registry.register(AccommodationAgent::new(rates.clone()));
    registry.register(FoodAgent::new(rates.clone()));
    registry.register(ActivitiesAgent::new(rates.clone()));
    registry.register(TotalCostCheck);
    registry.register(BudgetReview::new(llm.clone(), llm_timeout));
    registry.register(ItineraryPlanner::new(llm, llm_timeout, llm_attempts));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::CapabilityManifest;

    #[test]
    fn test_default_registry_covers_manifest() {
        let registry = default_registry(&EstimatorRates::default(), None, Duration::from_secs(1), 1);
        let manifest = CapabilityManifest::default();
        for node in manifest.nodes() {
            assert!(registry.contains(node), "missing {}", node);
        }
        assert_eq!(registry.names().len(), 7);
    }
}
