//! 能力清单
//!
//! 每个节点的输入/输出字段、是否可并行、重试策略、备用提供者，以及「主费用字段」
//! （该字段 ≤ 0 视为估算静默降级，判定任务失败）。只读，由配置提供，供重规划器与批执行器查询。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::plan::types::nodes;

/// 重试策略
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryStrategy {
    #[serde(default)]
    pub max_retries: u32,
}

/// 单个节点的能力声明
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySpec {
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub parallelizable: bool,
    #[serde(default)]
    pub retry_strategy: RetryStrategy,
    /// 按优先级排列的备用节点名
    #[serde(default)]
    pub fallback_providers: Vec<String>,
    /// 主费用字段；执行后该字段 ≤ 0 即失败
    #[serde(default)]
    pub headline_cost: Option<String>,
}

impl CapabilitySpec {
    fn new(inputs: &[&str], outputs: &[&str], parallelizable: bool) -> Self {
        Self {
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            parallelizable,
            ..Self::default()
        }
    }

    fn cost_estimator(mut self, cost_field: &str, max_retries: u32) -> Self {
        self.headline_cost = Some(cost_field.to_string());
        self.retry_strategy.max_retries = max_retries;
        self
    }
}

/// 配置中的 [manifest.<NODE>] 条目：只覆盖写出的字段，其余沿用内置声明
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CapabilityOverride {
    pub inputs: Option<Vec<String>>,
    pub outputs: Option<Vec<String>>,
    pub parallelizable: Option<bool>,
    pub retry_strategy: Option<RetryStrategy>,
    pub fallback_providers: Option<Vec<String>>,
    pub headline_cost: Option<String>,
}

impl CapabilityOverride {
    fn apply_to(&self, spec: &mut CapabilitySpec) {
        if let Some(inputs) = &self.inputs {
            spec.inputs = inputs.clone();
        }
        if let Some(outputs) = &self.outputs {
            spec.outputs = outputs.clone();
        }
        if let Some(parallelizable) = self.parallelizable {
            spec.parallelizable = parallelizable;
        }
        if let Some(retry) = &self.retry_strategy {
            spec.retry_strategy = retry.clone();
        }
        if let Some(providers) = &self.fallback_providers {
            spec.fallback_providers = providers.clone();
        }
        if let Some(field) = &self.headline_cost {
            spec.headline_cost = Some(field.clone());
        }
    }
}

/// 节点名 -> 能力声明（BTreeMap 保证序列化进提示词时顺序稳定）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityManifest {
    entries: BTreeMap<String, CapabilitySpec>,
}

impl CapabilityManifest {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, node: impl Into<String>, spec: CapabilitySpec) {
        self.entries.insert(node.into(), spec);
    }

    pub fn with(mut self, node: impl Into<String>, spec: CapabilitySpec) -> Self {
        self.insert(node, spec);
        self
    }

    /// 逐字段合并配置中的覆盖项；节点名统一为大写，未知节点从空声明开始
    pub fn apply_overrides(&mut self, overrides: &BTreeMap<String, CapabilityOverride>) {
        for (node, patch) in overrides {
            let spec = self.entries.entry(node.to_uppercase()).or_default();
            patch.apply_to(spec);
        }
    }

    pub fn get(&self, node: &str) -> Option<&CapabilitySpec> {
        self.entries.get(node)
    }

    pub fn max_retries(&self, node: &str) -> u32 {
        self.get(node)
            .map(|s| s.retry_strategy.max_retries)
            .unwrap_or(0)
    }

    pub fn fallback_providers(&self, node: &str) -> &[String] {
        self.get(node)
            .map(|s| s.fallback_providers.as_slice())
            .unwrap_or(&[])
    }

    pub fn headline_cost(&self, node: &str) -> Option<&str> {
        self.get(node).and_then(|s| s.headline_cost.as_deref())
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl Default for CapabilityManifest {
    /// 内置节点的参考清单：四个费用估算节点各允许一次放宽重试
    fn default() -> Self {
        Self::empty()
            .with(
                nodes::FLIGHT,
                CapabilitySpec::new(
                    &["city_iata", "start_date", "end_date", "budget"],
                    &["flight_cost", "flight_details"],
                    false,
                )
                .cost_estimator("flight_cost", 1),
            )
            .with(
                nodes::ACCOMMODATION,
                CapabilitySpec::new(
                    &["city_iata", "start_date", "end_date", "duration_days", "budget"],
                    &["accommodation_cost", "accommodation_details"],
                    true,
                )
                .cost_estimator("accommodation_cost", 1),
            )
            .with(
                nodes::FOOD,
                CapabilitySpec::new(
                    &["city", "duration_days", "budget"],
                    &["food_cost", "food_itinerary"],
                    true,
                )
                .cost_estimator("food_cost", 1),
            )
            .with(
                nodes::ACTIVITIES,
                CapabilitySpec::new(
                    &["city", "duration_days", "remaining_budget"],
                    &["activities_cost", "activities_plan"],
                    true,
                )
                .cost_estimator("activities_cost", 1),
            )
            .with(nodes::TOTAL_COST_CHECK, CapabilitySpec::new(&[], &[], false))
            .with(nodes::BUDGET_REVIEW, CapabilitySpec::new(&[], &[], false))
            .with(
                nodes::ITINERARY_PLANNER,
                CapabilitySpec::new(&[], &["itinerary_draft"], false),
            )
    }
}
