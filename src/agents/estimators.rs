//! 离线费用估算 Agent：航班 / 住宿 / 餐饮 / 活动
//!
//! 不访问外部报价接口，按 [estimators] 配置的费率确定性地估算。输入带 `_retry_relax`
//! 时放宽约束（更低档位），供重规划器的重试变体使用。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agents::registry::{has_marker, resolve_number, resolve_str, Agent};
use crate::core::{AgentError, Partial, RunState, TraceRecord};
use crate::plan::{nodes, TaskInputs, RETRY_MARKER};

/// [estimators] 段：估算费率
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorRates {
    /// 国内往返票价
    pub domestic_fare: f64,
    /// 国际往返票价
    pub international_fare: f64,
    /// 视为国内航线的机场代码
    pub domestic_airports: Vec<String>,
    /// 每晚住宿价
    pub nightly_rate: f64,
    pub meal_low: f64,
    pub meal_medium: f64,
    pub meal_high: f64,
    /// 预算中可用于餐饮的比例，用于选择档位
    pub food_budget_share: f64,
    pub activities_daily_rate: f64,
    /// 每天活动费用下限
    pub activities_daily_floor: f64,
    /// 活动费用不超过剩余预算的比例
    pub activities_budget_share: f64,
    /// 放宽重试时航班与住宿的折扣系数
    pub relax_factor: f64,
}

impl Default for EstimatorRates {
    fn default() -> Self {
        Self {
            domestic_fare: 24_000.0,
            international_fare: 85_000.0,
            domestic_airports: [
                "DEL", "BOM", "BLR", "MAA", "CCU", "HYD", "GOI", "COK", "AMD", "PNQ", "JAI",
                "LKO", "ATQ", "IXC", "SXR", "VNS", "TRV", "IXB", "GAU", "BBI",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            nightly_rate: 17_500.0,
            meal_low: 450.0,
            meal_medium: 900.0,
            meal_high: 1600.0,
            food_budget_share: 0.10,
            activities_daily_rate: 4_250.0,
            activities_daily_floor: 1_500.0,
            activities_budget_share: 0.25,
            relax_factor: 0.85,
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn duration(state: &RunState, inputs: &TaskInputs) -> u32 {
    resolve_number(state, inputs, "duration_days")
        .filter(|d| *d >= 1.0)
        .map(|d| d as u32)
        .unwrap_or_else(|| state.duration_days().max(1))
}

fn required_str(state: &RunState, inputs: &TaskInputs, key: &str) -> Result<String, AgentError> {
    resolve_str(state, inputs, key).ok_or_else(|| AgentError::MissingInput(key.to_string()))
}

/// 航班估算：国内 / 国际往返票价
pub struct FlightAgent {
    rates: EstimatorRates,
}

impl FlightAgent {
    pub fn new(rates: EstimatorRates) -> Self {
        Self { rates }
    }

    fn is_domestic(&self, iata: &str) -> bool {
        self.rates
            .domestic_airports
            .iter()
            .any(|code| code.eq_ignore_ascii_case(iata))
    }
}

#[async_trait]
impl Agent for FlightAgent {
    fn name(&self) -> &str {
        nodes::FLIGHT
    }

    fn description(&self) -> &str {
        "Estimate round-trip flight cost. Inputs: city_iata, start_date, end_date, budget. Outputs: flight_cost, flight_details."
    }

    async fn invoke(&self, state: &RunState, inputs: &TaskInputs) -> Result<Partial, AgentError> {
        let city_iata = required_str(state, inputs, "city_iata")?.to_uppercase();
        let start_date = required_str(state, inputs, "start_date")?;
        let end_date = required_str(state, inputs, "end_date")?;
        let relaxed = has_marker(inputs, RETRY_MARKER);

        let (mut fare, class) = if self.is_domestic(&city_iata) {
            (self.rates.domestic_fare, "Domestic economy")
        } else {
            (self.rates.international_fare, "International economy")
        };
        if relaxed {
            fare *= self.rates.relax_factor;
        }
        let cost = round2(fare);
        let flex = if relaxed { ", flexible dates" } else { "" };

        let details = format!(
            "Outbound ({}): {} to {}{} | Return ({}): {} from {}{}",
            start_date, class, city_iata, flex, end_date, class, city_iata, flex
        );

        Ok(Partial::new()
            .set("flight_cost", cost)
            .set("flight_details", details)
            .message(format!("Flight cost added: ₹{:.2}", cost))
            .trace(
                TraceRecord::new(nodes::FLIGHT, "estimate")
                    .with("city_iata", city_iata)
                    .with("start_date", start_date)
                    .with("end_date", end_date)
                    .with("relaxed", relaxed)
                    .with("flight_cost", cost),
            ))
    }
}

/// 住宿估算：nights = max(1, days − 1)
pub struct AccommodationAgent {
    rates: EstimatorRates,
}

impl AccommodationAgent {
    pub fn new(rates: EstimatorRates) -> Self {
        Self { rates }
    }
}

#[async_trait]
impl Agent for AccommodationAgent {
    fn name(&self) -> &str {
        nodes::ACCOMMODATION
    }

    fn description(&self) -> &str {
        "Estimate hotel cost for the stay. Inputs: city_iata, start_date, end_date, duration_days, budget. Outputs: accommodation_cost, accommodation_details."
    }

    async fn invoke(&self, state: &RunState, inputs: &TaskInputs) -> Result<Partial, AgentError> {
        let city_iata = required_str(state, inputs, "city_iata")?.to_uppercase();
        let days = duration(state, inputs);
        let nights = days.saturating_sub(1).max(1);
        let relaxed = has_marker(inputs, RETRY_MARKER);

        let mut rate = self.rates.nightly_rate;
        let kind = if relaxed {
            rate *= self.rates.relax_factor;
            "Budget hotel"
        } else {
            "Standard hotel"
        };
        let cost = round2(rate * nights as f64);

        Ok(Partial::new()
            .set("accommodation_cost", cost)
            .set(
                "accommodation_details",
                format!("{} in {} for {} nights.", kind, city_iata, nights),
            )
            .message(format!("Accommodation cost added: ₹{:.2}", cost))
            .trace(
                TraceRecord::new(nodes::ACCOMMODATION, "estimate")
                    .with("city_iata", city_iata)
                    .with("nights", nights)
                    .with("relaxed", relaxed)
                    .with("accommodation_cost", cost),
            ))
    }
}

const RESTAURANTS: [&str; 5] = [
    "Local Cafe",
    "Street Food Stall",
    "Casual Dining",
    "Regional Specialty",
    "Fine Food Spot",
];

/// 餐饮估算：每天三餐，档位按人均每日餐饮预算选择
pub struct FoodAgent {
    rates: EstimatorRates,
}

impl FoodAgent {
    pub fn new(rates: EstimatorRates) -> Self {
        Self { rates }
    }

    /// (早餐, 午餐, 晚餐) 的 (档位名, 单价)
    fn tiers(&self, daily_allowance: f64, relaxed: bool) -> [(&'static str, f64); 3] {
        let low = ("Low", self.rates.meal_low);
        let medium = ("Medium", self.rates.meal_medium);
        let high = ("High", self.rates.meal_high);
        if relaxed {
            return [low, low, low];
        }
        let generous = self.rates.meal_low + self.rates.meal_medium + self.rates.meal_high;
        if daily_allowance >= generous {
            [low, medium, high]
        } else {
            [low, medium, medium]
        }
    }
}

#[async_trait]
impl Agent for FoodAgent {
    fn name(&self) -> &str {
        nodes::FOOD
    }

    fn description(&self) -> &str {
        "Estimate meal costs (3 meals per day). Inputs: city, duration_days, budget. Outputs: food_cost, food_itinerary."
    }

    async fn invoke(&self, state: &RunState, inputs: &TaskInputs) -> Result<Partial, AgentError> {
        let city = required_str(state, inputs, "city")?;
        let days = duration(state, inputs);
        let budget = resolve_number(state, inputs, "budget").unwrap_or_else(|| state.budget());
        let relaxed = has_marker(inputs, RETRY_MARKER);

        let allowance = budget * self.rates.food_budget_share / days as f64;
        let tiers = self.tiers(allowance, relaxed);

        let mut total = 0.0;
        let mut itinerary = Vec::with_capacity(days as usize * 3);
        let mut restaurants = RESTAURANTS.iter().cycle();
        for day in 1..=days {
            for (meal, (tier, price)) in ["Breakfast", "Lunch", "Dinner"].iter().zip(tiers) {
                total += price;
                let name = restaurants.next().copied().unwrap_or("Local Cafe");
                itinerary.push(Value::from(format!(
                    "Day {} {} ({} - ₹{:.0}): {}",
                    day, meal, tier, price, name
                )));
            }
        }
        let cost = round2(total);

        Ok(Partial::new()
            .set("food_cost", cost)
            .set("food_itinerary", Value::Array(itinerary))
            .message(format!("Food cost added: ₹{:.2}", cost))
            .trace(
                TraceRecord::new(nodes::FOOD, "estimate")
                    .with("city", city)
                    .with("duration_days", days)
                    .with("relaxed", relaxed)
                    .with("food_cost", cost),
            ))
    }
}

const ACTIVITY_SLOTS: [(&str, [&str; 3]); 3] = [
    ("Morning", ["Old town walking tour", "Heritage site visit", "Botanical garden"]),
    ("Afternoon", ["City museum", "Local market trail", "Art gallery"]),
    ("Evening", ["Sunset viewpoint", "Cultural show", "Riverside promenade"]),
];

/// 活动估算：clamp(每日费率 × 天数, 下限 × 天数, 剩余预算 × 比例)
pub struct ActivitiesAgent {
    rates: EstimatorRates,
}

impl ActivitiesAgent {
    pub fn new(rates: EstimatorRates) -> Self {
        Self { rates }
    }

    fn estimate(&self, days: u32, remaining: f64, relaxed: bool) -> f64 {
        let days = days as f64;
        let floor = self.rates.activities_daily_floor * days;
        if relaxed {
            return floor;
        }
        let estimate = self.rates.activities_daily_rate * days;
        let cap = remaining * self.rates.activities_budget_share;
        estimate.min(cap).max(floor)
    }
}

/// "Day N <Slot>: <活动>" 形式的逐日安排
fn activities_plan(days: u32) -> Vec<Value> {
    let mut lines = Vec::with_capacity(days as usize * ACTIVITY_SLOTS.len());
    for day in 1..=days {
        for (slot, names) in ACTIVITY_SLOTS.iter() {
            let name = names[(day as usize - 1) % names.len()];
            lines.push(Value::from(format!("Day {} {}: {}", day, slot, name)));
        }
    }
    lines
}

#[async_trait]
impl Agent for ActivitiesAgent {
    fn name(&self) -> &str {
        nodes::ACTIVITIES
    }

    fn description(&self) -> &str {
        "Estimate activity and local travel budget with a day-wise plan. Inputs: city, duration_days, remaining_budget. Outputs: activities_cost, activities_plan."
    }

    async fn invoke(&self, state: &RunState, inputs: &TaskInputs) -> Result<Partial, AgentError> {
        let city = required_str(state, inputs, "city")?;
        let days = duration(state, inputs);
        let remaining = resolve_number(state, inputs, "remaining_budget")
            .unwrap_or_else(|| state.remaining_budget());
        let relaxed = has_marker(inputs, RETRY_MARKER);

        let cost = round2(self.estimate(days, remaining, relaxed));
        let plan = activities_plan(days);

        Ok(Partial::new()
            .set("activities_cost", cost)
            .set("activities_plan", Value::Array(plan))
            .message(format!(
                "Activities cost added: ₹{:.2} (estimated) - entrance fees, local travel and guided tours.",
                cost
            ))
            .trace(
                TraceRecord::new(nodes::ACTIVITIES, "estimate")
                    .with("city", city)
                    .with("duration_days", days)
                    .with("relaxed", relaxed)
                    .with("activities_cost", cost),
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TripRequest;

    fn state(iata: &str, budget: f64) -> RunState {
        // 2025-03-01 .. 2025-03-04 → 4 天
        RunState::new(TripRequest::new("Goa", iata, "2025-03-01", "2025-03-04", budget))
    }

    fn relaxed() -> TaskInputs {
        let mut inputs = TaskInputs::new();
        inputs.insert(RETRY_MARKER.to_string(), Value::Bool(true));
        inputs
    }

    #[tokio::test]
    async fn test_flight_domestic_vs_international() {
        let agent = FlightAgent::new(EstimatorRates::default());
        let domestic = agent.invoke(&state("GOI", 1e6), &TaskInputs::new()).await.unwrap();
        assert_eq!(domestic.number("flight_cost"), Some(24_000.0));

        let intl = agent.invoke(&state("CDG", 1e6), &TaskInputs::new()).await.unwrap();
        assert_eq!(intl.number("flight_cost"), Some(85_000.0));
        assert_eq!(intl.trace[0].node, nodes::FLIGHT);
    }

    #[tokio::test]
    async fn test_flight_relaxed_is_cheaper() {
        let agent = FlightAgent::new(EstimatorRates::default());
        let out = agent.invoke(&state("GOI", 1e6), &relaxed()).await.unwrap();
        assert_eq!(out.number("flight_cost"), Some(20_400.0));
    }

    #[tokio::test]
    async fn test_flight_missing_iata() {
        let agent = FlightAgent::new(EstimatorRates::default());
        let s = state("", 1e6);
        let err = agent.invoke(&s, &TaskInputs::new()).await.unwrap_err();
        assert_eq!(err, AgentError::MissingInput("city_iata".to_string()));
    }

    #[tokio::test]
    async fn test_accommodation_nights() {
        let agent = AccommodationAgent::new(EstimatorRates::default());
        let out = agent.invoke(&state("GOI", 1e6), &TaskInputs::new()).await.unwrap();
        // 4 天 → 3 晚
        assert_eq!(out.number("accommodation_cost"), Some(52_500.0));

        let mut inputs = TaskInputs::new();
        inputs.insert("duration_days".into(), Value::from(1));
        let out = agent.invoke(&state("GOI", 1e6), &inputs).await.unwrap();
        assert_eq!(out.number("accommodation_cost"), Some(17_500.0));
    }

    #[tokio::test]
    async fn test_food_tiers() {
        let agent = FoodAgent::new(EstimatorRates::default());
        // 每日餐饮额度 = 40000 * 0.1 / 4 = 1000 → 低 / 中 / 中
        let out = agent.invoke(&state("GOI", 40_000.0), &TaskInputs::new()).await.unwrap();
        assert_eq!(out.number("food_cost"), Some(4.0 * 2250.0));
        assert_eq!(out.get("food_itinerary").unwrap().as_array().unwrap().len(), 12);

        let out = agent.invoke(&state("GOI", 40_000.0), &relaxed()).await.unwrap();
        assert_eq!(out.number("food_cost"), Some(4.0 * 1350.0));
    }

    #[tokio::test]
    async fn test_activities_clamped() {
        let agent = ActivitiesAgent::new(EstimatorRates::default());
        // 剩余预算充足：4250 * 4
        let out = agent.invoke(&state("GOI", 1e6), &TaskInputs::new()).await.unwrap();
        assert_eq!(out.number("activities_cost"), Some(17_000.0));

        // 剩余预算紧张：不低于 1500 * 4
        let out = agent.invoke(&state("GOI", 10_000.0), &TaskInputs::new()).await.unwrap();
        assert_eq!(out.number("activities_cost"), Some(6_000.0));

        let plan = out.get("activities_plan").unwrap().as_array().unwrap();
        assert_eq!(plan.len(), 12);
        assert!(plan[3].as_str().unwrap().starts_with("Day 2 Morning"));
    }
}
