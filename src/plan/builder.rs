//! 确定性兜底计划
//!
//! 航班 → 住宿 ‖ 餐饮 ‖ 活动 → 总费用检查（行程生成与预算复核作为终止步骤由编排器执行）。

use serde_json::Value;

use crate::core::TripRequest;
use crate::plan::types::{nodes, Plan, Task};

/// 确定性兜底计划
pub fn fallback_plan(trip: &TripRequest) -> Plan {
    let duration = trip.duration_days();
    let budget = Value::from(trip.budget);

    let tasks = vec![
        Task::new("t1", nodes::FLIGHT)
            .input("city_iata", trip.city_iata.clone())
            .input("start_date", trip.start_date.clone())
            .input("end_date", trip.end_date.clone())
            .input("budget", budget.clone())
            .on_success("t2"),
        Task::new("t2", nodes::ACCOMMODATION)
            .input("city_iata", trip.city_iata.clone())
            .input("start_date", trip.start_date.clone())
            .input("end_date", trip.end_date.clone())
            .input("duration_days", duration)
            .input("budget", budget.clone())
            .parallel(true)
            .on_success("t3"),
        Task::new("t3", nodes::FOOD)
            .input("city", trip.city.clone())
            .input("duration_days", duration)
            .input("budget", budget.clone())
            .parallel(true)
            .on_success("t4")
            .on_failure("t4"),
        Task::new("t4", nodes::ACTIVITIES)
            .input("city", trip.city.clone())
            .input("duration_days", duration)
            .input("remaining_budget", budget)
            .parallel(true)
            .on_success("t5"),
        Task::new("t5", nodes::TOTAL_COST_CHECK).on_success(nodes::ITINERARY_PLANNER),
    ];

    Plan::new("fallback", tasks)
}
