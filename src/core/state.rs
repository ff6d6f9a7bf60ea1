//! 运行状态：RunState 与合并协议
//!
//! RunState 由 Orchestrator 独占持有；Agent 只拿到只读快照，返回 Partial，
//! 在汇合点由 merge 合并：messages / trace 只追加，其余键后写覆盖。
//! remaining_budget 每次汇合后重新计算（budget − 四项费用之和），不做增量累加。

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 日期解析失败时的默认行程天数
pub const DEFAULT_DURATION_DAYS: u32 = 3;

/// 用户提交的行程参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRequest {
    pub city: String,
    pub city_iata: String,
    /// YYYY-MM-DD
    pub start_date: String,
    /// YYYY-MM-DD
    pub end_date: String,
    pub budget: f64,
}

impl TripRequest {
    pub fn new(
        city: impl Into<String>,
        city_iata: impl Into<String>,
        start_date: impl Into<String>,
        end_date: impl Into<String>,
        budget: f64,
    ) -> Self {
        Self {
            city: city.into(),
            city_iata: city_iata.into(),
            start_date: start_date.into(),
            end_date: end_date.into(),
            budget,
        }
    }

    /// 行程天数（含首尾两天）
    pub fn duration_days(&self) -> u32 {
        calculate_duration(&self.start_date, &self.end_date)
    }

    /// 交给计划生成器的用户目标
    pub fn goal(&self) -> Value {
        serde_json::json!({
            "city": self.city,
            "city_iata": self.city_iata,
            "start_date": self.start_date,
            "end_date": self.end_date,
            "duration_days": self.duration_days(),
            "budget": self.budget,
        })
    }
}

/// 按 YYYY-MM-DD 计算包含首尾的天数；任一日期无法解析时返回 DEFAULT_DURATION_DAYS
pub fn calculate_duration(start: &str, end: &str) -> u32 {
    let parse = |s: &str| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d");
    match (parse(start), parse(end)) {
        (Ok(s), Ok(e)) => {
            let days = (e - s).num_days() + 1;
            days.max(1) as u32
        }
        _ => DEFAULT_DURATION_DAYS,
    }
}

/// 费用类别：remaining_budget 只由这四项决定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CostCategory {
    Flight,
    Accommodation,
    Food,
    Activities,
}

impl CostCategory {
    pub const ALL: [CostCategory; 4] = [
        CostCategory::Flight,
        CostCategory::Accommodation,
        CostCategory::Food,
        CostCategory::Activities,
    ];

    /// 预算复核时允许削减的类别（餐饮不削减）
    pub const REDUCIBLE: [CostCategory; 3] = [
        CostCategory::Flight,
        CostCategory::Accommodation,
        CostCategory::Activities,
    ];

    /// RunState 中对应的字段名
    pub fn field(&self) -> &'static str {
        match self {
            CostCategory::Flight => "flight_cost",
            CostCategory::Accommodation => "accommodation_cost",
            CostCategory::Food => "food_cost",
            CostCategory::Activities => "activities_cost",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CostCategory::Flight => "flight cost",
            CostCategory::Accommodation => "accommodation cost",
            CostCategory::Food => "food cost",
            CostCategory::Activities => "activities cost",
        }
    }
}

/// 结构化追踪记录：序列化为扁平对象 {"node": ..., "event": ..., ...fields}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub node: String,
    pub event: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl TraceRecord {
    pub fn new(node: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            event: event.into(),
            fields: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Agent 返回的部分结果：要合并进 RunState 的字段 + 追加的日志
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Partial {
    /// 覆盖写入的字段（费用、详情、控制信号等）
    pub fields: Map<String, Value>,
    pub messages: Vec<String>,
    pub trace: Vec<TraceRecord>,
}

impl Partial {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn message(mut self, text: impl Into<String>) -> Self {
        self.messages.push(text.into());
        self
    }

    pub fn trace(mut self, record: TraceRecord) -> Self {
        self.trace.push(record);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// 数值字段；缺失或非数值返回 None
    pub fn number(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(as_number)
    }
}

/// 宽松的数值解析：数字或可解析的字符串
pub(crate) fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// 单次编排运行的唯一可变聚合
#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    trip: TripRequest,
    duration_days: u32,
    fields: Map<String, Value>,
    messages: Vec<String>,
    trace: Vec<TraceRecord>,
}

impl RunState {
    /// 以用户参数初始化：四项费用为 0，remaining_budget = budget
    pub fn new(trip: TripRequest) -> Self {
        let duration_days = trip.duration_days();
        let mut state = Self {
            trip,
            duration_days,
            fields: Map::new(),
            messages: Vec::new(),
            trace: Vec::new(),
        };
        for category in CostCategory::ALL {
            state.fields.insert(category.field().to_string(), Value::from(0.0));
        }
        state.recompute_remaining_budget();
        state
    }

    pub fn trip(&self) -> &TripRequest {
        &self.trip
    }

    pub fn budget(&self) -> f64 {
        self.trip.budget
    }

    pub fn duration_days(&self) -> u32 {
        self.duration_days
    }

    /// Agent 贡献的字段
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// 先查字段，再查行程参数（city / city_iata / start_date / end_date / budget / duration_days）
    pub fn lookup(&self, key: &str) -> Option<Value> {
        if let Some(v) = self.fields.get(key) {
            return Some(v.clone());
        }
        match key {
            "city" => Some(Value::from(self.trip.city.clone())),
            "city_iata" => Some(Value::from(self.trip.city_iata.clone())),
            "start_date" => Some(Value::from(self.trip.start_date.clone())),
            "end_date" => Some(Value::from(self.trip.end_date.clone())),
            "budget" => Some(Value::from(self.trip.budget)),
            "duration_days" => Some(Value::from(self.duration_days)),
            _ => None,
        }
    }

    /// 数值字段，缺失或非数值视为 0
    pub fn number(&self, key: &str) -> f64 {
        self.fields.get(key).and_then(as_number).unwrap_or(0.0)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn cost(&self, category: CostCategory) -> f64 {
        self.number(category.field())
    }

    pub fn total_cost(&self) -> f64 {
        CostCategory::ALL.iter().map(|c| self.cost(*c)).sum()
    }

    pub fn remaining_budget(&self) -> f64 {
        self.number("remaining_budget")
    }

    pub fn is_budget_met(&self) -> bool {
        self.fields
            .get("is_budget_met")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// 结构化追踪日志（唯一的可观测输出面）
    pub fn trace(&self) -> &[TraceRecord] {
        &self.trace
    }

    /// 合并部分结果：messages / trace 追加，其余键覆盖
    pub fn merge(&mut self, partial: Partial) {
        let Partial {
            fields,
            messages,
            trace,
        } = partial;
        tracing::debug!(
            keys = fields.len(),
            messages = messages.len(),
            trace = trace.len(),
            "merge partial"
        );
        for (key, value) in fields {
            self.fields.insert(key, value);
        }
        self.messages.extend(messages);
        self.trace.extend(trace);
    }

    /// remaining_budget = budget − Σ 四项费用；同时刷新 is_budget_met
    pub fn recompute_remaining_budget(&mut self) -> f64 {
        let remaining = self.trip.budget - self.total_cost();
        self.fields
            .insert("remaining_budget".to_string(), Value::from(remaining));
        self.fields
            .insert("is_budget_met".to_string(), Value::from(remaining >= 0.0));
        remaining
    }

    /// 编排器自身写入的追踪记录
    pub fn record(&mut self, record: TraceRecord) {
        self.trace.push(record);
    }

    pub fn note(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        out.insert("city".into(), Value::from(self.trip.city.clone()));
        out.insert("city_iata".into(), Value::from(self.trip.city_iata.clone()));
        out.insert("start_date".into(), Value::from(self.trip.start_date.clone()));
        out.insert("end_date".into(), Value::from(self.trip.end_date.clone()));
        out.insert("budget".into(), Value::from(self.trip.budget));
        out.insert("duration_days".into(), Value::from(self.duration_days));
        for (k, v) in &self.fields {
            out.insert(k.clone(), v.clone());
        }
        out.insert("messages".into(), Value::from(self.messages.clone()));
        out.insert(
            "trace".into(),
            serde_json::to_value(&self.trace).unwrap_or(Value::Array(Vec::new())),
        );
        Value::Object(out)
    }
}
