//! 逐日行程生成
//!
//! 每天独立调用 LLM（限时、有限次数），输出在 `---END_OF_ITINERARY---` 处截断并补齐
//! `## Day N` 标题；某天失败时用 DayBlocks 给出的确定性模板替代，其余天不受影响。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::agents::registry::Agent;
use crate::core::{AgentError, Partial, RunState, TraceRecord};
use crate::llm::{LlmClient, Message};
use crate::plan::{nodes, TaskInputs};

pub const STOP_PHRASE: &str = "---END_OF_ITINERARY---";

/// 把 activities_plan 中 "Day N ..." 行按天分组；无法解析的行忽略
pub fn activities_by_day(state: &RunState, days: u32) -> BTreeMap<u32, Vec<String>> {
    let mut by_day: BTreeMap<u32, Vec<String>> = (1..=days).map(|d| (d, Vec::new())).collect();
    let lines = state
        .get("activities_plan")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).collect::<Vec<_>>())
        .unwrap_or_default();

    for line in lines {
        let head = line.split(':').next().unwrap_or_default();
        let mut words = head.split_whitespace();
        let is_day = words
            .next()
            .map(|w| w.eq_ignore_ascii_case("day"))
            .unwrap_or(false);
        if !is_day {
            continue;
        }
        if let Some(day) = words.next().and_then(|w| w.parse::<u32>().ok()) {
            by_day.entry(day).or_default().push(line.to_string());
        }
    }
    by_day
}

/// 确定性逐日模板：有限（days 个）、惰性生成、Clone 即可重新开始
#[derive(Debug, Clone)]
pub struct DayBlocks {
    city: String,
    accommodation: String,
    activities: BTreeMap<u32, Vec<String>>,
    next_day: u32,
    days: u32,
}

impl DayBlocks {
    pub fn new(
        city: impl Into<String>,
        accommodation: impl Into<String>,
        activities: BTreeMap<u32, Vec<String>>,
        days: u32,
    ) -> Self {
        Self {
            city: city.into(),
            accommodation: accommodation.into(),
            activities,
            next_day: 1,
            days,
        }
    }

    /// 按当前状态（城市、住宿、活动安排、天数）构造
    pub fn for_state(state: &RunState) -> Self {
        let days = state.duration_days().max(1);
        Self::new(
            state.trip().city.clone(),
            state.text("accommodation_details").unwrap_or("N/A"),
            activities_by_day(state, days),
            days,
        )
    }

    fn render(&self, day: u32) -> String {
        let city = &self.city;
        let planned = self
            .activities
            .get(&day)
            .filter(|lines| !lines.is_empty())
            .map(|lines| {
                lines
                    .iter()
                    .map(|l| format!("- {}\n", l))
                    .collect::<String>()
            })
            .unwrap_or_else(|| "- Explore neighbourhood streets and markets.\n".to_string());

        format!(
            "## Day {day}: {city}\n\
             ### 🌅 Morning\n\
             - Have breakfast at **Local Cafe** and then take a ***City Walk (₹0)***.\n\
             - Short break at a viewpoint.\n\n\
             ### 🌤 Afternoon\n\
             - Have lunch at **Central Eatery**.\n\
             {planned}\n\
             ### 🌙 Evening\n\
             - Have dinner at **Harbour Kitchen** and then join the ***Sunset Promenade (₹0)***.\n\
             - Return to the hotel and rest.\n\n\
             ### 🧭 Logistics\n\
             - Accommodation: {accommodation}\n\
             - Transit: local buses and taxis available\n\
             - Meeting point: hotel lobby\n",
            day = day,
            city = city,
            planned = planned,
            accommodation = self.accommodation,
        )
    }
}

impl Iterator for DayBlocks {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.next_day > self.days {
            return None;
        }
        let block = self.render(self.next_day);
        self.next_day += 1;
        Some(block)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.days + 1).saturating_sub(self.next_day) as usize;
        (left, Some(left))
    }
}

impl ExactSizeIterator for DayBlocks {}

/// 全部天数都用模板生成的行程
pub fn template_itinerary(state: &RunState) -> String {
    DayBlocks::for_state(state)
        .map(|block| block.trim_end().to_string())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// 截断停止短语并保证以 `## Day N` 开头
pub fn normalize_day_block(raw: &str, day: u32) -> Option<String> {
    let text = raw.split(STOP_PHRASE).next().unwrap_or_default().trim();
    if text.is_empty() {
        return None;
    }
    let heading = format!("## Day {}", day);
    if text.starts_with(&heading) {
        Some(text.to_string())
    } else {
        Some(format!("{}\n{}", heading, text))
    }
}

pub struct ItineraryPlanner {
    llm: Option<Arc<dyn LlmClient>>,
    timeout: Duration,
    attempts: u32,
}

impl ItineraryPlanner {
    pub fn new(llm: Option<Arc<dyn LlmClient>>, timeout: Duration, attempts: u32) -> Self {
        Self {
            llm,
            timeout,
            attempts: attempts.max(1),
        }
    }

    async fn generate_day(&self, city: &str, day: u32, activities: &[String]) -> Option<String> {
        let llm = self.llm.as_ref()?;
        let listed = if activities.is_empty() {
            "(no specific activities provided)".to_string()
        } else {
            activities.join("\n")
        };
        let messages = [
            Message::system(format!(
                "You are a professional travel writer. Produce only the **Day {day}** block for {city} in markdown.\n\
                 Headings must be:\n## Day {day}\n### 🌅 Morning\n### 🌤 Afternoon\n### 🌙 Evening\n\
                 Restaurants in **bold**, activities in ***bold italics*** with price.\n\
                 Activities you may use:\n{listed}\n\
                 Output ONLY the markdown for Day {day}. End the output with {stop}.",
                day = day,
                city = city,
                listed = listed,
                stop = STOP_PHRASE,
            )),
            Message::user(format!("Generate Day {} block now.", day)),
        ];

        for attempt in 1..=self.attempts {
            match tokio::time::timeout(self.timeout, llm.complete(&messages)).await {
                Ok(Ok(raw)) => {
                    if let Some(block) = normalize_day_block(&raw, day) {
                        return Some(block);
                    }
                    tracing::debug!(day, attempt, "empty itinerary block");
                }
                Ok(Err(e)) => tracing::warn!(day, attempt, error = %e, "itinerary generation failed"),
                Err(_) => tracing::warn!(day, attempt, "itinerary generation timed out"),
            }
        }
        None
    }
}

#[async_trait]
impl Agent for ItineraryPlanner {
    fn name(&self) -> &str {
        nodes::ITINERARY_PLANNER
    }

    fn description(&self) -> &str {
        "Write the day-by-day itinerary draft from the planned activities. Outputs: itinerary_draft."
    }

    async fn invoke(&self, state: &RunState, _inputs: &TaskInputs) -> Result<Partial, AgentError> {
        let city = state.trip().city.clone();
        let days = state.duration_days().max(1);
        let activities = activities_by_day(state, days);
        let fallbacks = DayBlocks::for_state(state);

        let mut blocks = Vec::with_capacity(days as usize);
        let mut fallback_days = Vec::new();
        for (day, fallback) in (1..=days).zip(fallbacks) {
            let planned = activities.get(&day).map(Vec::as_slice).unwrap_or(&[]);
            match self.generate_day(&city, day, planned).await {
                Some(block) => blocks.push(block),
                None => {
                    fallback_days.push(day);
                    blocks.push(fallback.trim_end().to_string());
                }
            }
        }

        let message = if fallback_days.is_empty() {
            "Itinerary draft completed (day-by-day).".to_string()
        } else {
            format!(
                "Itinerary draft completed (day-by-day, {} of {} days from template).",
                fallback_days.len(),
                days
            )
        };

        Ok(Partial::new()
            .set("itinerary_draft", blocks.join("\n\n"))
            .set("next_action", "FINISH")
            .message(message)
            .trace(
                TraceRecord::new(nodes::ITINERARY_PLANNER, "draft")
                    .with("days", days)
                    .with("fallback_days", fallback_days),
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TripRequest;
    use crate::llm::MockLlmClient;

    fn state() -> RunState {
        let mut state = RunState::new(TripRequest::new("Lisbon", "LIS", "2025-06-01", "2025-06-03", 1e5));
        state.merge(Partial::new().set(
            "activities_plan",
            serde_json::json!([
                "Day 1 Morning: Tram 28 ride",
                "Day 3 Evening: Fado show",
                "day 2 Afternoon: Belem tower",
                "Bonus: ignored"
            ]),
        ));
        state
    }

    #[test]
    fn test_activities_routed_by_day() {
        let by_day = activities_by_day(&state(), 3);
        assert_eq!(by_day[&1], vec!["Day 1 Morning: Tram 28 ride".to_string()]);
        assert_eq!(by_day[&2].len(), 1);
        assert_eq!(by_day[&3], vec!["Day 3 Evening: Fado show".to_string()]);
    }

    #[test]
    fn test_template_itinerary_covers_every_day() {
        let draft = template_itinerary(&state());
        assert!(draft.starts_with("## Day 1: Lisbon"));
        assert!(draft.contains("## Day 3: Lisbon"));
        assert!(draft.contains("Fado show"));
    }

    #[test]
    fn test_day_blocks_finite_and_restartable() {
        let blocks = DayBlocks::new("Lisbon", "Hotel", BTreeMap::new(), 3);
        assert_eq!(blocks.len(), 3);
        let first: Vec<String> = blocks.clone().collect();
        let second: Vec<String> = blocks.collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        assert!(first[2].starts_with("## Day 3: Lisbon"));
    }

    #[test]
    fn test_normalize_block() {
        assert_eq!(
            normalize_day_block("Walk around\n---END_OF_ITINERARY---junk", 2).unwrap(),
            "## Day 2\nWalk around"
        );
        assert_eq!(normalize_day_block("## Day 1\nok", 1).unwrap(), "## Day 1\nok");
        assert!(normalize_day_block("  ---END_OF_ITINERARY---", 1).is_none());
    }

    #[tokio::test]
    async fn test_offline_uses_templates() {
        let planner = ItineraryPlanner::new(None, Duration::from_secs(1), 2);
        let out = planner.invoke(&state(), &TaskInputs::new()).await.unwrap();
        let draft = out.get("itinerary_draft").unwrap().as_str().unwrap();
        assert!(draft.contains("## Day 1: Lisbon"));
        assert!(draft.contains("Fado show"));
        assert_eq!(out.get("next_action").unwrap(), "FINISH");
        assert_eq!(out.trace[0].get("fallback_days").unwrap(), &serde_json::json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn test_failed_day_falls_back_independently() {
        // 第 1 天成功；第 2 天两次失败；第 3 天成功
        let llm = MockLlmClient::with_replies(["Day one text"])
            .push_error("down")
            .push_error("down")
            .default_reply("## Day 3\nLast day");
        let llm: Arc<dyn LlmClient> = Arc::new(llm);
        let planner = ItineraryPlanner::new(Some(llm), Duration::from_secs(1), 2);
        let out = planner.invoke(&state(), &TaskInputs::new()).await.unwrap();
        let draft = out.get("itinerary_draft").unwrap().as_str().unwrap();
        assert!(draft.starts_with("## Day 1\nDay one text"));
        assert!(draft.contains("## Day 2: Lisbon"));
        assert!(draft.ends_with("## Day 3\nLast day"));
    }
}
