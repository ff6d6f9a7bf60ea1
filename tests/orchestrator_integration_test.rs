//! 编排器集成测试：完整运行（规划 → 分批执行 → 重规划 → 终止步骤）

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tripbee::agents::{default_registry, Agent, AgentRegistry, EstimatorRates};
    use tripbee::config::AppConfig;
    use tripbee::llm::{LlmClient, MockLlmClient};
    use tripbee::core::{
        AgentError, CostCategory, OrchestratorBuilder, OrchestratorConfig, Partial, RunState,
        TripRequest, ORCHESTRATOR,
    };
    use tripbee::plan::{nodes, CapabilityManifest, CapabilitySpec, Plan, Task, TaskInputs};
    use tripbee::planning::{Generation, PlanCache, PlanGenerator, PlanRequest};

    const ACTIVITIES_FALLBACK: &str = "ACTIVITIES_FALLBACK";

    /// 固定报价
    struct FixedCost {
        node: &'static str,
        field: &'static str,
        cost: f64,
    }

    #[async_trait]
    impl Agent for FixedCost {
        fn name(&self) -> &str {
            self.node
        }

        fn description(&self) -> &str {
            "fixed quote"
        }

        async fn invoke(&self, _state: &RunState, _inputs: &TaskInputs) -> Result<Partial, AgentError> {
            Ok(Partial::new().set(self.field, self.cost))
        }
    }

    /// 前 failures 次调用失败，之后报价成功；计数在同名 / 备用节点间共享
    struct FlakyActivities {
        node: &'static str,
        calls: Arc<AtomicUsize>,
        failures: usize,
        cost: f64,
    }

    #[async_trait]
    impl Agent for FlakyActivities {
        fn name(&self) -> &str {
            self.node
        }

        fn description(&self) -> &str {
            "activities quote that fails at first"
        }

        async fn invoke(&self, _state: &RunState, _inputs: &TaskInputs) -> Result<Partial, AgentError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(AgentError::Failed(format!("activities provider down (call {})", call + 1)));
            }
            Ok(Partial::new().set("activities_cost", self.cost))
        }
    }

    fn trip() -> TripRequest {
        TripRequest::new("Goa", "GOI", "2025-12-01", "2025-12-04", 200_000.0)
    }

    fn fixed_registry(activities_cost: f64, failures: usize) -> (AgentRegistry, Arc<AtomicUsize>) {
        let mut registry = default_registry(&EstimatorRates::default(), None, Duration::from_secs(1), 1);
        registry.register(FixedCost {
            node: nodes::FLIGHT,
            field: "flight_cost",
            cost: 90_000.0,
        });
        registry.register(FixedCost {
            node: nodes::ACCOMMODATION,
            field: "accommodation_cost",
            cost: 70_000.0,
        });
        registry.register(FixedCost {
            node: nodes::FOOD,
            field: "food_cost",
            cost: 20_000.0,
        });
        let calls = Arc::new(AtomicUsize::new(0));
        for node in [nodes::ACTIVITIES, ACTIVITIES_FALLBACK] {
            registry.register(FlakyActivities {
                node,
                calls: Arc::clone(&calls),
                failures,
                cost: activities_cost,
            });
        }
        (registry, calls)
    }

    fn manifest_with_activities_fallback() -> CapabilityManifest {
        let mut manifest = CapabilityManifest::default();
        let mut spec = manifest.get(nodes::ACTIVITIES).cloned().unwrap_or_default();
        spec.retry_strategy.max_retries = 1;
        spec.fallback_providers = vec![ACTIVITIES_FALLBACK.to_string()];
        manifest.insert(nodes::ACTIVITIES, spec);
        manifest
    }

    fn events<'a>(state: &'a RunState, node: &str, event: &str) -> Vec<&'a tripbee::core::TraceRecord> {
        state
            .trace()
            .iter()
            .filter(|r| r.node == node && r.event == event)
            .collect()
    }

    #[tokio::test]
    async fn test_recovers_after_two_activity_failures() {
        let (registry, calls) = fixed_registry(15_000.0, 2);
        let orchestrator = OrchestratorBuilder::new()
            .with_registry(registry)
            .with_manifest(manifest_with_activities_fallback())
            .build();

        let state = orchestrator.run(trip()).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(state.cost(CostCategory::Activities), 15_000.0);
        assert_eq!(state.remaining_budget(), 5_000.0);
        assert!(state.is_budget_met());
        assert!(events(&state, nodes::BUDGET_REVIEW, "reduce").is_empty());
        assert!(state.text("itinerary_draft").is_some());

        let adopted = events(&state, ORCHESTRATOR, "plan_adopted");
        let sources: Vec<&str> = adopted
            .iter()
            .filter_map(|r| r.get("source").and_then(|v| v.as_str()))
            .collect();
        assert_eq!(sources, vec!["fallback", "retry", "fallback_provider"]);
    }

    #[tokio::test]
    async fn test_overspend_triggers_budget_review() {
        let (registry, _) = fixed_registry(30_000.0, 0);
        let orchestrator = OrchestratorBuilder::new().with_registry(registry).build();

        let state = orchestrator.run(trip()).await;

        let before = 200_000.0 - 210_000.0;
        assert_eq!(events(&state, nodes::BUDGET_REVIEW, "reduce").len(), 1);
        assert_eq!(state.cost(CostCategory::Flight), 72_000.0);
        assert_eq!(state.remaining_budget(), 8_000.0);
        assert!(state.remaining_budget() >= before);
        assert!(state.is_budget_met());
        assert!(state.text("suggestion").is_some());
        assert!(state.text("itinerary_draft").is_some());
    }

    #[tokio::test]
    async fn test_persistent_failure_exhausts_replans() {
        let (registry, _) = fixed_registry(15_000.0, usize::MAX);
        let config = OrchestratorConfig {
            max_replans: 1,
            ..OrchestratorConfig::default()
        };
        let orchestrator = OrchestratorBuilder::new()
            .with_config(config.clone())
            .with_registry(registry)
            .with_manifest(manifest_with_activities_fallback())
            .build();

        let state = orchestrator.run(trip()).await;

        let adopted = events(&state, ORCHESTRATOR, "plan_adopted");
        assert!(adopted.len() <= config.max_replans as usize + 1);
        assert_eq!(events(&state, ORCHESTRATOR, "replan_exhausted").len(), 1);
        assert!(state.text("itinerary_draft").is_some());
        assert!(state
            .messages()
            .iter()
            .any(|m| m.contains("activities provider down")));
    }

    #[tokio::test]
    async fn test_dropped_task_still_finishes() {
        let (registry, calls) = fixed_registry(15_000.0, usize::MAX);
        let manifest = CapabilityManifest::default().with(
            nodes::ACTIVITIES,
            CapabilitySpec::default(),
        );
        let orchestrator = OrchestratorBuilder::new()
            .with_registry(registry)
            .with_manifest(manifest)
            .build();

        let state = orchestrator.run(trip()).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.cost(CostCategory::Activities), 0.0);
        assert_eq!(state.remaining_budget(), 20_000.0);
        let adopted = events(&state, ORCHESTRATOR, "plan_adopted");
        assert_eq!(adopted.last().and_then(|r| r.get("source")).and_then(|v| v.as_str()), Some("dropped"));
        assert!(state.text("itinerary_draft").is_some());
    }

    #[tokio::test]
    async fn test_default_replan_limit_terminates() {
        let (registry, calls) = fixed_registry(15_000.0, usize::MAX);
        let mut manifest = CapabilityManifest::default();
        let mut spec = manifest.get(nodes::ACTIVITIES).cloned().unwrap_or_default();
        spec.retry_strategy.max_retries = 3;
        manifest.insert(nodes::ACTIVITIES, spec);
        let config = OrchestratorConfig::default();
        let orchestrator = OrchestratorBuilder::new()
            .with_registry(registry)
            .with_manifest(manifest)
            .build();

        let state = orchestrator.run(trip()).await;

        assert_eq!(config.max_replans, 3);
        let adopted = events(&state, ORCHESTRATOR, "plan_adopted");
        assert!(adopted.len() <= config.max_replans as usize + 1);
        assert_eq!(adopted.len(), 4);
        assert_eq!(events(&state, ORCHESTRATOR, "replan_exhausted").len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(state.text("itinerary_draft").is_some());
    }

    #[tokio::test]
    async fn test_slow_llm_still_yields_itinerary_and_budget_cut() {
        let mut cfg = AppConfig::default();
        cfg.llm.timeout_secs = 0.1;
        cfg.orchestrator.agent_timeout_secs = 0.25;
        cfg.orchestrator.generation_timeout_secs = 0.2;
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::new().with_delay(Duration::from_secs(5)));
        let orchestrator = OrchestratorBuilder::from_app_config(&cfg, Some(llm)).build();

        let trip = TripRequest::new("Goa", "GOI", "2025-12-01", "2025-12-04", 20_000.0);
        let state = orchestrator.run(trip).await;

        assert!(state.text("itinerary_draft").is_some());
        assert!(events(&state, nodes::ITINERARY_PLANNER, "error").is_empty());
        let drafts = events(&state, nodes::ITINERARY_PLANNER, "draft");
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].get("fallback_days"), Some(&serde_json::json!([1, 2, 3, 4])));
        assert_eq!(events(&state, nodes::BUDGET_REVIEW, "reduce").len(), 1);
        assert!(events(&state, nodes::BUDGET_REVIEW, "error").is_empty());
    }

    struct BrokenItinerary;

    #[async_trait]
    impl Agent for BrokenItinerary {
        fn name(&self) -> &str {
            nodes::ITINERARY_PLANNER
        }

        fn description(&self) -> &str {
            "always crashes"
        }

        async fn invoke(&self, _state: &RunState, _inputs: &TaskInputs) -> Result<Partial, AgentError> {
            panic!("itinerary writer crashed")
        }
    }

    #[tokio::test]
    async fn test_crashed_itinerary_step_falls_back_to_template() {
        let (mut registry, _) = fixed_registry(15_000.0, 0);
        registry.register(BrokenItinerary);
        let orchestrator = OrchestratorBuilder::new().with_registry(registry).build();

        let state = orchestrator.run(trip()).await;

        let draft = state.text("itinerary_draft").unwrap_or_default();
        assert!(draft.starts_with("## Day 1: Goa"));
        assert_eq!(events(&state, nodes::ITINERARY_PLANNER, "error").len(), 1);
        assert_eq!(events(&state, ORCHESTRATOR, "itinerary_template").len(), 1);
    }

    struct SlowGenerator;

    #[async_trait]
    impl PlanGenerator for SlowGenerator {
        async fn generate(&self, _request: PlanRequest) -> Generation<Plan> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Generation::Failed("too late".to_string())
        }
    }

    /// 返回固定计划（可选地制造重复 task_id）
    struct StaticGenerator {
        calls: AtomicUsize,
        duplicate_ids: bool,
    }

    #[async_trait]
    impl PlanGenerator for StaticGenerator {
        async fn generate(&self, _request: PlanRequest) -> Generation<Plan> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let second = if self.duplicate_ids { "g1" } else { "g2" };
            Generation::Success(Plan::new(
                "plan",
                vec![
                    Task::new("g1", nodes::FLIGHT),
                    Task::new(second, nodes::TOTAL_COST_CHECK),
                ],
            ))
        }
    }

    fn first_source(state: &RunState) -> Option<String> {
        events(state, ORCHESTRATOR, "plan_adopted")
            .first()
            .and_then(|r| r.get("source"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    #[tokio::test]
    async fn test_generator_timeout_uses_fallback_plan() {
        let config = OrchestratorConfig {
            generation_timeout_secs: 0.05,
            ..OrchestratorConfig::default()
        };
        let orchestrator = OrchestratorBuilder::new()
            .with_config(config)
            .with_plan_generator(Arc::new(SlowGenerator))
            .build();

        let started = std::time::Instant::now();
        let state = orchestrator.run(trip()).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(first_source(&state).as_deref(), Some("fallback"));
        assert!(state.cost(CostCategory::Flight) > 0.0);
        assert!(state.text("itinerary_draft").is_some());
    }

    #[tokio::test]
    async fn test_invalid_generated_plan_uses_fallback() {
        let generator = Arc::new(StaticGenerator {
            calls: AtomicUsize::new(0),
            duplicate_ids: true,
        });
        let orchestrator = OrchestratorBuilder::new()
            .with_plan_generator(generator.clone())
            .build();

        let state = orchestrator.run(trip()).await;

        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first_source(&state).as_deref(), Some("fallback"));
        assert!(state.cost(CostCategory::Activities) > 0.0);
    }

    #[tokio::test]
    async fn test_generated_plan_is_cached_across_runs() {
        let generator = Arc::new(StaticGenerator {
            calls: AtomicUsize::new(0),
            duplicate_ids: false,
        });
        let cache = Arc::new(PlanCache::new());

        let mut sources = Vec::new();
        for _ in 0..2 {
            let orchestrator = OrchestratorBuilder::new()
                .with_plan_generator(generator.clone())
                .with_cache(Arc::clone(&cache))
                .build();
            let state = orchestrator.run(trip()).await;
            assert!(state.cost(CostCategory::Flight) > 0.0);
            assert_eq!(state.cost(CostCategory::Food), 0.0);
            sources.push(first_source(&state));
        }

        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            sources,
            vec![Some("generated".to_string()), Some("cached".to_string())]
        );
    }
}
