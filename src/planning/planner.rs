//! 初始规划：缓存 → 生成（限时）→ 校验 → 确定性兜底

use std::sync::Arc;
use std::time::Duration;

use crate::agents::AgentRegistry;
use crate::core::TripRequest;
use crate::plan::{fallback_plan, validate, CapabilityManifest, Plan};
use crate::planning::generation::{
    generate_with_timeout, CacheKey, Generation, PlanCache, PlanGenerator, PlanRequest,
    PlanSource, ScenarioFingerprint,
};

pub struct InitialPlanner {
    generator: Option<Arc<dyn PlanGenerator>>,
    cache: Arc<PlanCache>,
    timeout: Duration,
    max_tasks: usize,
    bucket_size: f64,
}

impl InitialPlanner {
    pub fn new(
        generator: Option<Arc<dyn PlanGenerator>>,
        cache: Arc<PlanCache>,
        timeout: Duration,
        max_tasks: usize,
        bucket_size: f64,
    ) -> Self {
        Self {
            generator,
            cache,
            timeout,
            max_tasks,
            bucket_size,
        }
    }

    /// 总能得到一个可执行的计划
    pub async fn plan(
        &self,
        trip: &TripRequest,
        manifest: &CapabilityManifest,
        registry: &AgentRegistry,
    ) -> (Plan, PlanSource) {
        let Some(generator) = &self.generator else {
            return (fallback_plan(trip), PlanSource::Fallback);
        };

        let key = CacheKey::Initial(ScenarioFingerprint::new(trip, self.bucket_size));
        if let Some(plan) = self.cache.get(&key, "plan").await {
            tracing::info!(plan_id = %plan.plan_id, "initial plan served from cache");
            return (plan, PlanSource::Cached);
        }

        let context: serde_json::Map<String, serde_json::Value> = registry
            .descriptions()
            .into_iter()
            .map(|(name, desc)| (name, serde_json::Value::from(desc)))
            .collect();
        let request = PlanRequest {
            goal: trip.goal(),
            manifest: manifest.to_json(),
            context: serde_json::json!({ "agents": context }),
            max_tasks: self.max_tasks,
        };
        let generator = Arc::clone(generator);
        let generated = generate_with_timeout("planner", self.timeout, async move {
            generator.generate(request).await
        })
        .await;

        match generated {
            Generation::Success(plan) => match validate(&plan, self.max_tasks) {
                Ok(()) => {
                    self.cache.insert(key, plan.clone()).await;
                    (plan, PlanSource::Generated)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "generated plan invalid, using fallback plan");
                    (fallback_plan(trip), PlanSource::Fallback)
                }
            },
            Generation::Failed(reason) => {
                tracing::warn!(reason = %reason, "plan generation failed, using fallback plan");
                (fallback_plan(trip), PlanSource::Fallback)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{nodes, Task};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingGenerator {
        plan: Generation<Plan>,
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl PlanGenerator for CountingGenerator {
        async fn generate(&self, _request: PlanRequest) -> Generation<Plan> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.plan.clone()
        }
    }

    fn trip(budget: f64) -> TripRequest {
        TripRequest::new("Kyoto", "KIX", "2025-04-01", "2025-04-05", budget)
    }

    fn planner(generator: Arc<CountingGenerator>, timeout_ms: u64) -> InitialPlanner {
        let generator: Arc<dyn PlanGenerator> = generator;
        InitialPlanner::new(
            Some(generator),
            Arc::new(PlanCache::new()),
            Duration::from_millis(timeout_ms),
            8,
            10_000.0,
        )
    }

    fn generator(plan: Generation<Plan>, delay_ms: u64) -> Arc<CountingGenerator> {
        Arc::new(CountingGenerator {
            plan,
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(delay_ms),
        })
    }

    #[tokio::test]
    async fn test_no_generator_uses_fallback() {
        let planner = InitialPlanner::new(None, Arc::new(PlanCache::new()), Duration::from_secs(1), 8, 10_000.0);
        let (plan, source) = planner
            .plan(&trip(1e5), &CapabilityManifest::default(), &AgentRegistry::new())
            .await;
        assert_eq!(source, PlanSource::Fallback);
        assert!(plan.plan_id.starts_with("fallback_"));
    }

    #[tokio::test]
    async fn test_generated_plan_cached_per_bucket() {
        let gen = generator(
            Generation::Success(Plan::new("plan", vec![Task::new("t1", nodes::FLIGHT)])),
            0,
        );
        let planner = planner(gen.clone(), 1000);
        let manifest = CapabilityManifest::default();
        let registry = AgentRegistry::new();

        let (_, source) = planner.plan(&trip(101_000.0), &manifest, &registry).await;
        assert_eq!(source, PlanSource::Generated);
        let (_, source) = planner.plan(&trip(109_000.0), &manifest, &registry).await;
        assert_eq!(source, PlanSource::Cached);
        let (_, source) = planner.plan(&trip(111_000.0), &manifest, &registry).await;
        assert_eq!(source, PlanSource::Generated);
        assert_eq!(gen.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_uses_fallback() {
        let gen = generator(
            Generation::Success(Plan::new("plan", vec![Task::new("t1", nodes::FLIGHT)])),
            500,
        );
        let planner = planner(gen, 20);
        let (plan, source) = planner
            .plan(&trip(1e5), &CapabilityManifest::default(), &AgentRegistry::new())
            .await;
        assert_eq!(source, PlanSource::Fallback);
        assert_eq!(plan.len(), 5);
    }

    #[tokio::test]
    async fn test_invalid_plan_uses_fallback_and_is_not_cached() {
        let mut dup = Plan::new("plan", vec![Task::new("t1", nodes::FLIGHT), Task::new("t1", nodes::FOOD)]);
        dup.plan_id = "dup".into();
        let gen = generator(Generation::Success(dup), 0);
        let planner = planner(gen.clone(), 1000);
        for _ in 0..2 {
            let (_, source) = planner
                .plan(&trip(1e5), &CapabilityManifest::default(), &AgentRegistry::new())
                .await;
            assert_eq!(source, PlanSource::Fallback);
        }
        assert_eq!(gen.calls.load(Ordering::SeqCst), 2);
    }
}
