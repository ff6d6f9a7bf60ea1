//! 编排器构建器：统一的初始化逻辑
//!
//! 二进制入口用 from_app_config 按配置装配；测试可逐项替换注册表、清单与生成器。

use std::sync::Arc;
use std::time::Duration;

use crate::agents::{default_registry, AgentRegistry, EstimatorRates};
use crate::config::AppConfig;
use crate::core::orchestrator::{secs, Orchestrator, OrchestratorConfig};
use crate::llm::LlmClient;
use crate::plan::CapabilityManifest;
use crate::planning::{
    InitialPlanner, LlmPlanGenerator, LlmReplanGenerator, PlanCache, PlanGenerator,
    ReplanGenerator, Replanner,
};

pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    manifest: CapabilityManifest,
    registry: Option<AgentRegistry>,
    plan_generator: Option<Arc<dyn PlanGenerator>>,
    replan_generator: Option<Arc<dyn ReplanGenerator>>,
    cache: Arc<PlanCache>,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: OrchestratorConfig::default(),
            manifest: CapabilityManifest::default(),
            registry: None,
            plan_generator: None,
            replan_generator: None,
            cache: Arc::new(PlanCache::new()),
        }
    }

    /// 按应用配置装配：清单覆盖、内置 Agent；有 LLM 时挂上计划 / 重规划生成器
    pub fn from_app_config(cfg: &AppConfig, llm: Option<Arc<dyn LlmClient>>) -> Self {
        let mut manifest = CapabilityManifest::default();
        manifest.apply_overrides(&cfg.manifest);

        let llm_timeout = secs(cfg.llm.timeout_secs);
        let registry = default_registry(&cfg.estimators, llm.clone(), llm_timeout, cfg.llm.max_attempts);

        let mut builder = Self::new()
            .with_config(cfg.orchestrator.clone())
            .with_manifest(manifest)
            .with_registry(registry);

        if let Some(llm) = llm {
            let backoff = Duration::from_millis(cfg.llm.retry_backoff_ms);
            builder = builder
                .with_plan_generator(Arc::new(LlmPlanGenerator::new(
                    Arc::clone(&llm),
                    cfg.llm.max_attempts,
                    backoff,
                )))
                .with_replan_generator(Arc::new(LlmReplanGenerator::new(
                    llm,
                    cfg.llm.max_attempts,
                    backoff,
                )));
        }
        builder
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_manifest(mut self, manifest: CapabilityManifest) -> Self {
        self.manifest = manifest;
        self
    }

    pub fn with_registry(mut self, registry: AgentRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_plan_generator(mut self, generator: Arc<dyn PlanGenerator>) -> Self {
        self.plan_generator = Some(generator);
        self
    }

    pub fn with_replan_generator(mut self, generator: Arc<dyn ReplanGenerator>) -> Self {
        self.replan_generator = Some(generator);
        self
    }

    /// 共享计划缓存（多次运行之间复用）
    pub fn with_cache(mut self, cache: Arc<PlanCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn build(self) -> Orchestrator {
        let config = self.config;
        let registry = self.registry.unwrap_or_else(|| {
            default_registry(&EstimatorRates::default(), None, Duration::from_secs(30), 1)
        });
        let generation_timeout = config.generation_timeout();

        let planner = InitialPlanner::new(
            self.plan_generator,
            Arc::clone(&self.cache),
            generation_timeout,
            config.max_tasks,
            config.budget_bucket,
        );
        let replanner = Replanner::new(
            self.replan_generator,
            self.cache,
            generation_timeout,
            config.max_tasks,
            config.budget_bucket,
        );

        Orchestrator::new(
            config,
            Arc::new(registry),
            Arc::new(self.manifest),
            planner,
            replanner,
        )
    }
}
