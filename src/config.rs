//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TRIPBEE__*` 覆盖（双下划线表示嵌套，如 `TRIPBEE__LLM__PROVIDER=openai`）。
//! API Key 只从 OPENAI_API_KEY / DEEPSEEK_API_KEY 读取，不进配置文件。

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::agents::EstimatorRates;
use crate::core::{OrchestratorConfig, TripRequest};
use crate::plan::CapabilityOverride;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub orchestrator: OrchestratorConfig,
    /// [manifest.<NODE>]：逐字段覆盖内置清单条目
    pub manifest: BTreeMap<String, CapabilityOverride>,
    pub estimators: EstimatorRates,
    pub trip: TripSection,
}

/// [app] 段
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择、超时与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// mock / openai / deepseek
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// 单次调用超时（秒）
    pub timeout_secs: f64,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model: None,
            base_url: None,
            timeout_secs: 30.0,
            max_attempts: 2,
            retry_backoff_ms: 1000,
        }
    }
}

/// [trip] 段：命令行运行时的行程参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TripSection {
    pub city: String,
    pub city_iata: String,
    pub start_date: String,
    pub end_date: String,
    pub budget: f64,
}

impl Default for TripSection {
    fn default() -> Self {
        Self {
            city: "Goa".to_string(),
            city_iata: "GOI".to_string(),
            start_date: "2025-12-01".to_string(),
            end_date: "2025-12-04".to_string(),
            budget: 100_000.0,
        }
    }
}

impl TripSection {
    pub fn to_request(&self) -> TripRequest {
        TripRequest::new(
            self.city.clone(),
            self.city_iata.clone(),
            self.start_date.clone(),
            self.end_date.clone(),
            self.budget,
        )
    }
}

/// 从 config 目录加载配置，环境变量 TRIPBEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TRIPBEE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TRIPBEE")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
