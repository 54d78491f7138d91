//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PARLEY__*` 覆盖（双下划线表示嵌套，如 `PARLEY__LLM__PROVIDER=anthropic`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::llm::Verbosity;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub retry: RetrySection,
    pub orchestrator: OrchestratorSection,
    pub stream: StreamSection,
}

/// [llm] 段：后端选择与模型
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / deepseek / anthropic
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 存放 API Key 的环境变量名；未设置时各适配器读取各自的默认变量
    pub api_key_env: Option<String>,
    pub verbosity: Verbosity,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key_env: None,
            verbosity: Verbosity::Medium,
        }
    }
}

/// [retry] 段：远程调用退避参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// 总尝试次数（含首次）
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter_factor: 0.1,
        }
    }
}

/// [orchestrator] 段：轮数上限、去重与循环检测
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub max_rounds: usize,
    /// 每隔多少轮清空已执行签名；0 表示从不清空
    pub dedup_clear_interval: usize,
    /// 同一单调用签名连续重复多少次判定为循环
    pub loop_repeat_limit: usize,
    /// 已执行签名窗口容量
    pub signature_window: usize,
    /// 单轮内函数并发上限
    pub max_parallel_calls: usize,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_rounds: 10,
            dedup_clear_interval: 3,
            loop_repeat_limit: 2,
            signature_window: 32,
            max_parallel_calls: 4,
        }
    }
}

impl OrchestratorSection {
    /// 把越界值拉回可用范围
    pub fn normalized(mut self) -> Self {
        self.max_rounds = self.max_rounds.max(1);
        self.loop_repeat_limit = self.loop_repeat_limit.max(1);
        self.signature_window = self.signature_window.max(1);
        self.max_parallel_calls = self.max_parallel_calls.max(1);
        self
    }
}

/// [stream] 段：流式文本中结构化载荷的检测
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    pub detect_payloads: bool,
    /// `{` 之后最多容忍多少个空白字符再判定
    pub probe_limit: usize,
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            detect_payloads: true,
            probe_limit: 16,
        }
    }
}

/// 从 config 目录加载配置，环境变量 PARLEY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PARLEY__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path.filter(|p| p.exists()) {
        builder = builder.add_source(config::File::from(path).required(false));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PARLEY")
            .separator("__")
            .try_parsing(true),
    );

    let mut cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.orchestrator = cfg.orchestrator.normalized();
    Ok(cfg)
}
