//! 对外统一调用面
//!
//! Assistant 由配置组装：Provider 客户端 + 重试策略 + 函数注册表 + 编排参数。
//! ask 走非流式编排循环，ask_stream 走流式协调；两者共用同一套去重、循环检测与轮数上限。

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::config::AppConfig;
use crate::conversation::{ConversationBuilder, Message};
use crate::core::{RelayError, RetryPolicy, RetryScheduler};
use crate::llm::{create_client_from_config, ModelClient, Verbosity};
use crate::orchestrator::{Outcome, RoundEvent, RunInput, ToolCallOrchestrator};
use crate::stream::{StreamReconciler, TextStream};
use crate::tools::{FunctionRegistry, FunctionSandbox};

/// 一次提问
#[derive(Debug, Clone, Default)]
pub struct AskRequest {
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    /// 缺省用配置中的 verbosity
    pub verbosity: Option<Verbosity>,
    pub history: Vec<Message>,
    pub force_tool_use: bool,
}

impl AskRequest {
    pub fn new(user_prompt: impl Into<String>) -> Self {
        Self {
            user_prompt: user_prompt.into(),
            ..Default::default()
        }
    }

    pub fn system(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = Some(verbosity);
        self
    }

    pub fn history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn force_tool_use(mut self, force: bool) -> Self {
        self.force_tool_use = force;
        self
    }
}

#[derive(Clone)]
pub struct Assistant {
    orchestrator: ToolCallOrchestrator,
    reconciler: StreamReconciler,
    verbosity: Verbosity,
}

impl Assistant {
    /// 用默认参数组装
    pub fn new(client: Arc<dyn ModelClient>, registry: FunctionRegistry) -> Self {
        Self::assemble(client, registry, &AppConfig::default())
    }

    /// 按配置构建 Provider 客户端并组装
    pub fn from_config(cfg: &AppConfig, registry: FunctionRegistry) -> Result<Self, RelayError> {
        let client = create_client_from_config(&cfg.llm)?;
        tracing::info!(provider = client.provider(), model = %cfg.llm.model, "assistant ready");
        Ok(Self::assemble(client, registry, cfg))
    }

    /// 客户端由调用方提供，其余参数取自配置
    pub fn assemble(client: Arc<dyn ModelClient>, registry: FunctionRegistry, cfg: &AppConfig) -> Self {
        let orchestrator = ToolCallOrchestrator::new(client, FunctionSandbox::new(Arc::new(registry)))
            .with_retry(RetryScheduler::new(RetryPolicy::from_config(&cfg.retry)))
            .with_settings(cfg.orchestrator.clone());
        let reconciler = StreamReconciler::new(orchestrator.clone()).with_settings(cfg.stream.clone());
        Self {
            orchestrator,
            reconciler,
            verbosity: cfg.llm.verbosity,
        }
    }

    /// 订阅过程事件（对 ask 与 ask_stream 都生效）
    pub fn with_events(mut self, events: UnboundedSender<RoundEvent>) -> Self {
        self.orchestrator = self.orchestrator.with_events(events);
        self.reconciler = StreamReconciler::new(self.orchestrator.clone())
            .with_settings(self.reconciler.settings().clone());
        self
    }

    pub fn orchestrator(&self) -> &ToolCallOrchestrator {
        &self.orchestrator
    }

    fn run_input(&self, request: AskRequest) -> RunInput {
        let messages = ConversationBuilder::new()
            .history(&request.history)
            .user_prompt(request.user_prompt)
            .build();
        RunInput {
            system: request.system_prompt,
            messages,
            verbosity: request.verbosity.unwrap_or(self.verbosity),
            force_tool_use: request.force_tool_use,
        }
    }

    pub async fn ask(&self, request: AskRequest) -> Result<String, RelayError> {
        self.orchestrator.run(self.run_input(request)).await
    }

    pub async fn ask_detailed(&self, request: AskRequest) -> Result<Outcome, RelayError> {
        self.orchestrator.run_detailed(self.run_input(request)).await
    }

    pub fn ask_stream(&self, request: AskRequest) -> TextStream {
        self.reconciler.stream(self.run_input(request))
    }
}
