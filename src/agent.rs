//! Headless Agent 运行时
//!
//! AgentComponents 持有所有会话共享的只读组件（文本生成、资源、工具执行器、渲染器、
//! 分类器、Governor、恢复策略）；new_session 为一条请求创建 Session + Objective，
//! run_request 跑完整状态机并返回 SessionOutcome。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::capability::{ReportRenderer, ResourceProvider, TextGenerator, WorkspaceResources};
use crate::config::AppConfig;
use crate::core::{AgentError, Governor, RecoveryEngine, Session, SessionSupervisor, Vitals};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::objective::{Objective, TaskClassifier};
use crate::phases::{run_session, HumanGuidance, PhaseEvent, PhaseSession, SessionOutcome};
use crate::tools::{default_registry, SafeFs, ToolExecutor};
use tokio::sync::mpsc;

/// 预构建的 Agent 组件，可多会话共享
pub struct AgentComponents {
    pub config: AppConfig,
    pub text: TextGenerator,
    pub resources: Arc<dyn ResourceProvider>,
    pub executor: Arc<ToolExecutor>,
    pub renderer: ReportRenderer,
    pub classifier: TaskClassifier,
    pub governor: Governor,
    pub recovery: RecoveryEngine,
    pub workspace: PathBuf,
}

/// 按 [llm].provider 与环境变量选择后端；缺少 Key 时退回 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    if provider == "mock" {
        tracing::info!("Using Mock LLM (configured)");
        return Arc::new(MockLlmClient::new());
    }
    // 有 DeepSeek Key 或（配置为 deepseek 且仅有 OpenAI Key 时也走 DeepSeek 兼容端点）
    let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok()
        || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "deepseek";

    if use_deepseek && provider != "openai" {
        tracing::info!("Using DeepSeek LLM ({})", cfg.llm.model);
        Arc::new(OpenAiClient::deepseek(Some(&cfg.llm.model)))
    } else if use_openai {
        tracing::info!("Using OpenAI LLM ({})", cfg.llm.model);
        Arc::new(OpenAiClient::new(
            cfg.llm.base_url.as_deref(),
            &cfg.llm.model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
        ))
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock LLM");
        Arc::new(MockLlmClient::new())
    }
}

impl AgentComponents {
    /// 用给定 LLM 与工作区构建组件（测试与嵌入使用）
    pub fn new(config: AppConfig, llm: Arc<dyn LlmClient>, workspace: &Path) -> Self {
        let root = config
            .tools
            .filesystem_root
            .clone()
            .unwrap_or_else(|| workspace.to_path_buf());
        let text = TextGenerator::new(llm, config.orchestrator.capability_timeout_secs)
            .with_timeout(std::time::Duration::from_secs(
                config
                    .llm
                    .timeouts
                    .request
                    .min(config.orchestrator.capability_timeout_secs)
                    .max(1),
            ));
        let resources: Arc<dyn ResourceProvider> =
            Arc::new(WorkspaceResources::new(SafeFs::new(&root), &config.tools));
        let executor = Arc::new(ToolExecutor::new(
            default_registry(&root, &config.tools),
            config.tools.tool_timeout_secs,
        ));
        Self {
            governor: Governor::new(config.governor.clone()),
            text,
            resources,
            executor,
            renderer: ReportRenderer::new(),
            classifier: TaskClassifier::new(),
            recovery: RecoveryEngine::new(),
            workspace: root,
            config,
        }
    }

    /// 从配置构建：工作区取 [app].workspace_root，不存在则创建
    pub fn from_config(config: AppConfig) -> Result<Self, AgentError> {
        let workspace = config
            .app
            .workspace_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("workspace"));
        std::fs::create_dir_all(&workspace).map_err(|e| {
            AgentError::ConfigError(format!(
                "cannot create workspace {}: {}",
                workspace.display(),
                e
            ))
        })?;
        let llm = create_llm_from_config(&config);
        Ok(Self::new(config, llm, &workspace))
    }

    /// 为一条请求创建会话与目标：分类 -> 初始预算 -> 初始体征
    pub fn new_session(&self, request: &str) -> (Session, Objective) {
        let profile = self.classifier.classify(request);
        let budget = self.governor.initial_budget(profile);
        let session = Session::new(
            uuid::Uuid::new_v4().to_string(),
            request,
            profile,
            budget,
            Vitals::from_config(&self.config.vitals),
        );
        let objective = Objective::new(request, budget.max_loops, &self.config.objective);
        tracing::info!(
            session_id = %session.id,
            profile = %profile,
            max_loops = budget.max_loops,
            "session created"
        );
        (session, objective)
    }

    /// 单次运行一条请求直到终态
    pub async fn run_request(
        &self,
        request: &str,
        guidance: Option<&dyn HumanGuidance>,
        event_tx: Option<&mpsc::UnboundedSender<PhaseEvent>>,
    ) -> Result<SessionOutcome, AgentError> {
        let supervisor = SessionSupervisor::new();
        let mut ps = PhaseSession::new(self, &supervisor);
        if let Some(g) = guidance {
            ps = ps.with_guidance(g);
        }
        if let Some(tx) = event_tx {
            ps = ps.with_event_tx(tx);
        }
        let (session, objective) = self.new_session(request);
        run_session(&ps, session, objective).await
    }
}
