//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PILOT__*` 覆盖（双下划线表示嵌套，如 `PILOT__GOVERNOR__MAX_LOOPS=9`）。
//! 所有字段均有默认值，空文件或无文件时也能得到可运行的配置。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::tools::RiskLevel;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub governor: GovernorSection,
    pub vitals: VitalsSection,
    pub objective: ObjectiveSection,
    pub orchestrator: OrchestratorSection,
    pub tools: ToolsSection,
}

/// [app] 段：应用名、工作目录、提示词中携带的历史条数
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 沙箱根目录，未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
    /// 拼入提示词的最近对话条数（历史本身只追加、不剪枝）
    pub max_history_messages: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            workspace_root: None,
            max_history_messages: 12,
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: "deepseek-chat".to_string(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// 单个生命体征的两个切点：低于 low 视为偏低，高于 good 视为健康
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct ThresholdPair {
    pub low: f64,
    pub good: f64,
}

impl ThresholdPair {
    pub const fn new(low: f64, good: f64) -> Self {
        Self { low, good }
    }
}

/// [governor] 段：步数上下限、各任务类型的基础步数、生命体征阈值与升级策略
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GovernorSection {
    pub min_loops: u32,
    /// 全局上限（ceiling），任务类型的基础步数会被夹在 [min_loops, max_loops] 内
    pub max_loops: u32,
    pub base_loops: BaseLoopsSection,
    pub mood: ThresholdPair,
    pub focus: ThresholdPair,
    pub stamina: ThresholdPair,
    /// 仅 stamina 低于此值即判定为 high
    pub stamina_critical: f64,
    /// 任一体征 ≤ floor 即判定为 critical
    pub floor: f64,
    /// 连续偏低读数达到此值时升级为 high
    pub low_streak_limit: u32,
    /// 人工同意继续时追加的步数
    pub escalation_extension: u32,
    /// 单个会话最多允许的人工续期次数
    pub max_escalation_rounds: u32,
}

impl Default for GovernorSection {
    fn default() -> Self {
        Self {
            min_loops: 1,
            max_loops: 12,
            base_loops: BaseLoopsSection::default(),
            mood: ThresholdPair::new(0.3, 0.7),
            focus: ThresholdPair::new(0.3, 0.7),
            stamina: ThresholdPair::new(0.25, 0.6),
            stamina_critical: 0.15,
            floor: 0.1,
            low_streak_limit: 3,
            escalation_extension: 2,
            max_escalation_rounds: 2,
        }
    }
}

/// [governor.base_loops] 段：各任务类型的基础步数
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BaseLoopsSection {
    pub general_chat: u32,
    pub information_request: u32,
    pub search: u32,
    pub guidance: u32,
    pub analysis: u32,
    pub modification: u32,
    pub creation: u32,
}

impl Default for BaseLoopsSection {
    fn default() -> Self {
        Self {
            general_chat: 3,
            information_request: 4,
            search: 4,
            guidance: 4,
            analysis: 5,
            modification: 6,
            creation: 7,
        }
    }
}

/// [vitals] 段：混合权重、初始值与衰减量
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VitalsSection {
    /// 新观测值的权重，旧值权重为 1 - blend_weight
    pub blend_weight: f64,
    pub initial_mood: f64,
    pub initial_focus: f64,
    pub initial_stamina: f64,
    /// 每轮 Evaluate 的体力消耗
    pub loop_decay: f64,
    /// 每个错误的体力消耗
    pub error_decay: f64,
}

impl Default for VitalsSection {
    fn default() -> Self {
        Self {
            blend_weight: 0.4,
            initial_mood: 0.6,
            initial_focus: 0.8,
            initial_stamina: 1.0,
            loop_decay: 0.1,
            error_decay: 0.15,
        }
    }
}

/// [objective] 段：目标满意度与评分失败时的兜底分
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObjectiveSection {
    pub target_satisfaction: f64,
    /// 满意度低于此值的尝试计入 failed_approaches
    pub failed_attempt_threshold: f64,
    pub scoring_failure_score: f64,
}

impl Default for ObjectiveSection {
    fn default() -> Self {
        Self {
            target_satisfaction: 0.8,
            failed_attempt_threshold: 0.5,
            scoring_failure_score: 0.3,
        }
    }
}

/// [orchestrator] 段：状态机路由参数
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorSection {
    /// Gather 未解决缺口超过此数时回到 Plan
    pub gap_limit: usize,
    /// 每轮 Evaluate 之间 Gather -> Plan 的最大次数
    pub max_gather_replans: u32,
    /// 每个信息需求最多读取的搜索命中数
    pub max_reads_per_need: usize,
    /// Respond 答案短于此字符数视为不完整
    pub min_answer_chars: usize,
    pub max_respond_retries: u32,
    /// 只读能力白名单：计划只需要这些能力时 Gather 后直接进入 Evaluate
    pub read_only_capabilities: Vec<String>,
    /// 外部能力调用超时（秒）
    pub capability_timeout_secs: u64,
    /// 自动批准的最高风险等级
    pub auto_approve_risk: RiskLevel,
    /// 技术细节请求的最大次数（每次人工咨询）
    pub max_detail_requests: u32,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            gap_limit: 2,
            max_gather_replans: 2,
            max_reads_per_need: 3,
            min_answer_chars: 40,
            max_respond_retries: 1,
            read_only_capabilities: vec![
                "read_file".into(),
                "list_dir".into(),
                "search_files".into(),
            ],
            capability_timeout_secs: 60,
            auto_approve_risk: RiskLevel::Medium,
            max_detail_requests: 3,
        }
    }
}

/// [tools] 段：文件系统根、工具超时、读取与搜索上限
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolsSection {
    pub filesystem_root: Option<PathBuf>,
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub max_read_bytes: usize,
    pub max_search_results: usize,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            filesystem_root: None,
            tool_timeout_secs: 30,
            max_read_bytes: 64 * 1024,
            max_search_results: 50,
        }
    }
}

/// 从 config 目录加载配置，环境变量 PILOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PILOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PILOT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_consistent() {
        let cfg = AppConfig::default();
        assert!(cfg.governor.min_loops <= cfg.governor.max_loops);
        assert!(cfg.governor.stamina_critical < cfg.governor.stamina.low);
        assert!(cfg.governor.floor < cfg.governor.mood.low);
        assert_eq!(cfg.governor.base_loops.general_chat, 3);
        assert_eq!(cfg.governor.base_loops.creation, 7);
        assert!((cfg.objective.target_satisfaction - 0.8).abs() < f64::EPSILON);
        assert_eq!(cfg.orchestrator.gap_limit, 2);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pilot.toml");
        std::fs::write(
            &path,
            "[governor]\nmax_loops = 9\n\n[governor.base_loops]\ncreation = 8\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.governor.max_loops, 9);
        assert_eq!(cfg.governor.base_loops.creation, 8);
        assert_eq!(cfg.governor.base_loops.analysis, 5);
        assert_eq!(cfg.vitals.blend_weight, 0.4);
        assert_eq!(cfg.orchestrator.auto_approve_risk, RiskLevel::Medium);
    }
}
