//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：外部能力错误一律在阶段内降级处理，只有状态机不变量被破坏才是致命错误。

use thiserror::Error;

/// 外部能力（文本生成 / 文件访问 / 搜索）调用失败；均可在阶段内恢复
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapabilityError {
    #[error("{capability} timed out after {secs}s")]
    Timeout { capability: String, secs: u64 },

    #[error("Access denied: {0}")]
    Denied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Capability unavailable: {0}")]
    Unavailable(String),
}

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    /// 满意度评估本身失败（按 0.3 分处理，不会中断会话）
    #[error("Satisfaction scoring failed: {0}")]
    ScoringFailure(String),

    /// 状态机不变量被破坏：唯一的致命错误
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Cancelled by user")]
    Cancelled,

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session {0} is not waiting for a human decision")]
    NotAwaitingHuman(String),

    #[error("Session {0} is still running")]
    SessionRunning(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 使用阶段的确定性兜底结果继续
    UseFallback(String),
    /// 将格式提示注入下一次调用后重试一次
    RetryWithPrompt(String),
    /// 终止会话
    Abort,
}
