//! 错误恢复引擎
//!
//! 根据 AgentError 与已重试次数返回 RecoveryAction，供各阶段决定是重试、降级还是终止。

use crate::core::{AgentError, CapabilityError, RecoveryAction};

/// 结构化输出格式错误时注入的提示
const FORMAT_REMINDER: &str = "Your previous reply could not be parsed. \
Reply with exactly one JSON object matching the requested fields, with no prose, no Markdown and no code fences.";

/// 语义化错误恢复：将错误映射为可执行动作（重试提示 / 降级 / 终止）
#[derive(Debug, Default, Clone)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// `attempt` 为当前调用已经重试过的次数
    pub fn handle(&self, err: &AgentError, attempt: u32) -> RecoveryAction {
        match err {
            AgentError::Capability(CapabilityError::Malformed(_)) if attempt == 0 => {
                RecoveryAction::RetryWithPrompt(FORMAT_REMINDER.to_string())
            }
            AgentError::Capability(e) => RecoveryAction::UseFallback(e.to_string()),
            AgentError::ScoringFailure(msg) => RecoveryAction::UseFallback(msg.clone()),
            AgentError::Cancelled | AgentError::InvariantViolation(_) => RecoveryAction::Abort,
            _ => RecoveryAction::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_retries_once() {
        let engine = RecoveryEngine::new();
        let err = AgentError::Capability(CapabilityError::Malformed("garbage".into()));
        match engine.handle(&err, 0) {
            RecoveryAction::RetryWithPrompt(msg) => assert!(msg.contains("JSON")),
            other => panic!("Expected RetryWithPrompt, got {other:?}"),
        }
        assert!(matches!(
            engine.handle(&err, 1),
            RecoveryAction::UseFallback(_)
        ));
    }

    #[test]
    fn test_timeout_degrades() {
        let engine = RecoveryEngine::new();
        let err = AgentError::Capability(CapabilityError::Timeout {
            capability: "text".into(),
            secs: 5,
        });
        assert!(matches!(engine.handle(&err, 0), RecoveryAction::UseFallback(_)));
    }

    #[test]
    fn test_denied_degrades() {
        let engine = RecoveryEngine::new();
        let err = AgentError::Capability(CapabilityError::Denied("../etc/passwd".into()));
        assert!(matches!(engine.handle(&err, 0), RecoveryAction::UseFallback(_)));
    }

    #[test]
    fn test_scoring_failure_degrades() {
        let engine = RecoveryEngine::new();
        let err = AgentError::ScoringFailure("evaluator down".into());
        assert!(matches!(engine.handle(&err, 0), RecoveryAction::UseFallback(_)));
    }

    #[test]
    fn test_invariant_violation_aborts() {
        let engine = RecoveryEngine::new();
        let err = AgentError::InvariantViolation("loop_count decreased".into());
        assert_eq!(engine.handle(&err, 0), RecoveryAction::Abort);
        assert_eq!(engine.handle(&AgentError::Cancelled, 0), RecoveryAction::Abort);
    }
}
