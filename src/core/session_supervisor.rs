//! 会话监管：协作式取消
//!
//! 取消标志只在每个阶段开始前检查；进行中的能力调用允许完成，随后会话转入 Escalated。

use tokio_util::sync::CancellationToken;

use crate::core::AgentError;

/// 会话级取消令牌
#[derive(Debug, Clone, Default)]
pub struct SessionSupervisor {
    cancel_token: CancellationToken,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 阶段边界检查点
    pub fn checkpoint(&self) -> Result<(), AgentError> {
        if self.cancel_token.is_cancelled() {
            Err(AgentError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// 子令牌（用于单次人工咨询等待）
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}
