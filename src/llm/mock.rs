//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! 默认回显最后一条 User 消息（非结构化文本，会走各阶段的兜底路径）；
//! `scripted` / `per_phase` 可注入确定性回复，用于驱动完整的状态机测试。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::capability::text::phase_of;
use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};

type Responder = dyn Fn(&[Message]) -> Result<String, LlmError> + Send + Sync;

/// Mock 客户端：默认回显，或按注入的闭包回复
#[derive(Default)]
pub struct MockLlmClient {
    responder: Option<Arc<Responder>>,
    calls: AtomicUsize,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以闭包决定每次调用的回复
    pub fn scripted<F>(f: F) -> Self
    where
        F: Fn(&[Message]) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Arc::new(f)),
            calls: AtomicUsize::new(0),
        }
    }

    /// 按 system prompt 中的阶段标记（plan / execute / evaluate / respond）分派回复；
    /// 闭包收到 (阶段名, 最后一条 user 内容)
    pub fn per_phase<F>(f: F) -> Self
    where
        F: Fn(&str, &str) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self::scripted(move |messages| {
            let phase = phase_of(messages).unwrap_or("unknown");
            f(phase, last_user(messages))
        })
    }

    /// 累计调用次数
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

fn last_user(messages: &[Message]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| matches!(m.role, Role::User))
        .map(|m| m.content.as_str())
        .unwrap_or("(no input)")
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        match &self.responder {
            Some(f) => f(messages),
            None => Ok(format!("Echo from Mock: {}", last_user(messages))),
        }
    }
}
