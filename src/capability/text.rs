//! 文本生成能力：generate(prompt, system?) -> String | CapabilityError
//!
//! 在 LlmClient 之上施加调用方指定的超时，并把 LlmError 映射为 CapabilityError。
//! 各阶段的 system prompt 以 "phase: <name>" 开头，方便日志与 Mock 分派。

use std::sync::Arc;
use std::time::Duration;

use crate::core::CapabilityError;
use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};

const PHASE_PREFIX: &str = "phase: ";

/// 带阶段标记的 system prompt
pub fn phase_system(phase: &str, body: &str) -> String {
    format!("{PHASE_PREFIX}{phase}\n{body}")
}

/// 从消息列表中的第一条 system 消息读出阶段名
pub fn phase_of(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .find(|m| m.role == Role::System)
        .and_then(|m| m.content.lines().next())
        .and_then(|line| line.strip_prefix(PHASE_PREFIX))
        .map(str::trim)
}

impl From<LlmError> for CapabilityError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Timeout => CapabilityError::Timeout {
                capability: "text".to_string(),
                secs: 0,
            },
            LlmError::RateLimited { retry_after_ms } => {
                CapabilityError::Unavailable(format!("rate limited, retry after {retry_after_ms}ms"))
            }
            LlmError::ApiError(msg) => CapabilityError::Unavailable(msg),
            LlmError::EmptyResponse => CapabilityError::Malformed("empty response".to_string()),
        }
    }
}

/// 文本生成器：持有 LLM 与单次调用超时
#[derive(Clone)]
pub struct TextGenerator {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl TextGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, timeout_secs: u64) -> Self {
        Self {
            llm,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String, CapabilityError> {
        self.generate_with_history(&[], prompt, system).await
    }

    /// history 放在 system 之后、prompt 之前
    pub async fn generate_with_history(
        &self,
        history: &[Message],
        prompt: &str,
        system: Option<&str>,
    ) -> Result<String, CapabilityError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if let Some(s) = system {
            messages.push(Message::system(s));
        }
        messages.extend(history.iter().cloned());
        messages.push(Message::user(prompt));

        match tokio::time::timeout(self.timeout, self.llm.complete(&messages)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(LlmError::Timeout)) | Err(_) => Err(CapabilityError::Timeout {
                capability: "text".to_string(),
                secs: self.timeout.as_secs(),
            }),
            Ok(Err(e)) => Err(e.into()),
        }
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    #[test]
    fn test_phase_marker_round_trip() {
        let messages = vec![
            Message::system(phase_system("gather", "body")),
            Message::user("x"),
        ];
        assert_eq!(phase_of(&messages), Some("gather"));
        assert_eq!(phase_of(&[Message::user("x")]), None);
    }

    #[tokio::test]
    async fn test_generate_maps_errors() {
        let llm = Arc::new(MockLlmClient::scripted(|_| Err(LlmError::EmptyResponse)));
        let text = TextGenerator::new(llm, 5);
        let err = text.generate("hi", None).await.unwrap_err();
        assert!(matches!(err, CapabilityError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_generate_passes_system_first() {
        let llm = Arc::new(MockLlmClient::scripted(|messages| {
            Ok(format!("{}|{}", messages.len(), phase_of(messages).unwrap_or("-")))
        }));
        let text = TextGenerator::new(llm, 5);
        let out = text
            .generate("hi", Some(&phase_system("plan", "make a plan")))
            .await
            .unwrap();
        assert_eq!(out, "2|plan");
    }
}
