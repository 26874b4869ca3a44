//! 五阶段编排：Plan -> Gather -> Execute -> Evaluate -> Respond
//!
//! 每个阶段一个模块，router 放转移规则，loop_ 是状态机驱动。
//! 每个调用文本生成的阶段都有确定性兜底，解析失败不会让状态机停下。

pub mod escalation;
pub mod evaluate;
pub mod events;
pub mod execute;
pub mod gather;
pub mod loop_;
pub mod plan;
pub mod respond;
pub mod router;

use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch};

use crate::agent::AgentComponents;
use crate::capability::normalize::normalize;
use crate::core::{AgentError, CapabilityError, Phase, RecoveryAction, SessionStatus, SessionSupervisor};

pub use escalation::{
    ChannelGuidance, FixedGuidance, GuidanceHandle, HumanChoice, HumanGuidance, SituationReport,
};
pub use events::PhaseEvent;
pub use loop_::{resume_session, run_session, SessionOutcome};
pub use router::Transition;

/// 单个会话运行所需的引用集合
pub struct PhaseSession<'a> {
    /// 共享组件（必需）
    pub components: &'a AgentComponents,
    /// 取消令牌（必需）
    pub supervisor: &'a SessionSupervisor,
    /// 可选：人工指导渠道；缺省时步数耗尽直接 TimedOut
    pub guidance: Option<&'a dyn HumanGuidance>,
    /// 可选：事件推送通道
    pub event_tx: Option<&'a mpsc::UnboundedSender<PhaseEvent>>,
    /// 可选：状态投影（注册表 get_status 使用）
    pub status_tx: Option<&'a watch::Sender<SessionStatus>>,
}

impl<'a> PhaseSession<'a> {
    pub fn new(components: &'a AgentComponents, supervisor: &'a SessionSupervisor) -> Self {
        Self {
            components,
            supervisor,
            guidance: None,
            event_tx: None,
            status_tx: None,
        }
    }

    pub fn with_guidance(mut self, guidance: &'a dyn HumanGuidance) -> Self {
        self.guidance = Some(guidance);
        self
    }

    pub fn with_event_tx(mut self, tx: &'a mpsc::UnboundedSender<PhaseEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn with_status_tx(mut self, tx: &'a watch::Sender<SessionStatus>) -> Self {
        self.status_tx = Some(tx);
        self
    }

    pub(crate) fn send(&self, ev: PhaseEvent) {
        if let Some(t) = self.event_tx {
            let _ = t.send(ev);
        }
    }

    pub(crate) fn fallback(&self, phase: Phase, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(phase = %phase, reason = %reason, "phase degraded to fallback");
        self.send(PhaseEvent::Fallback { phase, reason });
    }
}

/// 结构化调用的结果：解析成功的值、原始文本（供启发式扫描）、能力错误
pub(crate) struct Structured<T> {
    pub parsed: Option<T>,
    pub raw: Option<String>,
    pub error: Option<CapabilityError>,
}

/// 调用文本生成并严格解析；格式错误时按 RecoveryEngine 建议带格式提示重试一次
pub(crate) async fn generate_structured<T: DeserializeOwned>(
    ps: &PhaseSession<'_>,
    phase: Phase,
    system: &str,
    prompt: &str,
) -> Structured<T> {
    let text = &ps.components.text;
    let recovery = &ps.components.recovery;
    let mut prompt = prompt.to_string();
    let mut raw_seen: Option<String> = None;
    let mut attempt: u32 = 0;

    loop {
        let err = match text.generate(&prompt, Some(system)).await {
            Ok(raw) => match normalize::<T>(&raw) {
                Ok(v) => {
                    return Structured {
                        parsed: Some(v),
                        raw: Some(raw),
                        error: None,
                    }
                }
                Err(e) => {
                    raw_seen = Some(raw);
                    e
                }
            },
            Err(e) => e,
        };

        match recovery.handle(&AgentError::Capability(err.clone()), attempt) {
            RecoveryAction::RetryWithPrompt(reminder) => {
                tracing::debug!(phase = %phase, error = %err, "retrying with format reminder");
                prompt = format!("{prompt}\n\n{reminder}");
                attempt += 1;
            }
            RecoveryAction::UseFallback(reason) => {
                ps.fallback(phase, reason);
                return Structured {
                    parsed: None,
                    raw: raw_seen,
                    error: Some(err),
                };
            }
            RecoveryAction::Abort => {
                return Structured {
                    parsed: None,
                    raw: raw_seen,
                    error: Some(err),
                };
            }
        }
    }
}

/// 截断到 n 个字符
pub(crate) fn clip(s: &str, n: usize) -> String {
    let s = s.trim();
    if s.chars().count() > n {
        format!("{}...", s.chars().take(n).collect::<String>())
    } else {
        s.to_string()
    }
}

/// 列表渲染为 "- a\n- b"
pub(crate) fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|i| format!("- {}", i))
        .collect::<Vec<_>>()
        .join("\n")
}
