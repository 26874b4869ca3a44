//! 状态定义：状态机阶段、终止原因与对外的 SessionStatus 投影
//!
//! 控制面（CLI / UI）只持有轻量的 SessionStatus；完整 Session 由状态机独占。

use serde::{Deserialize, Serialize};

use crate::core::Vitals;
use crate::objective::TaskProfile;

/// 编排状态机的状态：五个工作阶段 + 三个终态
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Plan,
    Gather,
    Execute,
    Evaluate,
    Respond,
    Done,
    Escalated,
    TimedOut,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Escalated | Phase::TimedOut)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Plan => "plan",
            Phase::Gather => "gather",
            Phase::Execute => "execute",
            Phase::Evaluate => "evaluate",
            Phase::Respond => "respond",
            Phase::Done => "done",
            Phase::Escalated => "escalated",
            Phase::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 会话进入终态的原因
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    /// 满意度达标并给出回答
    Completed,
    /// 人工接受了部分结果
    PartialAccepted,
    /// Governor 报告 critical
    CriticalIntervention,
    /// 步数耗尽且无人工指导渠道
    BudgetExhausted,
    /// 人工选择取消
    HumanCancelled,
    /// 需要人工决策但无人响应
    HumanUnavailable,
    /// 人工续期次数已用完
    EscalationLimit,
    /// 协作式取消
    Cancelled,
}

impl TerminalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalReason::Completed => "completed",
            TerminalReason::PartialAccepted => "partial_accepted",
            TerminalReason::CriticalIntervention => "critical_intervention",
            TerminalReason::BudgetExhausted => "budget_exhausted",
            TerminalReason::HumanCancelled => "human_cancelled",
            TerminalReason::HumanUnavailable => "human_unavailable",
            TerminalReason::EscalationLimit => "escalation_limit",
            TerminalReason::Cancelled => "cancelled",
        }
    }

    pub fn terminal_phase(&self) -> Phase {
        match self {
            TerminalReason::Completed | TerminalReason::PartialAccepted => Phase::Done,
            TerminalReason::BudgetExhausted => Phase::TimedOut,
            _ => Phase::Escalated,
        }
    }
}

impl std::fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// get_status 返回的投影
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub profile: TaskProfile,
    pub phase: Phase,
    pub loop_count: u32,
    pub max_loops: u32,
    pub vitals: Vitals,
    pub satisfaction: f64,
    /// 正在等待 submit_human_choice
    pub awaiting_human: bool,
    pub outcome: Option<TerminalReason>,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}
