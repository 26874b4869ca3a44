//! 编排过程事件：用于 CLI / 前端实时展示阶段切换、体征、干预与工具结果

use serde::Serialize;

use crate::core::{ApprovalStatus, Intervention, Phase, TerminalReason, Vitals};

/// 单个过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PhaseEvent {
    PhaseStarted { phase: Phase, loop_count: u32 },
    /// 阶段结束及其一句话摘要
    PhaseFinished {
        phase: Phase,
        next: Phase,
        summary: String,
    },
    VitalsUpdated { vitals: Vitals },
    /// Governor 要求干预（high / critical）
    Intervention { intervention: Intervention },
    SatisfactionScored {
        score: f64,
        missing_aspects: Vec<String>,
    },
    /// 阶段降级到兜底结果
    Fallback { phase: Phase, reason: String },
    ToolOutcome {
        tool: String,
        ok: bool,
        approval: ApprovalStatus,
        preview: String,
    },
    /// 等待人工决策（渲染后的情况报告）
    Escalation { report: String },
    Terminal { phase: Phase, reason: TerminalReason },
}
