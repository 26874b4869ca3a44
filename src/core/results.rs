//! 各阶段产出的结果（和类型），按阶段名存入 Session 的上下文表
//!
//! 结果一经产生即不可变：后续阶段只读，新一轮产出的结果整体替换同名槽位。

use serde::{Deserialize, Serialize};

use crate::core::Phase;
use crate::tools::RiskLevel;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    #[default]
    Low,
    Medium,
    High,
}

impl Complexity {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "high" | "complex" | "hard" => Complexity::High,
            "medium" | "moderate" | "mid" => Complexity::Medium,
            _ => Complexity::Low,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    pub requirement_summary: String,
    pub steps: Vec<String>,
    pub required_capabilities: Vec<String>,
    pub target_resources: Vec<String>,
    pub information_needs: Vec<String>,
    pub complexity: Complexity,
    pub confidence: f64,
    pub strategy: String,
    /// 由兜底路径产生
    pub fallback: bool,
}

impl PlanResult {
    /// 模型输出完全无法解析时的确定性计划：直接回答
    pub fn fallback(request: &str) -> Self {
        Self {
            requirement_summary: request.trim().to_string(),
            steps: vec!["Answer the request directly".to_string()],
            required_capabilities: Vec::new(),
            target_resources: Vec::new(),
            information_needs: vec![request.trim().to_string()],
            complexity: Complexity::Low,
            confidence: 0.5,
            strategy: "direct-answer".to_string(),
            fallback: true,
        }
    }

    pub fn needs_resources(&self) -> bool {
        !self.target_resources.is_empty() || !self.information_needs.is_empty()
    }
}

/// Gather 读到的单个资源
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FetchedResource {
    pub id: String,
    pub content: String,
    pub truncated: bool,
    pub size: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GatherResult {
    pub resources: Vec<FetchedResource>,
    /// 未能解决的信息缺口（拒绝访问、不存在、搜索无结果）
    pub gaps: Vec<String>,
    pub strategy: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    #[default]
    NotRequired,
    AutoApproved,
    /// 风险超过自动批准上限，未执行
    ApprovalRequired,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub tool: String,
    pub args: serde_json::Value,
    pub risk: RiskLevel,
    pub approval: ApprovalStatus,
    pub ok: bool,
    pub output: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecResult {
    pub success: bool,
    pub tool_outcomes: Vec<ToolOutcome>,
    pub risk_level: RiskLevel,
    pub approval: ApprovalStatus,
    pub errors: Vec<String>,
    /// Gather 已满足只读计划时补出的结果
    pub synthetic: bool,
}

impl ExecResult {
    pub fn synthetic_success(note: impl Into<String>) -> Self {
        Self {
            success: true,
            tool_outcomes: vec![ToolOutcome {
                tool: "gather".to_string(),
                args: serde_json::Value::Null,
                risk: RiskLevel::Low,
                approval: ApprovalStatus::NotRequired,
                ok: true,
                output: note.into(),
            }],
            risk_level: RiskLevel::Low,
            approval: ApprovalStatus::NotRequired,
            errors: Vec::new(),
            synthetic: true,
        }
    }

    pub fn output_chars(&self) -> usize {
        self.tool_outcomes.iter().map(|o| o.output.chars().count()).sum()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Complete,
    Partial,
    #[default]
    Incomplete,
}

impl CompletionStatus {
    pub fn parse(s: &str) -> Self {
        let s = s.trim().to_lowercase();
        if s.starts_with("complete") || s == "done" || s == "finished" {
            CompletionStatus::Complete
        } else if s.starts_with("partial") || s == "in_progress" {
            CompletionStatus::Partial
        } else {
            CompletionStatus::Incomplete
        }
    }
}

/// 评估者推荐的下一步
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    Plan,
    Gather,
    Execute,
    Respond,
    Complete,
}

impl NextAction {
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        let action = match s.as_str() {
            "plan" | "replan" | "re-plan" | "retry" => NextAction::Plan,
            "gather" | "research" | "collect" | "search" => NextAction::Gather,
            "execute" | "act" | "run" | "tool" => NextAction::Execute,
            "respond" | "answer" | "reply" => NextAction::Respond,
            "complete" | "done" | "finish" => NextAction::Complete,
            _ => return None,
        };
        Some(action)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvalResult {
    pub quality_score: f64,
    pub completion: CompletionStatus,
    pub recommended_action: NextAction,
    pub reasoning: String,
    pub missing_aspects: Vec<String>,
    pub suggestions: Vec<String>,
    /// 评分器失败，分数为兜底值
    pub scoring_failed: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RespondResult {
    pub answer: String,
    /// 经 final_report 模板渲染后的报告
    pub report: String,
    pub too_short: bool,
    pub fallback: bool,
}

/// 单个阶段的结果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhaseResult {
    Plan(PlanResult),
    Gather(GatherResult),
    Execute(ExecResult),
    Evaluate(EvalResult),
    Respond(RespondResult),
}

impl PhaseResult {
    pub fn phase(&self) -> Phase {
        match self {
            PhaseResult::Plan(_) => Phase::Plan,
            PhaseResult::Gather(_) => Phase::Gather,
            PhaseResult::Execute(_) => Phase::Execute,
            PhaseResult::Evaluate(_) => Phase::Evaluate,
            PhaseResult::Respond(_) => Phase::Respond,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_plan_gathers_request() {
        let plan = PlanResult::fallback("  what is in README?  ");
        assert!(plan.fallback);
        assert!(plan.needs_resources());
        assert_eq!(plan.information_needs, vec!["what is in README?".to_string()]);
        assert!(plan.required_capabilities.is_empty());
    }

    #[test]
    fn test_next_action_parse() {
        assert_eq!(NextAction::parse("Replan"), Some(NextAction::Plan));
        assert_eq!(NextAction::parse(" answer "), Some(NextAction::Respond));
        assert_eq!(NextAction::parse("dance"), None);
    }

    #[test]
    fn test_completion_parse() {
        assert_eq!(CompletionStatus::parse("Completed"), CompletionStatus::Complete);
        assert_eq!(CompletionStatus::parse("partially"), CompletionStatus::Partial);
        assert_eq!(CompletionStatus::parse("???"), CompletionStatus::Incomplete);
    }

    #[test]
    fn test_result_tagged_by_phase() {
        let r = PhaseResult::Execute(ExecResult::synthetic_success("read 2 files"));
        assert_eq!(r.phase(), Phase::Execute);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["kind"], "execute");
    }
}
