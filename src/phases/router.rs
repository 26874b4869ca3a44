//! 路由：每个阶段结束后的转移规则（纯函数）
//!
//! Evaluate 之后的顺序（先匹配先生效）：
//! 1. critical 干预 -> Escalated
//! 2. high 干预 -> Plan（忽略评估者推荐）
//! 3. 已满足且达到 min_loops -> Respond
//! 4. 仍可继续 -> 按评估者推荐
//! 5. 其余（步数耗尽）-> 咨询人工

use crate::core::{
    Complexity, ExecResult, GatherResult, Intervention, IterationBudget, NextAction, Phase, PlanResult,
    RespondResult, TerminalReason,
};

/// 阶段结束后的去向
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    To(Phase),
    Finish(TerminalReason),
    /// 步数耗尽未达标：交给人工
    Consult,
}

/// Plan 之后
///
/// 只有低复杂度、无资源需求的计划直接执行；较复杂的计划先经过 Gather，
/// 再由 after_gather 按能力是否只读决定 Execute 还是合成结果。
pub fn after_plan(plan: &PlanResult) -> Transition {
    if plan.needs_resources() {
        Transition::To(Phase::Gather)
    } else if plan.required_capabilities.is_empty() {
        Transition::To(Phase::Respond)
    } else if plan.complexity == Complexity::Low {
        Transition::To(Phase::Execute)
    } else {
        Transition::To(Phase::Gather)
    }
}

/// 计划只需要白名单内的只读能力（空能力列表也视为只读）
pub fn is_read_only(plan: &PlanResult, allowlist: &[String]) -> bool {
    plan.required_capabilities
        .iter()
        .all(|c| allowlist.iter().any(|a| a.eq_ignore_ascii_case(c)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatherRoute {
    Replan,
    Execute,
    /// 只读计划：补一个合成的成功 ExecResult 后进入 Evaluate
    SyntheticEvaluate,
}

pub fn after_gather(
    plan: &PlanResult,
    gather: &GatherResult,
    gather_replans: u32,
    gap_limit: usize,
    max_gather_replans: u32,
    allowlist: &[String],
) -> GatherRoute {
    if gather.gaps.len() > gap_limit && gather_replans < max_gather_replans {
        GatherRoute::Replan
    } else if is_read_only(plan, allowlist) {
        GatherRoute::SyntheticEvaluate
    } else {
        GatherRoute::Execute
    }
}

/// Evaluate 路由所需的全部输入
#[derive(Debug, Clone)]
pub struct EvaluateRouting<'a> {
    pub intervention: &'a Intervention,
    /// 已递增的步数
    pub loop_count: u32,
    pub budget: IterationBudget,
    pub satisfied: bool,
    pub should_continue: bool,
    pub recommended: NextAction,
}

pub fn action_to_phase(action: NextAction) -> Phase {
    match action {
        NextAction::Plan => Phase::Plan,
        NextAction::Gather => Phase::Gather,
        NextAction::Execute => Phase::Execute,
        NextAction::Respond | NextAction::Complete => Phase::Respond,
    }
}

pub fn after_evaluate(r: &EvaluateRouting<'_>) -> Transition {
    let has_room = !r.budget.is_exhausted(r.loop_count);
    if r.intervention.is_critical() {
        return Transition::Finish(TerminalReason::CriticalIntervention);
    }
    if r.intervention.is_high() && has_room {
        return Transition::To(Phase::Plan);
    }
    if r.satisfied {
        if r.budget.may_finish(r.loop_count) || !has_room {
            return Transition::To(Phase::Respond);
        }
        return Transition::To(action_to_phase(r.recommended));
    }
    if r.should_continue && has_room {
        return Transition::To(action_to_phase(r.recommended));
    }
    Transition::Consult
}

/// Respond 路由所需的输入
#[derive(Debug, Clone)]
pub struct RespondRouting<'a> {
    pub result: &'a RespondResult,
    pub loop_count: u32,
    pub budget: IterationBudget,
    pub completed: bool,
    pub accepted_partial: bool,
    pub retries_exhausted: bool,
}

pub fn after_respond(r: &RespondRouting<'_>) -> Transition {
    if r.accepted_partial {
        return Transition::Finish(TerminalReason::PartialAccepted);
    }
    let acceptable = !r.result.too_short || r.retries_exhausted;
    let exhausted = r.budget.is_exhausted(r.loop_count);
    if r.completed && (acceptable || exhausted) && r.budget.may_finish(r.loop_count) {
        return Transition::Finish(TerminalReason::Completed);
    }
    if !exhausted {
        return Transition::To(Phase::Evaluate);
    }
    Transition::Consult
}

/// Execute 之后无条件进入 Evaluate
pub fn after_execute(_exec: &ExecResult) -> Transition {
    Transition::To(Phase::Evaluate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::governor::{Governor, GovernorInput};
    use crate::core::{Complexity, Vitals};

    fn plan(caps: &[&str], targets: &[&str], needs: &[&str]) -> PlanResult {
        PlanResult {
            requirement_summary: "x".into(),
            steps: vec![],
            required_capabilities: caps.iter().map(|s| s.to_string()).collect(),
            target_resources: targets.iter().map(|s| s.to_string()).collect(),
            information_needs: needs.iter().map(|s| s.to_string()).collect(),
            complexity: Complexity::Low,
            confidence: 0.8,
            strategy: "s".into(),
            fallback: false,
        }
    }

    fn allowlist() -> Vec<String> {
        vec!["read_file".into(), "list_dir".into(), "search_files".into()]
    }

    fn budget(max: u32) -> IterationBudget {
        IterationBudget {
            min_loops: 1,
            max_loops: max,
        }
    }

    #[test]
    fn test_after_plan() {
        assert_eq!(after_plan(&plan(&[], &["a.md"], &[])), Transition::To(Phase::Gather));
        assert_eq!(after_plan(&plan(&[], &[], &["why"])), Transition::To(Phase::Gather));
        assert_eq!(after_plan(&plan(&["write_file"], &[], &[])), Transition::To(Phase::Execute));
        assert_eq!(after_plan(&plan(&[], &[], &[])), Transition::To(Phase::Respond));

        let mut complex = plan(&["write_file"], &[], &[]);
        complex.complexity = Complexity::High;
        assert_eq!(after_plan(&complex), Transition::To(Phase::Gather));
        complex.complexity = Complexity::Medium;
        assert_eq!(after_plan(&complex), Transition::To(Phase::Gather));
        // 经过 Gather 后写能力仍然去 Execute
        let empty = GatherResult::default();
        assert_eq!(
            after_gather(&complex, &empty, 0, 2, 2, &allowlist()),
            GatherRoute::Execute
        );
    }

    #[test]
    fn test_after_gather() {
        let gaps = |n: usize| GatherResult {
            resources: vec![],
            gaps: (0..n).map(|i| format!("gap {i}")).collect(),
            strategy: "s".into(),
        };
        let read_only = plan(&["read_file"], &["a"], &[]);
        let writes = plan(&["write_file"], &["a"], &[]);
        assert_eq!(after_gather(&read_only, &gaps(3), 0, 2, 2, &allowlist()), GatherRoute::Replan);
        assert_eq!(
            after_gather(&read_only, &gaps(3), 2, 2, 2, &allowlist()),
            GatherRoute::SyntheticEvaluate
        );
        assert_eq!(after_gather(&writes, &gaps(1), 0, 2, 2, &allowlist()), GatherRoute::Execute);
        assert!(is_read_only(&plan(&[], &[], &["x"]), &allowlist()));
    }

    #[test]
    fn test_critical_beats_everything() {
        let critical = Governor::default()
            .assess(GovernorInput {
                vitals: Vitals::new(0.05, 0.05, 0.05),
                loop_count: 2,
                budget: budget(3),
                low_streak: 0,
                unresolved_errors: 0,
            })
            .intervention;
        let r = EvaluateRouting {
            intervention: &critical,
            loop_count: 2,
            budget: budget(3),
            satisfied: true,
            should_continue: false,
            recommended: NextAction::Plan,
        };
        assert_eq!(after_evaluate(&r), Transition::Finish(TerminalReason::CriticalIntervention));
    }

    #[test]
    fn test_satisfied_goes_to_respond() {
        let none = Intervention::none();
        let r = EvaluateRouting {
            intervention: &none,
            loop_count: 1,
            budget: budget(3),
            satisfied: true,
            should_continue: false,
            recommended: NextAction::Complete,
        };
        assert_eq!(after_evaluate(&r), Transition::To(Phase::Respond));
    }

    #[test]
    fn test_creation_replan_then_consult() {
        let g = Governor::default();
        let b = g.initial_budget(crate::objective::TaskProfile::Creation);
        assert_eq!(b.max_loops, 7);

        // 第 5 轮：两个体征偏低 -> 强制重新规划，忽略推荐的 Respond
        let high = g
            .assess(GovernorInput {
                vitals: Vitals::new(0.25, 0.2, 0.5),
                loop_count: 5,
                budget: b,
                low_streak: 0,
                unresolved_errors: 0,
            })
            .intervention;
        assert!(high.is_high());
        let r = EvaluateRouting {
            intervention: &high,
            loop_count: 5,
            budget: b,
            satisfied: false,
            should_continue: true,
            recommended: NextAction::Respond,
        };
        assert_eq!(after_evaluate(&r), Transition::To(Phase::Plan));

        // 第 7 轮仍未达标 -> 咨询人工
        let none = Intervention::none();
        let r = EvaluateRouting {
            intervention: &none,
            loop_count: 7,
            budget: b,
            satisfied: false,
            should_continue: false,
            recommended: NextAction::Execute,
        };
        assert_eq!(after_evaluate(&r), Transition::Consult);
    }

    #[test]
    fn test_high_at_budget_end_consults() {
        let high = Intervention {
            required: true,
            reason: "two low".into(),
            action: crate::core::InterventionAction::Replan,
            priority: crate::core::InterventionPriority::High,
        };
        let r = EvaluateRouting {
            intervention: &high,
            loop_count: 3,
            budget: budget(3),
            satisfied: false,
            should_continue: false,
            recommended: NextAction::Plan,
        };
        assert_eq!(after_evaluate(&r), Transition::Consult);
    }

    #[test]
    fn test_after_respond() {
        let short = RespondResult {
            answer: "hi".into(),
            report: String::new(),
            too_short: true,
            fallback: false,
        };
        let good = RespondResult {
            too_short: false,
            ..short.clone()
        };
        let base = RespondRouting {
            result: &good,
            loop_count: 0,
            budget: budget(3),
            completed: false,
            accepted_partial: false,
            retries_exhausted: false,
        };
        // 尚未评估过：先去 Evaluate
        assert_eq!(after_respond(&base), Transition::To(Phase::Evaluate));
        let done = RespondRouting {
            loop_count: 1,
            completed: true,
            ..base.clone()
        };
        assert_eq!(after_respond(&done), Transition::Finish(TerminalReason::Completed));
        let too_short = RespondRouting {
            result: &short,
            ..done.clone()
        };
        assert_eq!(after_respond(&too_short), Transition::To(Phase::Evaluate));
        let partial = RespondRouting {
            accepted_partial: true,
            ..too_short.clone()
        };
        assert_eq!(after_respond(&partial), Transition::Finish(TerminalReason::PartialAccepted));
        let exhausted = RespondRouting {
            loop_count: 3,
            completed: false,
            ..base.clone()
        };
        assert_eq!(after_respond(&exhausted), Transition::Consult);
    }
}
