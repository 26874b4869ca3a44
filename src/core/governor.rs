//! 步数调节器（Pacemaker）
//!
//! 纯函数：根据任务类型给出初始步数预算，并在每轮 Evaluate 后根据体征、步数与未解决错误
//! 给出干预建议。Governor 从不直接修改 Session；状态机在递增步数的同时原子地应用 GovernorVerdict。
//!
//! 升级规则（单调）：
//! - 单个体征低于 low：normal（仅记录）
//! - 两个体征同时偏低、stamina 低于 critical 线、或连续偏低读数达到上限：high（强制重新规划）
//! - 任一体征 ≤ floor、三个体征同时偏低、或步数耗尽且仍有未解决错误：critical（停止并咨询）

use serde::{Deserialize, Serialize};

use crate::config::{GovernorSection, ThresholdPair};
use crate::core::Vitals;
use crate::objective::TaskProfile;

/// 步数预算：min_loops ≤ max_loops 恒成立
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationBudget {
    pub min_loops: u32,
    pub max_loops: u32,
}

impl IterationBudget {
    pub fn is_exhausted(&self, loop_count: u32) -> bool {
        loop_count >= self.max_loops
    }

    pub fn may_finish(&self, loop_count: u32) -> bool {
        loop_count >= self.min_loops
    }

    pub fn remaining(&self, loop_count: u32) -> u32 {
        self.max_loops.saturating_sub(loop_count)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionAction {
    Continue,
    Replan,
    HaltAndConsult,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionPriority {
    Normal,
    High,
    Critical,
}

/// 干预建议；high / critical 必须被路由无条件执行
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intervention {
    pub required: bool,
    pub reason: String,
    pub action: InterventionAction,
    pub priority: InterventionPriority,
}

impl Intervention {
    pub fn none() -> Self {
        Self {
            required: false,
            reason: "vitals nominal".to_string(),
            action: InterventionAction::Continue,
            priority: InterventionPriority::Normal,
        }
    }

    fn advisory(reason: String) -> Self {
        Self {
            required: false,
            reason,
            action: InterventionAction::Continue,
            priority: InterventionPriority::Normal,
        }
    }

    fn replan(reason: String) -> Self {
        Self {
            required: true,
            reason,
            action: InterventionAction::Replan,
            priority: InterventionPriority::High,
        }
    }

    fn halt(reason: String) -> Self {
        Self {
            required: true,
            reason,
            action: InterventionAction::HaltAndConsult,
            priority: InterventionPriority::Critical,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.priority == InterventionPriority::Critical
    }

    pub fn is_high(&self) -> bool {
        self.priority == InterventionPriority::High
    }
}

/// 每轮 Evaluate 后交给 Governor 的输入
#[derive(Clone, Copy, Debug)]
pub struct GovernorInput {
    pub vitals: Vitals,
    /// 递增后的步数
    pub loop_count: u32,
    pub budget: IterationBudget,
    pub low_streak: u32,
    pub unresolved_errors: usize,
}

/// Governor 的建议：状态机需与步数递增一起原子应用
#[derive(Clone, Debug, PartialEq)]
pub struct GovernorVerdict {
    pub intervention: Intervention,
    pub budget: IterationBudget,
    pub low_streak: u32,
    pub low_vitals: Vec<&'static str>,
}

/// Pacemaker：只读配置，可在会话间共享
#[derive(Clone, Debug, Default)]
pub struct Governor {
    cfg: GovernorSection,
}

impl Governor {
    pub fn new(cfg: GovernorSection) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &GovernorSection {
        &self.cfg
    }

    pub fn base_loops(&self, profile: TaskProfile) -> u32 {
        let b = &self.cfg.base_loops;
        match profile {
            TaskProfile::GeneralChat => b.general_chat,
            TaskProfile::InformationRequest => b.information_request,
            TaskProfile::Search => b.search,
            TaskProfile::Guidance => b.guidance,
            TaskProfile::Analysis => b.analysis,
            TaskProfile::Modification => b.modification,
            TaskProfile::Creation => b.creation,
        }
    }

    /// 会话开始时的预算：max = clamp(base, min, ceiling)
    pub fn initial_budget(&self, profile: TaskProfile) -> IterationBudget {
        let ceiling = self.cfg.max_loops.max(1);
        let min_loops = self.cfg.min_loops.max(1).min(ceiling);
        let max_loops = self.base_loops(profile).clamp(min_loops, ceiling);
        IterationBudget {
            min_loops,
            max_loops,
        }
    }

    fn low_vitals(&self, v: &Vitals) -> Vec<&'static str> {
        let pairs: [(&'static str, f64, ThresholdPair); 3] = [
            ("mood", v.mood, self.cfg.mood),
            ("focus", v.focus, self.cfg.focus),
            ("stamina", v.stamina, self.cfg.stamina),
        ];
        pairs
            .iter()
            .filter(|(_, value, t)| *value < t.low)
            .map(|(name, _, _)| *name)
            .collect()
    }

    fn all_good(&self, v: &Vitals) -> bool {
        v.mood >= self.cfg.mood.good
            && v.focus >= self.cfg.focus.good
            && v.stamina >= self.cfg.stamina.good
    }

    /// 每轮 Evaluate 后的检查
    pub fn assess(&self, input: GovernorInput) -> GovernorVerdict {
        let v = input.vitals;
        let low = self.low_vitals(&v);

        // 偏低则累加；全部回到 good 以上才清零；介于两者之间保持不变
        let low_streak = if !low.is_empty() {
            input.low_streak + 1
        } else if self.all_good(&v) {
            0
        } else {
            input.low_streak
        };

        // stamina 偏低时收缩上限（边际收益递减），但不低于 min_loops 与当前步数
        let mut budget = input.budget;
        if v.stamina < self.cfg.stamina.low {
            let shrunk = budget.max_loops.saturating_sub(1);
            budget.max_loops = shrunk.max(budget.min_loops).max(input.loop_count);
        }

        let at_floor: Vec<&str> = v
            .as_array()
            .iter()
            .filter(|(_, value)| *value <= self.cfg.floor)
            .map(|(name, _)| *name)
            .collect();

        let intervention = if !at_floor.is_empty() {
            Intervention::halt(format!("{} at floor", at_floor.join(", ")))
        } else if budget.is_exhausted(input.loop_count) && input.unresolved_errors > 0 {
            Intervention::halt(format!(
                "loop budget exhausted with {} unresolved error(s)",
                input.unresolved_errors
            ))
        } else if low.len() >= 2 {
            Intervention::replan(format!("{} low", low.join(" and ")))
        } else if v.stamina < self.cfg.stamina_critical {
            Intervention::replan("stamina critically low".to_string())
        } else if low_streak >= self.cfg.low_streak_limit {
            Intervention::replan(format!("{} consecutive low readings", low_streak))
        } else if low.len() == 1 {
            Intervention::advisory(format!("{} low", low[0]))
        } else {
            Intervention::none()
        };

        debug_assert!(budget.min_loops <= budget.max_loops);
        GovernorVerdict {
            intervention,
            budget,
            low_streak,
            low_vitals: low,
        }
    }

    /// 人工同意继续时追加步数；返回新预算
    pub fn grant_extension(&self, budget: IterationBudget, loop_count: u32) -> IterationBudget {
        let extension = self.cfg.escalation_extension.max(1);
        IterationBudget {
            min_loops: budget.min_loops,
            max_loops: budget.max_loops.max(loop_count) + extension,
        }
    }

    pub fn max_escalation_rounds(&self) -> u32 {
        self.cfg.max_escalation_rounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(v: Vitals, loop_count: u32, max: u32) -> GovernorInput {
        GovernorInput {
            vitals: v,
            loop_count,
            budget: IterationBudget {
                min_loops: 1,
                max_loops: max,
            },
            low_streak: 0,
            unresolved_errors: 0,
        }
    }

    #[test]
    fn test_initial_budget_per_profile() {
        let g = Governor::default();
        assert_eq!(g.initial_budget(TaskProfile::GeneralChat).max_loops, 3);
        assert_eq!(g.initial_budget(TaskProfile::Creation).max_loops, 7);
        let b = g.initial_budget(TaskProfile::Analysis);
        assert!(b.min_loops <= b.max_loops);
    }

    #[test]
    fn test_initial_budget_clamped_to_ceiling() {
        let mut cfg = GovernorSection::default();
        cfg.max_loops = 4;
        cfg.min_loops = 9;
        let g = Governor::new(cfg);
        let b = g.initial_budget(TaskProfile::Creation);
        assert_eq!(b.max_loops, 4);
        assert!(b.min_loops <= b.max_loops);
    }

    #[test]
    fn test_healthy_vitals_no_intervention() {
        let g = Governor::default();
        let verdict = g.assess(input(Vitals::new(0.8, 0.8, 0.9), 1, 5));
        assert!(!verdict.intervention.required);
        assert_eq!(verdict.low_streak, 0);
    }

    #[test]
    fn test_single_low_vital_is_normal() {
        let g = Governor::default();
        let verdict = g.assess(input(Vitals::new(0.2, 0.8, 0.9), 1, 5));
        assert_eq!(verdict.intervention.priority, InterventionPriority::Normal);
        assert!(!verdict.intervention.required);
        assert_eq!(verdict.low_streak, 1);
    }

    #[test]
    fn test_two_low_vitals_force_replan() {
        let g = Governor::default();
        let verdict = g.assess(input(Vitals::new(0.2, 0.2, 0.9), 2, 7));
        assert_eq!(verdict.intervention.priority, InterventionPriority::High);
        assert_eq!(verdict.intervention.action, InterventionAction::Replan);
    }

    #[test]
    fn test_three_low_vitals_above_floor_is_high() {
        let g = Governor::default();
        let verdict = g.assess(input(Vitals::new(0.25, 0.25, 0.2), 2, 7));
        assert_eq!(verdict.intervention.priority, InterventionPriority::High);
        assert_eq!(verdict.intervention.action, InterventionAction::Replan);
        assert!(verdict.intervention.reason.contains("mood and focus and stamina"));
    }

    #[test]
    fn test_stamina_critical_alone_is_high() {
        let g = Governor::default();
        let verdict = g.assess(input(Vitals::new(0.8, 0.8, 0.12), 2, 7));
        assert_eq!(verdict.intervention.priority, InterventionPriority::High);
    }

    #[test]
    fn test_low_streak_escalates() {
        let g = Governor::default();
        let mut i = input(Vitals::new(0.2, 0.8, 0.9), 3, 9);
        i.low_streak = 2;
        let verdict = g.assess(i);
        assert_eq!(verdict.low_streak, 3);
        assert!(verdict.intervention.is_high());
    }

    #[test]
    fn test_all_low_near_budget_is_critical() {
        let g = Governor::default();
        let verdict = g.assess(input(Vitals::new(0.05, 0.05, 0.05), 6, 7));
        assert!(verdict.intervention.is_critical());
        assert_eq!(
            verdict.intervention.action,
            InterventionAction::HaltAndConsult
        );
    }

    #[test]
    fn test_exhausted_with_errors_is_critical() {
        let g = Governor::default();
        let mut i = input(Vitals::new(0.8, 0.8, 0.9), 5, 5);
        i.unresolved_errors = 1;
        assert!(g.assess(i).intervention.is_critical());
        i.unresolved_errors = 0;
        assert!(!g.assess(i).intervention.is_critical());
    }

    #[test]
    fn test_low_stamina_shrinks_budget_but_keeps_invariant() {
        let g = Governor::default();
        let verdict = g.assess(input(Vitals::new(0.8, 0.8, 0.2), 4, 5));
        assert_eq!(verdict.budget.max_loops, 4);
        let verdict = g.assess(input(Vitals::new(0.8, 0.8, 0.2), 5, 5));
        assert_eq!(verdict.budget.max_loops, 5);
        assert!(verdict.budget.min_loops <= verdict.budget.max_loops);
    }

    #[test]
    fn test_grant_extension() {
        let g = Governor::default();
        let b = g.grant_extension(
            IterationBudget {
                min_loops: 1,
                max_loops: 7,
            },
            7,
        );
        assert_eq!(b.max_loops, 9);
    }
}
