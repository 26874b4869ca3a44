//! Session：一次用户请求的完整生命周期状态，由状态机独占
//!
//! 包含对话历史、当前阶段、步数与预算、体征、阶段结果表与分层任务清单。
//! 步数只在 apply_cycle 中随 Governor 建议一起原子更新。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::governor::{GovernorVerdict, Intervention, IterationBudget};
use crate::core::results::{
    EvalResult, ExecResult, GatherResult, PhaseResult, PlanResult, RespondResult,
};
use crate::core::{AgentError, Phase, SessionStatus, TerminalReason, Vitals};
use crate::memory::{ConversationHistory, Message};
use crate::objective::{ContinuationContext, TaskProfile};

/// 阶段结果表：键为阶段名，值整体替换、不原地修改
///
/// 每个结果记下写入时所在的轮次；Evaluate 只把本轮产生的 Gather / Execute / Respond
/// 计入进度与错误，旧轮次留下的结果仍可读，但不会被重复计算。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseContext {
    results: BTreeMap<String, PhaseResult>,
    #[serde(default)]
    stamps: BTreeMap<String, u32>,
    /// 当前轮次（已完成的 Evaluate 次数）
    #[serde(default)]
    cycle: u32,
}

impl PhaseContext {
    pub fn insert(&mut self, result: PhaseResult) {
        let key = result.phase().as_str().to_string();
        self.stamps.insert(key.clone(), self.cycle);
        self.results.insert(key, result);
    }

    /// 结果是否产生于当前轮次
    pub fn is_current(&self, phase: Phase) -> bool {
        self.stamps.get(phase.as_str()) == Some(&self.cycle) && self.contains(phase)
    }

    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    pub(crate) fn set_cycle(&mut self, cycle: u32) {
        self.cycle = cycle;
    }

    pub fn current_gather(&self) -> Option<&GatherResult> {
        self.gather().filter(|_| self.is_current(Phase::Gather))
    }

    pub fn current_exec(&self) -> Option<&ExecResult> {
        self.exec().filter(|_| self.is_current(Phase::Execute))
    }

    pub fn current_respond(&self) -> Option<&RespondResult> {
        self.respond().filter(|_| self.is_current(Phase::Respond))
    }

    pub fn get(&self, phase: Phase) -> Option<&PhaseResult> {
        self.results.get(phase.as_str())
    }

    pub fn contains(&self, phase: Phase) -> bool {
        self.results.contains_key(phase.as_str())
    }

    pub fn plan(&self) -> Option<&PlanResult> {
        match self.get(Phase::Plan) {
            Some(PhaseResult::Plan(r)) => Some(r),
            _ => None,
        }
    }

    pub fn gather(&self) -> Option<&GatherResult> {
        match self.get(Phase::Gather) {
            Some(PhaseResult::Gather(r)) => Some(r),
            _ => None,
        }
    }

    pub fn exec(&self) -> Option<&ExecResult> {
        match self.get(Phase::Execute) {
            Some(PhaseResult::Execute(r)) => Some(r),
            _ => None,
        }
    }

    pub fn eval(&self) -> Option<&EvalResult> {
        match self.get(Phase::Evaluate) {
            Some(PhaseResult::Evaluate(r)) => Some(r),
            _ => None,
        }
    }

    pub fn respond(&self) -> Option<&RespondResult> {
        match self.get(Phase::Respond) {
            Some(PhaseResult::Respond(r)) => Some(r),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Done,
    Failed,
    Skipped,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskItem {
    /// 层级编号，如 "2" 或 "2.1"
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    pub children: Vec<TaskItem>,
}

impl TaskItem {
    fn new(id: String, description: String) -> Self {
        Self {
            id,
            description,
            status: TaskStatus::Pending,
            children: Vec::new(),
        }
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut TaskItem> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(id))
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a TaskItem>) {
        if self.children.is_empty() {
            out.push(self);
        } else {
            for c in &self.children {
                c.collect_leaves(out);
            }
        }
    }

    /// 子任务全部结束后同步父任务状态
    fn roll_up(&mut self) {
        for c in &mut self.children {
            c.roll_up();
        }
        if self.children.is_empty() {
            return;
        }
        if self.children.iter().any(|c| c.status == TaskStatus::Pending) {
            self.status = TaskStatus::Pending;
        } else if self.children.iter().any(|c| c.status == TaskStatus::Failed) {
            self.status = TaskStatus::Failed;
        } else {
            self.status = TaskStatus::Done;
        }
    }
}

/// 分层任务清单：由 Plan 的步骤生成，Execute 按工具结果标记
///
/// 以缩进（两个空格或 tab）或 "- " 开头的步骤视为上一步骤的子任务。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskList {
    pub items: Vec<TaskItem>,
}

impl TaskList {
    pub fn from_steps(steps: &[String]) -> Self {
        let mut items: Vec<TaskItem> = Vec::new();
        for raw in steps {
            let is_child = raw.starts_with("  ") || raw.starts_with('\t') || raw.starts_with("- ");
            let description = raw
                .trim()
                .trim_start_matches("- ")
                .trim()
                .to_string();
            if description.is_empty() {
                continue;
            }
            match items.last_mut() {
                Some(parent) if is_child => {
                    let id = format!("{}.{}", parent.id, parent.children.len() + 1);
                    parent.children.push(TaskItem::new(id, description));
                }
                _ => {
                    let id = (items.len() + 1).to_string();
                    items.push(TaskItem::new(id, description));
                }
            }
        }
        Self { items }
    }

    /// 重新规划：描述相同的任务沿用之前的状态
    pub fn replan(&self, steps: &[String]) -> Self {
        let mut next = Self::from_steps(steps);
        let previous: Vec<&TaskItem> = self.leaves();
        let mut updates: Vec<(String, TaskStatus)> = Vec::new();
        for leaf in next.leaves() {
            if let Some(old) = previous
                .iter()
                .find(|p| p.description == leaf.description && p.status != TaskStatus::Pending)
            {
                updates.push((leaf.id.clone(), old.status));
            }
        }
        for (id, status) in updates {
            next.mark(&id, status);
        }
        next
    }

    pub fn leaves(&self) -> Vec<&TaskItem> {
        let mut out = Vec::new();
        for item in &self.items {
            item.collect_leaves(&mut out);
        }
        out
    }

    pub fn mark(&mut self, id: &str, status: TaskStatus) -> bool {
        let found = self
            .items
            .iter_mut()
            .find_map(|i| i.find_mut(id))
            .map(|item| item.status = status)
            .is_some();
        for item in &mut self.items {
            item.roll_up();
        }
        found
    }

    /// 标记下一个待办叶子任务，返回其 id
    pub fn mark_next(&mut self, status: TaskStatus) -> Option<String> {
        let id = self
            .leaves()
            .into_iter()
            .find(|t| t.status == TaskStatus::Pending)
            .map(|t| t.id.clone())?;
        self.mark(&id, status);
        Some(id)
    }

    /// (已结束, 总数)，按叶子任务统计
    pub fn progress(&self) -> (usize, usize) {
        let leaves = self.leaves();
        let finished = leaves
            .iter()
            .filter(|t| t.status != TaskStatus::Pending)
            .count();
        (finished, leaves.len())
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 报告中使用的文本形式
    pub fn render(&self) -> String {
        fn walk(item: &TaskItem, depth: usize, out: &mut Vec<String>) {
            let mark = match item.status {
                TaskStatus::Pending => "[ ]",
                TaskStatus::Done => "[x]",
                TaskStatus::Failed => "[!]",
                TaskStatus::Skipped => "[-]",
            };
            out.push(format!(
                "{}{} {} {}",
                "  ".repeat(depth),
                mark,
                item.id,
                item.description
            ));
            for c in &item.children {
                walk(c, depth + 1, out);
            }
        }
        let mut out = Vec::new();
        for item in &self.items {
            walk(item, 0, &mut out);
        }
        out.join("\n")
    }
}

/// 单次请求的会话状态
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub request: String,
    pub profile: TaskProfile,
    pub history: ConversationHistory,
    pub phase: Phase,
    pub loop_count: u32,
    pub budget: IterationBudget,
    pub vitals: Vitals,
    pub context: PhaseContext,
    pub tasks: TaskList,
    pub low_streak: u32,
    pub escalation_rounds: u32,
    /// 本轮 Evaluate 之前 Gather -> Plan 的次数
    pub gather_replans: u32,
    /// 连续产生过短回答的次数
    pub respond_attempts: u32,
    pub continuation: Option<ContinuationContext>,
    pub last_intervention: Option<Intervention>,
    pub accepted_partial: bool,
    pub outcome: Option<TerminalReason>,
    /// 阶段访问计数（状态机的硬上限检查）
    pub phase_visits: u32,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        request: impl Into<String>,
        profile: TaskProfile,
        budget: IterationBudget,
        vitals: Vitals,
    ) -> Self {
        let request = request.into();
        let mut history = ConversationHistory::new();
        history.push(Message::user(request.clone()));
        Self {
            id: id.into(),
            request,
            profile,
            history,
            phase: Phase::Plan,
            loop_count: 0,
            budget,
            vitals,
            context: PhaseContext::default(),
            tasks: TaskList::default(),
            low_streak: 0,
            escalation_rounds: 0,
            gather_replans: 0,
            respond_attempts: 0,
            continuation: None,
            last_intervention: None,
            accepted_partial: false,
            outcome: None,
            phase_visits: 0,
            created_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// 一轮 Evaluate 结束：步数 +1 并原子应用 Governor 的建议
    pub fn apply_cycle(&mut self, verdict: GovernorVerdict) -> Result<(), AgentError> {
        if verdict.budget.max_loops < self.loop_count {
            return Err(AgentError::InvariantViolation(format!(
                "budget shrunk below loop_count {}",
                self.loop_count
            )));
        }
        self.loop_count += 1;
        self.context.set_cycle(self.loop_count);
        self.budget = verdict.budget;
        self.low_streak = verdict.low_streak;
        self.last_intervention = Some(verdict.intervention);
        self.gather_replans = 0;
        self.check_invariants()
    }

    /// 进入终态
    pub fn finish(&mut self, reason: TerminalReason) {
        self.phase = reason.terminal_phase();
        self.outcome = Some(reason);
    }

    /// 阶段访问的硬上限
    ///
    /// 两次 Evaluate 之间最多：Plan + Gather 各 1 次，外加 Gather -> Plan 重试
    /// max_gather_replans 次（每次 Plan + Gather），再加 Execute / Respond 与 Evaluate 本身。
    /// Respond 过短重试只能经 Evaluate 回来，每次都占一轮，已计入 max_loops。
    /// 多出的一轮留给最后一次 Evaluate 之后的 Respond。
    pub fn visit_limit(&self, max_gather_replans: u32) -> u32 {
        let per_cycle = 2 * (1 + max_gather_replans) + 3;
        (self.budget.max_loops + 1) * per_cycle
    }

    pub fn check_invariants(&self) -> Result<(), AgentError> {
        if self.budget.min_loops > self.budget.max_loops {
            return Err(AgentError::InvariantViolation(format!(
                "min_loops {} > max_loops {}",
                self.budget.min_loops, self.budget.max_loops
            )));
        }
        if self.loop_count > self.budget.max_loops {
            return Err(AgentError::InvariantViolation(format!(
                "loop_count {} exceeds max_loops {}",
                self.loop_count, self.budget.max_loops
            )));
        }
        if self.phase.is_terminal() != self.outcome.is_some() {
            return Err(AgentError::InvariantViolation(format!(
                "phase {} disagrees with outcome {:?}",
                self.phase, self.outcome
            )));
        }
        for (name, value) in self.vitals.as_array() {
            if !(0.0..=1.0).contains(&value) {
                return Err(AgentError::InvariantViolation(format!(
                    "{} out of range: {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    pub fn status(&self, satisfaction: f64, awaiting_human: bool) -> SessionStatus {
        SessionStatus {
            session_id: self.id.clone(),
            profile: self.profile,
            phase: self.phase,
            loop_count: self.loop_count,
            max_loops: self.budget.max_loops,
            vitals: self.vitals,
            satisfaction,
            awaiting_human,
            outcome: self.outcome.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::governor::{Governor, GovernorInput};

    fn session() -> Session {
        Session::new(
            "s-1",
            "hello",
            TaskProfile::GeneralChat,
            IterationBudget {
                min_loops: 1,
                max_loops: 3,
            },
            Vitals::default(),
        )
    }

    fn verdict(s: &Session) -> GovernorVerdict {
        Governor::default().assess(GovernorInput {
            vitals: s.vitals,
            loop_count: s.loop_count + 1,
            budget: s.budget,
            low_streak: s.low_streak,
            unresolved_errors: 0,
        })
    }

    #[test]
    fn test_new_session_records_request() {
        let s = session();
        assert_eq!(s.phase, Phase::Plan);
        assert_eq!(s.history.len(), 1);
        assert!(s.check_invariants().is_ok());
    }

    #[test]
    fn test_apply_cycle_increments_once() {
        let mut s = session();
        s.gather_replans = 2;
        let v = verdict(&s);
        s.apply_cycle(v).unwrap();
        assert_eq!(s.loop_count, 1);
        assert_eq!(s.gather_replans, 0);
        assert!(s.last_intervention.is_some());
    }

    #[test]
    fn test_loop_beyond_budget_is_violation() {
        let mut s = session();
        s.loop_count = 3;
        let v = verdict(&s);
        let err = s.apply_cycle(v).unwrap_err();
        assert!(matches!(err, AgentError::InvariantViolation(_)));
    }

    #[test]
    fn test_visit_limit_follows_budget_and_replans() {
        let mut s = session();
        // 3 轮 + 尾轮，每轮 Plan/Gather 2 次 + Execute/Respond/Evaluate
        assert_eq!(s.visit_limit(0), 4 * 5);
        assert_eq!(s.visit_limit(2), 4 * 9);
        s.budget.max_loops = 5;
        assert_eq!(s.visit_limit(2), 6 * 9);
    }

    #[test]
    fn test_terminal_requires_outcome() {
        let mut s = session();
        s.phase = Phase::Done;
        assert!(s.check_invariants().is_err());
        s.finish(TerminalReason::Completed);
        assert!(s.check_invariants().is_ok());
    }

    #[test]
    fn test_task_list_hierarchy() {
        let steps = vec![
            "Read the config".to_string(),
            "Write the report".to_string(),
            "  draft the summary".to_string(),
            "- add the table".to_string(),
        ];
        let mut tasks = TaskList::from_steps(&steps);
        assert_eq!(tasks.items.len(), 2);
        assert_eq!(tasks.items[1].children.len(), 2);
        assert_eq!(tasks.items[1].children[1].id, "2.2");
        assert_eq!(tasks.progress(), (0, 3));

        assert_eq!(tasks.mark_next(TaskStatus::Done).as_deref(), Some("1"));
        assert_eq!(tasks.mark_next(TaskStatus::Done).as_deref(), Some("2.1"));
        assert_eq!(tasks.items[1].status, TaskStatus::Pending);
        assert_eq!(tasks.mark_next(TaskStatus::Failed).as_deref(), Some("2.2"));
        assert_eq!(tasks.items[1].status, TaskStatus::Failed);
        assert_eq!(tasks.progress(), (3, 3));
        assert!(tasks.render().contains("[x] 1 Read the config"));
    }

    #[test]
    fn test_replan_keeps_finished_tasks() {
        let mut tasks = TaskList::from_steps(&["Read the config".to_string()]);
        tasks.mark_next(TaskStatus::Done);
        let next = tasks.replan(&["Read the config".to_string(), "Summarize".to_string()]);
        assert_eq!(next.items[0].status, TaskStatus::Done);
        assert_eq!(next.items[1].status, TaskStatus::Pending);
    }

    #[test]
    fn test_phase_context_replaces_slot() {
        let mut ctx = PhaseContext::default();
        ctx.insert(PhaseResult::Plan(PlanResult::fallback("a")));
        ctx.insert(PhaseResult::Plan(PlanResult::fallback("b")));
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.plan().map(|p| p.requirement_summary.as_str()), Some("b"));
        assert!(ctx.exec().is_none());
    }

    #[test]
    fn test_results_from_earlier_cycle_are_not_current() {
        let mut s = session();
        s.context
            .insert(PhaseResult::Execute(ExecResult::synthetic_success("cycle one")));
        assert!(s.context.current_exec().is_some());

        let v = verdict(&s);
        s.apply_cycle(v).unwrap();
        assert_eq!(s.context.cycle(), 1);
        assert!(s.context.exec().is_some());
        assert!(s.context.current_exec().is_none());

        s.context
            .insert(PhaseResult::Execute(ExecResult::synthetic_success("cycle two")));
        assert!(s.context.current_exec().is_some());
    }
}
