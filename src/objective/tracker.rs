//! 目标追踪：单个请求跨轮次的满意度、尝试历史与已学到的约束
//!
//! Objective 由会话独占并随 run_session 传入传出；ObjectiveTracker 只负责创建新目标与归档已完成目标（用于统计）。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ObjectiveSection;

/// 一次完整尝试（一轮 Evaluate）的记录
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub strategy: String,
    pub results: Vec<String>,
    pub satisfaction: f64,
    pub errors: Vec<String>,
    pub lessons: Vec<String>,
    pub at: DateTime<Utc>,
}

/// 重新规划时交给 Plan 阶段的上下文
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContinuationContext {
    /// 满意度低于阈值的策略
    pub failed_approaches: Vec<String>,
    pub learned_limitations: Vec<String>,
    /// 最近一次评估指出的缺失项
    pub identified_problems: Vec<String>,
    pub suggested_improvements: Vec<String>,
}

impl ContinuationContext {
    pub fn is_empty(&self) -> bool {
        self.failed_approaches.is_empty()
            && self.learned_limitations.is_empty()
            && self.identified_problems.is_empty()
            && self.suggested_improvements.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    pub id: String,
    pub request: String,
    pub iteration_count: u32,
    pub max_iterations: u32,
    pub current_satisfaction: f64,
    pub target_satisfaction: f64,
    /// 只追加，按结果类型分组（plan / gather / execute / respond …）
    pub accumulated_results: BTreeMap<String, Vec<String>>,
    pub attempts: Vec<Attempt>,
    pub learned_constraints: Vec<String>,
    pub missing_aspects: Vec<String>,
    pub suggestions: Vec<String>,
    pub failed_attempt_threshold: f64,
    pub created_at: DateTime<Utc>,
}

impl Objective {
    pub fn new(request: impl Into<String>, max_iterations: u32, cfg: &ObjectiveSection) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request: request.into(),
            iteration_count: 0,
            max_iterations,
            current_satisfaction: 0.0,
            target_satisfaction: cfg.target_satisfaction.clamp(0.0, 1.0),
            accumulated_results: BTreeMap::new(),
            attempts: Vec::new(),
            learned_constraints: Vec::new(),
            missing_aspects: Vec::new(),
            suggestions: Vec::new(),
            failed_attempt_threshold: cfg.failed_attempt_threshold,
            created_at: Utc::now(),
        }
    }

    pub fn add_result(&mut self, kind: &str, result: impl Into<String>) {
        let result = result.into();
        if result.trim().is_empty() {
            return;
        }
        self.accumulated_results
            .entry(kind.to_string())
            .or_default()
            .push(result);
    }

    /// 追加一次尝试；lessons 去重后并入 learned_constraints；iteration_count + 1
    pub fn record_attempt(
        &mut self,
        strategy: &str,
        results: Vec<String>,
        satisfaction: f64,
        errors: Vec<String>,
        lessons: Vec<String>,
    ) {
        for lesson in &lessons {
            self.add_constraint(lesson);
        }
        self.attempts.push(Attempt {
            strategy: strategy.to_string(),
            results,
            satisfaction: clamp_score(satisfaction),
            errors,
            lessons,
            at: Utc::now(),
        });
        self.iteration_count += 1;
    }

    pub fn add_constraint(&mut self, constraint: &str) {
        let c = constraint.trim();
        if !c.is_empty() && !self.learned_constraints.iter().any(|x| x == c) {
            self.learned_constraints.push(c.to_string());
        }
    }

    /// 以同样的分数与缺失项重复调用结果不变
    pub fn update_satisfaction(&mut self, score: f64, missing_aspects: Vec<String>) {
        self.current_satisfaction = clamp_score(score);
        self.missing_aspects = missing_aspects;
    }

    pub fn set_suggestions(&mut self, suggestions: Vec<String>) {
        self.suggestions = suggestions;
    }

    pub fn is_completed(&self) -> bool {
        self.current_satisfaction >= self.target_satisfaction
    }

    pub fn should_continue(&self) -> bool {
        !self.is_completed() && self.iteration_count < self.max_iterations
    }

    pub fn is_exhausted(&self) -> bool {
        !self.is_completed() && self.iteration_count >= self.max_iterations
    }

    pub fn get_continuation_context(&self) -> ContinuationContext {
        let mut failed_approaches: Vec<String> = Vec::new();
        for a in &self.attempts {
            if a.satisfaction < self.failed_attempt_threshold
                && !failed_approaches.contains(&a.strategy)
            {
                failed_approaches.push(a.strategy.clone());
            }
        }
        ContinuationContext {
            failed_approaches,
            learned_limitations: self.learned_constraints.clone(),
            identified_problems: self.missing_aspects.clone(),
            suggested_improvements: self.suggestions.clone(),
        }
    }

    /// 人工同意继续后重新开放迭代：iteration_count 保持单调，只追加 extension 次机会
    pub fn reset_for_retry(&mut self, preserve_learning: bool, extension: u32) {
        if !preserve_learning {
            self.attempts.clear();
            self.learned_constraints.clear();
            self.suggestions.clear();
        }
        self.max_iterations = self.iteration_count + extension.max(1);
    }

    pub fn best_satisfaction(&self) -> f64 {
        self.attempts
            .iter()
            .map(|a| a.satisfaction)
            .fold(self.current_satisfaction, f64::max)
    }
}

fn clamp_score(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// 已归档目标的摘要
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletedObjective {
    pub id: String,
    pub request: String,
    pub succeeded: bool,
    pub satisfaction: f64,
    pub iterations: u32,
    pub finished_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveStats {
    pub count: usize,
    pub success_rate: f64,
    pub mean_satisfaction: f64,
    pub mean_iterations: f64,
}

/// 目标工厂 + 已完成列表
#[derive(Clone, Debug, Default)]
pub struct ObjectiveTracker {
    cfg: ObjectiveSection,
    completed: Vec<CompletedObjective>,
}

impl ObjectiveTracker {
    pub fn new(cfg: ObjectiveSection) -> Self {
        Self {
            cfg,
            completed: Vec::new(),
        }
    }

    pub fn create(&self, request: &str, max_iterations: u32) -> Objective {
        Objective::new(request, max_iterations, &self.cfg)
    }

    pub fn archive(&mut self, objective: &Objective, succeeded: bool) {
        self.completed.push(CompletedObjective {
            id: objective.id.clone(),
            request: objective.request.clone(),
            succeeded,
            satisfaction: objective.current_satisfaction,
            iterations: objective.iteration_count,
            finished_at: Utc::now(),
        });
    }

    pub fn completed(&self) -> &[CompletedObjective] {
        &self.completed
    }

    pub fn statistics(&self) -> ObjectiveStats {
        let n = self.completed.len();
        if n == 0 {
            return ObjectiveStats::default();
        }
        let nf = n as f64;
        let succeeded = self.completed.iter().filter(|c| c.succeeded).count();
        ObjectiveStats {
            count: n,
            success_rate: succeeded as f64 / nf,
            mean_satisfaction: self.completed.iter().map(|c| c.satisfaction).sum::<f64>() / nf,
            mean_iterations: self.completed.iter().map(|c| c.iterations as f64).sum::<f64>() / nf,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn objective(max: u32) -> Objective {
        Objective::new("write a haiku", max, &ObjectiveSection::default())
    }

    #[test]
    fn test_update_satisfaction_idempotent() {
        let mut o = objective(3);
        o.update_satisfaction(0.85, vec!["tone".into()]);
        let first = o.is_completed();
        o.update_satisfaction(0.85, vec!["tone".into()]);
        assert_eq!(first, o.is_completed());
        assert!(o.is_completed());
        assert_eq!(o.missing_aspects, vec!["tone".to_string()]);
    }

    #[test]
    fn test_should_continue_until_budget() {
        let mut o = objective(2);
        assert!(o.should_continue());
        o.record_attempt("a", vec![], 0.2, vec![], vec![]);
        o.record_attempt("b", vec![], 0.3, vec![], vec![]);
        assert!(!o.should_continue());
        assert!(o.is_exhausted());
    }

    #[test]
    fn test_lessons_deduplicated() {
        let mut o = objective(5);
        o.record_attempt("a", vec![], 0.2, vec![], vec!["no network".into()]);
        o.record_attempt("b", vec![], 0.2, vec![], vec!["no network".into(), " ".into()]);
        assert_eq!(o.learned_constraints, vec!["no network".to_string()]);
        assert_eq!(o.attempts.len(), 2);
        assert_eq!(o.iteration_count, 2);
    }

    #[test]
    fn test_continuation_context() {
        let mut o = objective(5);
        o.record_attempt("direct-answer", vec![], 0.3, vec!["timeout".into()], vec![]);
        o.record_attempt("direct-answer", vec![], 0.4, vec![], vec![]);
        o.record_attempt("read-files", vec![], 0.7, vec![], vec!["README is large".into()]);
        o.update_satisfaction(0.7, vec!["missing examples".into()]);
        o.set_suggestions(vec!["add an example".into()]);
        let ctx = o.get_continuation_context();
        assert_eq!(ctx.failed_approaches, vec!["direct-answer".to_string()]);
        assert_eq!(ctx.identified_problems, vec!["missing examples".to_string()]);
        assert_eq!(ctx.learned_limitations, vec!["README is large".to_string()]);
        assert_eq!(ctx.suggested_improvements, vec!["add an example".to_string()]);
    }

    #[test]
    fn test_reset_for_retry_preserves_learning() {
        let mut o = objective(1);
        o.record_attempt("a", vec![], 0.2, vec![], vec!["lesson".into()]);
        assert!(o.is_exhausted());
        o.reset_for_retry(true, 2);
        assert!(o.should_continue());
        assert_eq!(o.max_iterations, 3);
        assert_eq!(o.learned_constraints.len(), 1);
        o.reset_for_retry(false, 2);
        assert!(o.learned_constraints.is_empty());
        assert_eq!(o.iteration_count, 1);
    }

    #[test]
    fn test_statistics() {
        let mut tracker = ObjectiveTracker::new(ObjectiveSection::default());
        assert_eq!(tracker.statistics().count, 0);
        let mut a = tracker.create("one", 3);
        a.update_satisfaction(0.9, vec![]);
        a.record_attempt("s", vec![], 0.9, vec![], vec![]);
        tracker.archive(&a, true);
        let mut b = tracker.create("two", 3);
        b.update_satisfaction(0.3, vec![]);
        b.record_attempt("s", vec![], 0.3, vec![], vec![]);
        b.record_attempt("s", vec![], 0.3, vec![], vec![]);
        tracker.archive(&b, false);
        let stats = tracker.statistics();
        assert_eq!(stats.count, 2);
        assert!((stats.success_rate - 0.5).abs() < 1e-9);
        assert!((stats.mean_satisfaction - 0.6).abs() < 1e-9);
        assert!((stats.mean_iterations - 1.5).abs() < 1e-9);
    }
}
