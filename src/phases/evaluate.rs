//! Evaluate 阶段：给当前进展打满意度分，列出缺失项与建议，推荐下一步
//!
//! 分数缺失时先从自由文本里扫描；仍拿不到分数按评分失败处理，使用保守兜底分。

use serde::Deserialize;

use crate::capability::normalize::{lenient_score, lenient_string, one_or_many, scan_bullets, scan_field, scan_score};
use crate::capability::phase_system;
use crate::config::ObjectiveSection;
use crate::core::{AgentError, CompletionStatus, EvalResult, NextAction, Phase, RecoveryAction, Session};
use crate::phases::{bullet_list, clip, gather, generate_structured, PhaseSession};

const EVALUATE_SYSTEM: &str = "You are the evaluation step of a task agent.
Judge how well the work so far satisfies the user's request.
Reply with one JSON object:
{\"score\": number 0-1, \"completion\": \"complete\"|\"partial\"|\"incomplete\",
 \"missing_aspects\": [string], \"suggestions\": [string],
 \"recommended_action\": \"plan\"|\"gather\"|\"execute\"|\"respond\"|\"complete\",
 \"reasoning\": string, \"lessons\": [string]}";

#[derive(Debug, Default, Deserialize)]
struct EvalDraft {
    #[serde(
        default,
        alias = "satisfaction",
        alias = "quality_score",
        alias = "quality",
        deserialize_with = "lenient_score"
    )]
    score: Option<f64>,
    #[serde(default, alias = "missing", deserialize_with = "one_or_many")]
    missing_aspects: Vec<String>,
    #[serde(
        default,
        alias = "next_action",
        alias = "action",
        deserialize_with = "lenient_string"
    )]
    recommended_action: String,
    #[serde(default, deserialize_with = "lenient_string")]
    reasoning: String,
    #[serde(default, alias = "improvements", deserialize_with = "one_or_many")]
    suggestions: Vec<String>,
    #[serde(default, alias = "status", deserialize_with = "lenient_string")]
    completion: String,
    #[serde(default, alias = "lessons_learned", deserialize_with = "one_or_many")]
    lessons: Vec<String>,
}

/// 评估结果与本轮学到的约束
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub result: EvalResult,
    pub lessons: Vec<String>,
}

fn derive_completion(score: f64, target: f64) -> CompletionStatus {
    if score >= target {
        CompletionStatus::Complete
    } else if score >= 0.5 {
        CompletionStatus::Partial
    } else {
        CompletionStatus::Incomplete
    }
}

fn default_action(score: f64, target: f64) -> NextAction {
    if score >= target {
        NextAction::Respond
    } else {
        NextAction::Plan
    }
}

fn from_draft(draft: EvalDraft, score: f64, cfg: &ObjectiveSection) -> Evaluation {
    let score = score.clamp(0.0, 1.0);
    let completion = if draft.completion.trim().is_empty() {
        derive_completion(score, cfg.target_satisfaction)
    } else {
        CompletionStatus::parse(&draft.completion)
    };
    let recommended_action = NextAction::parse(&draft.recommended_action)
        .unwrap_or_else(|| default_action(score, cfg.target_satisfaction));
    Evaluation {
        result: EvalResult {
            quality_score: score,
            completion,
            recommended_action,
            reasoning: draft.reasoning,
            missing_aspects: draft.missing_aspects,
            suggestions: draft.suggestions,
            scoring_failed: false,
        },
        lessons: draft.lessons,
    }
}

/// 评分器失败时的保守结果：尚无回答先去 Respond，否则重新规划
fn scoring_failure(reason: &str, has_answer: bool, cfg: &ObjectiveSection, raw: Option<&str>) -> Evaluation {
    let missing = raw.map(scan_bullets).unwrap_or_default();
    let mut missing_aspects = vec![format!("evaluation unavailable: {reason}")];
    missing_aspects.extend(missing);
    Evaluation {
        result: EvalResult {
            quality_score: cfg.scoring_failure_score,
            completion: CompletionStatus::Incomplete,
            recommended_action: if has_answer {
                NextAction::Plan
            } else {
                NextAction::Respond
            },
            reasoning: "scoring failed; conservative score applied".to_string(),
            missing_aspects,
            suggestions: Vec::new(),
            scoring_failed: true,
        },
        lessons: Vec::new(),
    }
}

fn build_prompt(session: &Session) -> String {
    let mut prompt = format!("Request:\n{}\n", session.request.trim());
    if let Some(plan) = session.context.plan() {
        prompt.push_str(&format!(
            "\nPlan ({}):\n{}\n",
            plan.strategy,
            bullet_list(&plan.steps)
        ));
    }
    if let Some(g) = session.context.gather() {
        if !g.resources.is_empty() {
            prompt.push_str(&format!("\nGathered material:\n{}\n", gather::excerpt(g, 600)));
        }
        if !g.gaps.is_empty() {
            prompt.push_str(&format!("\nUnresolved gaps:\n{}\n", bullet_list(&g.gaps)));
        }
    }
    if let Some(exec) = session.context.current_exec() {
        let lines: Vec<String> = exec
            .tool_outcomes
            .iter()
            .map(|o| format!("{} ({}): {}", o.tool, if o.ok { "ok" } else { "failed" }, clip(&o.output, 300)))
            .collect();
        if !lines.is_empty() {
            prompt.push_str(&format!("\nTool results:\n{}\n", bullet_list(&lines)));
        }
        if !exec.errors.is_empty() {
            prompt.push_str(&format!("\nErrors:\n{}\n", bullet_list(&exec.errors)));
        }
    }
    if let Some(r) = session.context.respond() {
        prompt.push_str(&format!("\nCurrent answer:\n{}\n", clip(&r.answer, 2000)));
        if r.too_short {
            prompt.push_str("(the answer was judged too short)\n");
        }
    }
    if !session.tasks.is_empty() {
        prompt.push_str(&format!("\nTasks:\n{}\n", session.tasks.render()));
    }
    prompt
}

pub async fn run(ps: &PhaseSession<'_>, session: &Session) -> Evaluation {
    let cfg = &ps.components.config.objective;
    let system = phase_system(Phase::Evaluate.as_str(), EVALUATE_SYSTEM);
    let prompt = build_prompt(session);
    let has_answer = session.context.respond().is_some();

    let reply = generate_structured::<EvalDraft>(ps, Phase::Evaluate, &system, &prompt).await;
    let scanned = reply.raw.as_deref().and_then(scan_score);
    match (reply.parsed, scanned) {
        (Some(draft), scanned) => match draft.score.or(scanned) {
            Some(score) => from_draft(draft, score, cfg),
            None => scored_fallback(ps, "no score in evaluation", has_answer, cfg, reply.raw.as_deref()),
        },
        (None, Some(score)) => {
            ps.fallback(Phase::Evaluate, "score recovered from free text");
            let raw = reply.raw.as_deref().unwrap_or_default();
            let draft = EvalDraft {
                missing_aspects: scan_bullets(raw),
                recommended_action: scan_field(raw, "recommended_action")
                    .or_else(|| scan_field(raw, "next action"))
                    .unwrap_or_default(),
                ..Default::default()
            };
            from_draft(draft, score, cfg)
        }
        (None, None) => {
            let reason = reply
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unparseable evaluation".to_string());
            scored_fallback(ps, &reason, has_answer, cfg, reply.raw.as_deref())
        }
    }
}

fn scored_fallback(
    ps: &PhaseSession<'_>,
    reason: &str,
    has_answer: bool,
    cfg: &ObjectiveSection,
    raw: Option<&str>,
) -> Evaluation {
    let err = AgentError::ScoringFailure(reason.to_string());
    if let RecoveryAction::UseFallback(why) = ps.components.recovery.handle(&err, 0) {
        ps.fallback(Phase::Evaluate, why);
    }
    scoring_failure(reason, has_answer, cfg, raw)
}
