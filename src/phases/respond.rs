//! Respond 阶段：生成面向用户的回答，并用 final_report 模板渲染报告
//!
//! 文本生成失败时用已收集的材料拼一个确定性的摘要，保证总有回答。

use serde_json::Value;

use crate::capability::normalize::normalize_value;
use crate::capability::{phase_system, render_data};
use crate::core::{ApprovalStatus, Phase, RespondResult, Session, TerminalReason};
use crate::objective::Objective;
use crate::phases::{bullet_list, clip, gather, PhaseSession};

const RESPOND_SYSTEM: &str = "You are the response step of a task agent.
Write the final answer for the user in plain prose or markdown.
Ground it in the gathered material and tool results; say clearly what could not be done.";

fn build_prompt(session: &Session, objective: &Objective) -> String {
    let mut prompt = format!("Request:\n{}\n", session.request.trim());
    if let Some(g) = session.context.gather() {
        if !g.resources.is_empty() {
            prompt.push_str(&format!("\nMaterial:\n{}\n", gather::excerpt(g, 1500)));
        }
    }
    if let Some(exec) = session.context.exec() {
        let results: Vec<String> = exec
            .tool_outcomes
            .iter()
            .filter(|o| o.ok)
            .map(|o| format!("{}: {}", o.tool, clip(&o.output, 800)))
            .collect();
        if !results.is_empty() {
            prompt.push_str(&format!("\nTool results:\n{}\n", bullet_list(&results)));
        }
    }
    if !objective.missing_aspects.is_empty() {
        prompt.push_str(&format!(
            "\nAddress these gaps if possible:\n{}\n",
            bullet_list(&objective.missing_aspects)
        ));
    }
    if let Some(prev) = session.context.respond().filter(|r| r.too_short) {
        prompt.push_str(&format!(
            "\nThe previous answer was too short:\n{}\nGive a fuller answer.\n",
            clip(&prev.answer, 400)
        ));
    }
    prompt
}

/// 模型有时把回答包在 {"answer": ...} 里
fn extract_answer(raw: &str) -> String {
    if let Ok(Value::Object(obj)) = normalize_value(raw) {
        for key in ["answer", "response", "content"] {
            if let Some(Value::String(s)) = obj.get(key) {
                return s.trim().to_string();
            }
        }
    }
    raw.trim().to_string()
}

/// 不依赖文本生成的确定性摘要
pub(crate) fn fallback_answer(session: &Session) -> String {
    let mut parts: Vec<String> = Vec::new();
    let summary = session
        .context
        .plan()
        .map(|p| p.requirement_summary.clone())
        .unwrap_or_else(|| session.request.trim().to_string());
    parts.push(format!("Request: {summary}"));
    if let Some(g) = session.context.gather() {
        if !g.resources.is_empty() {
            let ids: Vec<String> = g.resources.iter().map(|r| r.id.clone()).collect();
            parts.push(format!("Consulted: {}", ids.join(", ")));
        }
        if !g.gaps.is_empty() {
            parts.push(format!("Unresolved:\n{}", bullet_list(&g.gaps)));
        }
    }
    if let Some(exec) = session.context.exec() {
        let done: Vec<String> = exec
            .tool_outcomes
            .iter()
            .map(|o| format!("{} ({})", o.tool, if o.ok { "ok" } else { "not completed" }))
            .collect();
        if !done.is_empty() {
            parts.push(format!("Actions:\n{}", bullet_list(&done)));
        }
    }
    parts.push("The answer could not be generated; this is a summary of the work done.".to_string());
    parts.join("\n\n")
}

fn approval_notes(session: &Session) -> Vec<String> {
    session
        .context
        .exec()
        .map(|exec| {
            exec.tool_outcomes
                .iter()
                .filter(|o| o.approval == ApprovalStatus::ApprovalRequired)
                .map(|o| format!("awaiting approval: {} ({} risk)", o.tool, o.risk.as_str()))
                .collect()
        })
        .unwrap_or_default()
}

/// 按当前会话状态渲染 final_report；outcome 为 None 表示仍在进行
pub fn render_report(
    ps: &PhaseSession<'_>,
    session: &Session,
    objective: &Objective,
    answer: &str,
    outcome: Option<&TerminalReason>,
) -> String {
    let completed = matches!(
        outcome,
        Some(TerminalReason::Completed) | Some(TerminalReason::PartialAccepted)
    );
    let mut notes = approval_notes(session);
    if let Some(reason) = outcome.filter(|_| !completed) {
        notes.push(format!("stopped: {}", reason));
        notes.extend(objective.missing_aspects.iter().map(|m| format!("missing: {m}")));
    }
    if outcome == Some(&TerminalReason::PartialAccepted) {
        notes.push("partial result accepted by the user".to_string());
    }
    let title = if outcome.is_some() && !completed {
        "Incomplete result"
    } else {
        "Result"
    };
    let data = render_data([
        ("title", title.to_string()),
        ("answer", answer.to_string()),
        ("tasks", session.tasks.render()),
        ("notes", bullet_list(&notes)),
        (
            "outcome",
            outcome.map(|o| o.to_string()).unwrap_or_else(|| "in_progress".to_string()),
        ),
        ("loop_count", session.loop_count.to_string()),
        ("max_loops", session.budget.max_loops.to_string()),
        ("satisfaction", format!("{:.2}", objective.current_satisfaction)),
    ]);
    ps.components.renderer.render("final_report", &data)
}

pub async fn run(ps: &PhaseSession<'_>, session: &Session, objective: &Objective) -> RespondResult {
    let cfg = &ps.components.config;
    let system = phase_system(Phase::Respond.as_str(), RESPOND_SYSTEM);
    let prompt = build_prompt(session, objective);
    // 只带之前的对话轮次，首条用户消息已在提示词里
    let prior = session.history.messages().get(1..).unwrap_or_default();
    let history = &prior[prior.len().saturating_sub(cfg.app.max_history_messages)..];

    let (answer, fallback) = match ps
        .components
        .text
        .generate_with_history(history, &prompt, Some(&system))
        .await
    {
        Ok(raw) if !raw.trim().is_empty() => (extract_answer(&raw), false),
        Ok(_) => {
            ps.fallback(Phase::Respond, "empty answer");
            (fallback_answer(session), true)
        }
        Err(e) => {
            ps.fallback(Phase::Respond, format!("answer generation failed: {e}"));
            (fallback_answer(session), true)
        }
    };

    let too_short = answer.chars().count() < cfg.orchestrator.min_answer_chars;
    let report = render_report(ps, session, objective, &answer, None);
    RespondResult {
        answer,
        report,
        too_short,
        fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        ExecResult, GatherResult, IterationBudget, PhaseResult, PlanResult, ToolOutcome, Vitals,
    };
    use crate::objective::TaskProfile;
    use crate::tools::RiskLevel;

    fn session() -> Session {
        Session::new(
            "s",
            "summarize the notes",
            TaskProfile::Analysis,
            IterationBudget {
                min_loops: 1,
                max_loops: 5,
            },
            Vitals::default(),
        )
    }

    #[test]
    fn test_extract_answer() {
        assert_eq!(extract_answer(r#"{"answer": " hi there "}"#), "hi there");
        assert_eq!(extract_answer("plain text"), "plain text");
    }

    #[test]
    fn test_fallback_answer_lists_work() {
        let mut s = session();
        s.context.insert(PhaseResult::Plan(PlanResult::fallback("summarize the notes")));
        s.context.insert(PhaseResult::Gather(GatherResult {
            resources: vec![crate::core::FetchedResource {
                id: "notes.txt".into(),
                content: "x".into(),
                truncated: false,
                size: 1,
            }],
            gaps: vec!["not found: todo.md".into()],
            strategy: "search".into(),
        }));
        let text = fallback_answer(&s);
        assert!(text.contains("Consulted: notes.txt"));
        assert!(text.contains("- not found: todo.md"));
    }

    #[test]
    fn test_approval_notes() {
        let mut s = session();
        let mut exec = ExecResult::synthetic_success("x");
        exec.tool_outcomes.push(ToolOutcome {
            tool: "write_file".into(),
            args: Value::Null,
            risk: RiskLevel::High,
            approval: ApprovalStatus::ApprovalRequired,
            ok: false,
            output: String::new(),
        });
        s.context.insert(PhaseResult::Execute(exec));
        assert_eq!(
            approval_notes(&s),
            vec!["awaiting approval: write_file (high risk)".to_string()]
        );
    }
}
