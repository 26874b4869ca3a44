//! Plan 阶段：把请求拆成步骤、所需能力、目标资源与信息需求
//!
//! 重新规划时带上续接上下文（失败的方法、缺失项、建议），而不是盲目重试。

use serde::Deserialize;

use crate::capability::normalize::{lenient_score, lenient_string, one_or_many, scan_bullets};
use crate::capability::phase_system;
use crate::core::{Complexity, Phase, PlanResult, Session};
use crate::objective::{ContinuationContext, Objective};
use crate::phases::{bullet_list, generate_structured, PhaseSession};

const PLAN_SYSTEM: &str = "You are the planning step of a task agent working inside a sandboxed workspace.
Break the user's request into concrete steps.
Reply with one JSON object:
{\"requirement_summary\": string, \"steps\": [string], \"required_capabilities\": [tool name],
 \"target_resources\": [workspace path], \"information_needs\": [question],
 \"complexity\": \"low\"|\"medium\"|\"high\", \"confidence\": number 0-1, \"strategy\": string}
Use target_resources for files you already know you need and information_needs for facts to look up.
Leave required_capabilities empty when the request can be answered directly.";

#[derive(Debug, Default, Deserialize)]
struct PlanDraft {
    #[serde(default, alias = "summary", alias = "requirement", deserialize_with = "lenient_string")]
    requirement_summary: String,
    #[serde(default, alias = "plan", deserialize_with = "one_or_many")]
    steps: Vec<String>,
    #[serde(default, alias = "capabilities", alias = "tools", deserialize_with = "one_or_many")]
    required_capabilities: Vec<String>,
    #[serde(default, alias = "resources", alias = "files", deserialize_with = "one_or_many")]
    target_resources: Vec<String>,
    #[serde(default, alias = "needs", alias = "questions", deserialize_with = "one_or_many")]
    information_needs: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    complexity: String,
    #[serde(default, deserialize_with = "lenient_score")]
    confidence: Option<f64>,
    #[serde(default, alias = "approach", deserialize_with = "lenient_string")]
    strategy: String,
}

impl PlanDraft {
    fn into_result(self, request: &str) -> PlanResult {
        let summary = if self.requirement_summary.is_empty() {
            request.trim().to_string()
        } else {
            self.requirement_summary
        };
        PlanResult {
            requirement_summary: summary,
            steps: self.steps,
            required_capabilities: self
                .required_capabilities
                .into_iter()
                .map(|c| c.trim().to_lowercase())
                .filter(|c| !c.is_empty())
                .collect(),
            target_resources: self.target_resources,
            information_needs: self.information_needs,
            complexity: Complexity::parse(&self.complexity),
            confidence: self.confidence.unwrap_or(0.5),
            strategy: if self.strategy.is_empty() {
                "planned".to_string()
            } else {
                self.strategy
            },
            fallback: false,
        }
    }
}

fn build_prompt(request: &str, continuation: Option<&ContinuationContext>, objective: &Objective) -> String {
    let mut prompt = format!("Request:\n{}\n", request.trim());
    if let Some(ctx) = continuation.filter(|c| !c.is_empty()) {
        prompt.push_str("\nThis is a replan. Do not repeat what already failed.\n");
        if !ctx.failed_approaches.is_empty() {
            prompt.push_str(&format!("\nFailed approaches:\n{}\n", bullet_list(&ctx.failed_approaches)));
        }
        if !ctx.identified_problems.is_empty() {
            prompt.push_str(&format!("\nStill missing:\n{}\n", bullet_list(&ctx.identified_problems)));
        }
        if !ctx.suggested_improvements.is_empty() {
            prompt.push_str(&format!(
                "\nSuggested improvements:\n{}\n",
                bullet_list(&ctx.suggested_improvements)
            ));
        }
    }
    if !objective.learned_constraints.is_empty() {
        prompt.push_str(&format!(
            "\nConstraints learned so far:\n{}\n",
            bullet_list(&objective.learned_constraints)
        ));
    }
    prompt
}

/// 无法解析 JSON 时从自由文本里尽量拼出计划；找不到步骤则返回 None
fn heuristic_plan(raw: &str, request: &str, tool_names: &[String]) -> Option<PlanResult> {
    let steps = scan_bullets(raw);
    if steps.is_empty() {
        return None;
    }
    let lower = raw.to_lowercase();
    let required_capabilities = tool_names
        .iter()
        .filter(|t| lower.contains(t.as_str()))
        .cloned()
        .collect();
    Some(PlanResult {
        requirement_summary: request.trim().to_string(),
        steps,
        required_capabilities,
        target_resources: Vec::new(),
        information_needs: vec![request.trim().to_string()],
        complexity: Complexity::Medium,
        confidence: 0.4,
        strategy: "heuristic-plan".to_string(),
        fallback: true,
    })
}

pub async fn run(ps: &PhaseSession<'_>, session: &mut Session, objective: &Objective) -> PlanResult {
    let tools = ps.components.executor.registry().describe();
    let system = phase_system(
        Phase::Plan.as_str(),
        &format!("{PLAN_SYSTEM}\n\nAvailable tools:\n{tools}"),
    );
    let continuation = session.continuation.take();
    let prompt = build_prompt(&session.request, continuation.as_ref(), objective);

    let reply = generate_structured::<PlanDraft>(ps, Phase::Plan, &system, &prompt).await;
    match reply.parsed {
        Some(draft) => draft.into_result(&session.request),
        None => {
            let tool_names = ps.components.executor.tool_names();
            reply
                .raw
                .as_deref()
                .and_then(|raw| heuristic_plan(raw, &session.request, &tool_names))
                .unwrap_or_else(|| PlanResult::fallback(&session.request))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::normalize::normalize;
    use crate::config::ObjectiveSection;

    #[test]
    fn test_draft_tolerates_scalars() {
        let draft: PlanDraft = normalize(
            r#"{"summary": "read docs", "steps": "open README", "tools": "READ_FILE",
                "files": "README.md", "confidence": "90%"}"#,
        )
        .unwrap();
        let plan = draft.into_result("req");
        assert_eq!(plan.steps, vec!["open README".to_string()]);
        assert_eq!(plan.required_capabilities, vec!["read_file".to_string()]);
        assert_eq!(plan.target_resources, vec!["README.md".to_string()]);
        assert!((plan.confidence - 0.9).abs() < 1e-9);
        assert!(!plan.fallback);
    }

    #[test]
    fn test_empty_object_answers_directly() {
        let draft: PlanDraft = normalize("{}").unwrap();
        let plan = draft.into_result("hello");
        assert_eq!(plan.requirement_summary, "hello");
        assert!(!plan.needs_resources());
        assert!(plan.required_capabilities.is_empty());
    }

    #[test]
    fn test_heuristic_plan() {
        let tools = vec!["read_file".to_string(), "write_file".to_string()];
        let plan = heuristic_plan("I will:\n- read_file the config\n- summarize", "req", &tools).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.required_capabilities, vec!["read_file".to_string()]);
        assert!(plan.fallback);
        assert!(heuristic_plan("no structure", "req", &tools).is_none());
    }

    #[test]
    fn test_replan_prompt_carries_context() {
        let mut objective = Objective::new("req", 3, &ObjectiveSection::default());
        objective.add_constraint("README.md is not readable");
        let ctx = ContinuationContext {
            failed_approaches: vec!["direct-answer".into()],
            identified_problems: vec!["no sources".into()],
            ..Default::default()
        };
        let prompt = build_prompt("req", Some(&ctx), &objective);
        assert!(prompt.contains("This is a replan"));
        assert!(prompt.contains("- direct-answer"));
        assert!(prompt.contains("- no sources"));
        assert!(prompt.contains("README.md is not readable"));
        assert!(!build_prompt("req", None, &objective).contains("replan"));
    }
}
