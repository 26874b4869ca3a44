//! Execute 阶段：让模型按计划给出工具调用，按风险等级决定自动执行或等待批准
//!
//! 风险不超过 auto_approve_risk 的调用直接执行；更高风险的调用记为 ApprovalRequired 并跳过。
//! 工具失败写入 errors，由 Governor 通过 unresolved_errors 感知。

use serde_json::Value;

use crate::capability::normalize::normalize_value;
use crate::capability::phase_system;
use crate::core::{
    ApprovalStatus, ExecResult, GatherResult, Phase, PlanResult, Session, TaskStatus, ToolOutcome,
};
use crate::phases::{bullet_list, clip, gather, PhaseEvent, PhaseSession};
use crate::tools::{schema::tool_call_schema_json, RiskLevel};

const EXECUTE_SYSTEM: &str = "You are the execution step of a task agent.
Turn the plan into tool calls. Only use the listed tools.
Reply with JSON only, matching this schema:";

/// 单个待执行的工具调用
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub tool: String,
    pub args: Value,
}

fn call_from_value(v: &Value) -> Option<ToolCall> {
    let obj = v.as_object()?;
    let tool = obj
        .get("tool")
        .or_else(|| obj.get("name"))
        .and_then(|t| t.as_str())?
        .trim()
        .to_string();
    if tool.is_empty() {
        return None;
    }
    let args = obj
        .get("args")
        .or_else(|| obj.get("arguments"))
        .or_else(|| obj.get("parameters"))
        .cloned()
        .unwrap_or(Value::Object(Default::default()));
    // 有的模型把参数写成 JSON 字符串
    let args = match args {
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        other => other,
    };
    Some(ToolCall { tool, args })
}

/// 解析模型输出中的工具调用：{"tool_calls": [...]}、数组或单个 {tool, args}
pub fn parse_tool_calls(raw: &str) -> Vec<ToolCall> {
    let value = match normalize_value(raw) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };
    let list = match &value {
        Value::Object(obj) => match obj.get("tool_calls").or_else(|| obj.get("calls")) {
            Some(Value::Array(items)) => items.clone(),
            Some(single @ Value::Object(_)) => vec![single.clone()],
            _ => vec![value.clone()],
        },
        Value::Array(items) => items.clone(),
        _ => Vec::new(),
    };
    list.iter().filter_map(call_from_value).collect()
}

fn build_prompt(plan: &PlanResult, gather: Option<&GatherResult>) -> String {
    let mut prompt = format!(
        "Goal: {}\n\nSteps:\n{}\n\nCapabilities needed: {}\n",
        plan.requirement_summary,
        bullet_list(&plan.steps),
        plan.required_capabilities.join(", ")
    );
    if let Some(g) = gather.filter(|g| !g.resources.is_empty()) {
        prompt.push_str(&format!("\nGathered material:\n{}\n", gather::excerpt(g, 800)));
    }
    prompt
}

/// 执行一批工具调用（不含模型调用，便于单独测试）
pub async fn run_calls(
    ps: &PhaseSession<'_>,
    session: &mut Session,
    calls: Vec<ToolCall>,
) -> ExecResult {
    let executor = &ps.components.executor;
    let auto_limit = ps.components.config.orchestrator.auto_approve_risk;

    let mut outcomes: Vec<ToolOutcome> = Vec::new();
    let mut errors: Vec<String> = Vec::new();
    let mut risk_level = RiskLevel::Low;
    let mut needed_approval = false;
    let mut executed = 0usize;

    for call in calls {
        let risk = executor.risk_of(&call.tool);
        risk_level = risk_level.max(risk);
        if risk > auto_limit {
            needed_approval = true;
            tracing::warn!(tool = %call.tool, risk = risk.as_str(), "tool call held for approval");
            let outcome = ToolOutcome {
                tool: call.tool,
                args: call.args,
                risk,
                approval: ApprovalStatus::ApprovalRequired,
                ok: false,
                output: format!("not executed: {} risk exceeds auto-approval", risk.as_str()),
            };
            send_outcome(ps, &outcome);
            outcomes.push(outcome);
            session.tasks.mark_next(TaskStatus::Skipped);
            continue;
        }

        executed += 1;
        let (ok, output) = match executor.execute(&call.tool, call.args.clone()).await {
            Ok(out) => (true, out),
            Err(e) => {
                errors.push(format!("{}: {}", call.tool, e));
                (false, e.to_string())
            }
        };
        session
            .tasks
            .mark_next(if ok { TaskStatus::Done } else { TaskStatus::Failed });
        let outcome = ToolOutcome {
            tool: call.tool,
            args: call.args,
            risk,
            approval: ApprovalStatus::AutoApproved,
            ok,
            output,
        };
        send_outcome(ps, &outcome);
        outcomes.push(outcome);
    }

    let approval = if needed_approval {
        ApprovalStatus::ApprovalRequired
    } else if executed > 0 {
        ApprovalStatus::AutoApproved
    } else {
        ApprovalStatus::NotRequired
    };
    let success = errors.is_empty() && (executed > 0 || outcomes.is_empty());

    ExecResult {
        success,
        tool_outcomes: outcomes,
        risk_level,
        approval,
        errors,
        synthetic: false,
    }
}

fn send_outcome(ps: &PhaseSession<'_>, o: &ToolOutcome) {
    ps.send(PhaseEvent::ToolOutcome {
        tool: o.tool.clone(),
        ok: o.ok,
        approval: o.approval,
        preview: clip(&o.output, 120),
    });
}

pub async fn run(ps: &PhaseSession<'_>, session: &mut Session) -> ExecResult {
    let plan = match session.context.plan() {
        Some(p) => p.clone(),
        None => PlanResult::fallback(&session.request),
    };
    if plan.required_capabilities.is_empty() {
        return ExecResult {
            success: true,
            tool_outcomes: Vec::new(),
            risk_level: RiskLevel::Low,
            approval: ApprovalStatus::NotRequired,
            errors: Vec::new(),
            synthetic: false,
        };
    }

    let system = phase_system(
        Phase::Execute.as_str(),
        &format!(
            "{EXECUTE_SYSTEM}\n{}\n\nAvailable tools:\n{}",
            tool_call_schema_json(),
            ps.components.executor.registry().describe()
        ),
    );
    let prompt = build_prompt(&plan, session.context.gather());

    let calls = match ps.components.text.generate(&prompt, Some(&system)).await {
        Ok(raw) => parse_tool_calls(&raw),
        Err(e) => {
            ps.fallback(Phase::Execute, format!("tool call generation failed: {e}"));
            return ExecResult {
                success: false,
                tool_outcomes: Vec::new(),
                risk_level: RiskLevel::Low,
                approval: ApprovalStatus::NotRequired,
                errors: vec![e.to_string()],
                synthetic: false,
            };
        }
    };
    if calls.is_empty() {
        ps.fallback(Phase::Execute, "no executable tool calls could be parsed");
        return ExecResult {
            success: false,
            tool_outcomes: Vec::new(),
            risk_level: RiskLevel::Low,
            approval: ApprovalStatus::NotRequired,
            errors: vec!["no executable tool calls could be parsed".to_string()],
            synthetic: false,
        };
    }

    run_calls(ps, session, calls).await
}
