//! 状态机驱动：Plan -> Gather -> Execute -> Evaluate -> Respond，直到 Done / Escalated / TimedOut
//!
//! 每个阶段结束后：写入结果、更新体征、按 router 转移、发布状态投影、检查不变量。
//! 步数只在 Evaluate 中随 Governor 建议一起递增。

use tracing::Instrument;

use crate::capability::render_data;
use crate::core::{
    AgentError, ExecResult, GovernorInput, Intervention, Phase, PhaseResult, PlanResult, Session,
    SessionSnapshot, TerminalReason, VitalSignal,
};
use crate::memory::Message;
use crate::objective::Objective;
use crate::phases::router::{self, EvaluateRouting, GatherRoute, RespondRouting, Transition};
use crate::phases::{
    bullet_list, clip, evaluate, execute, gather, plan, respond, HumanChoice, PhaseEvent, PhaseSession,
    SituationReport,
};

/// 会话结束时交还调用方的全部状态
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub session: Session,
    pub objective: Objective,
    /// 按终止原因渲染的 final_report
    pub report: String,
    pub reason: TerminalReason,
}

impl SessionOutcome {
    pub fn phase(&self) -> Phase {
        self.session.phase
    }

    pub fn answer(&self) -> Option<&str> {
        self.session.context.respond().map(|r| r.answer.as_str())
    }
}

/// 运行会话直到终态
pub async fn run_session(
    ps: &PhaseSession<'_>,
    mut session: Session,
    mut objective: Objective,
) -> Result<SessionOutcome, AgentError> {
    let span = tracing::info_span!("session", session_id = %session.id, profile = %session.profile);
    async {
        tracing::info!(
            max_loops = session.budget.max_loops,
            phase = %session.phase,
            "session started"
        );
        drive(ps, &mut session, &mut objective).await?;
        finalize(ps, session, objective)
    }
    .instrument(span)
    .await
}

/// 从快照继续；快照已在终态时直接重新生成报告
pub async fn resume_session(
    ps: &PhaseSession<'_>,
    snapshot: SessionSnapshot,
) -> Result<SessionOutcome, AgentError> {
    let SessionSnapshot {
        session, objective, ..
    } = snapshot;
    session.check_invariants()?;
    if session.is_terminal() {
        return finalize(ps, session, objective);
    }
    tracing::info!(session_id = %session.id, phase = %session.phase, loop_count = session.loop_count, "resuming session");
    run_session(ps, session, objective).await
}

async fn drive(
    ps: &PhaseSession<'_>,
    session: &mut Session,
    objective: &mut Objective,
) -> Result<(), AgentError> {
    while !session.is_terminal() {
        if ps.supervisor.checkpoint().is_err() {
            tracing::info!("session cancelled at phase boundary");
            session.finish(TerminalReason::Cancelled);
            break;
        }
        session.phase_visits += 1;
        let visit_limit = session.visit_limit(ps.components.config.orchestrator.max_gather_replans);
        if session.phase_visits > visit_limit {
            return Err(violation(format!(
                "phase visits {} exceed limit {}",
                session.phase_visits, visit_limit
            )));
        }

        let phase = session.phase;
        ps.send(PhaseEvent::PhaseStarted {
            phase,
            loop_count: session.loop_count,
        });
        let transition = match phase {
            Phase::Plan => step_plan(ps, session, objective).await,
            Phase::Gather => step_gather(ps, session, objective).await,
            Phase::Execute => step_execute(ps, session, objective).await,
            Phase::Evaluate => step_evaluate(ps, session, objective).await?,
            Phase::Respond => step_respond(ps, session, objective).await,
            Phase::Done | Phase::Escalated | Phase::TimedOut => break,
        };
        if !session.context.contains(phase) {
            return Err(violation(format!("phase {phase} finished without a result")));
        }

        let transition = match transition {
            Transition::Consult => consult(ps, session, objective).await,
            other => other,
        };
        match transition {
            Transition::To(next) => {
                ps.send(PhaseEvent::PhaseFinished {
                    phase,
                    next,
                    summary: summarize(session, phase),
                });
                tracing::debug!(from = %phase, to = %next, loop_count = session.loop_count, "transition");
                session.phase = next;
            }
            Transition::Finish(reason) => {
                tracing::info!(from = %phase, reason = %reason, "session reached terminal state");
                session.finish(reason);
            }
            Transition::Consult => {
                return Err(violation("consult produced another consult".to_string()));
            }
        }

        publish_status(ps, session, objective, false);
        session.check_invariants().map_err(|e| violation(e.to_string()))?;
    }
    Ok(())
}

fn violation(detail: String) -> AgentError {
    tracing::error!(detail = %detail, "state machine invariant violated");
    AgentError::InvariantViolation(detail)
}

fn finalize(
    ps: &PhaseSession<'_>,
    session: Session,
    objective: Objective,
) -> Result<SessionOutcome, AgentError> {
    let reason = session
        .outcome
        .clone()
        .ok_or_else(|| violation("terminal session without outcome".to_string()))?;
    let answer = match session.context.respond() {
        Some(r) => r.answer.clone(),
        None => respond::fallback_answer(&session),
    };
    let report = respond::render_report(ps, &session, &objective, &answer, Some(&reason));
    ps.send(PhaseEvent::Terminal {
        phase: session.phase,
        reason: reason.clone(),
    });
    publish_status(ps, &session, &objective, false);
    tracing::info!(
        phase = %session.phase,
        reason = %reason,
        loop_count = session.loop_count,
        satisfaction = objective.current_satisfaction,
        "session finished"
    );
    Ok(SessionOutcome {
        session,
        objective,
        report,
        reason,
    })
}

fn publish_status(ps: &PhaseSession<'_>, session: &Session, objective: &Objective, awaiting: bool) {
    if let Some(tx) = ps.status_tx {
        tx.send_replace(session.status(objective.current_satisfaction, awaiting));
    }
}

fn observe(ps: &PhaseSession<'_>, session: &mut Session, signal: VitalSignal) {
    session.vitals.observe(signal, &ps.components.config.vitals);
    ps.send(PhaseEvent::VitalsUpdated {
        vitals: session.vitals,
    });
}

fn current_plan(session: &Session) -> PlanResult {
    session
        .context
        .plan()
        .cloned()
        .unwrap_or_else(|| PlanResult::fallback(&session.request))
}

async fn step_plan(ps: &PhaseSession<'_>, session: &mut Session, objective: &mut Objective) -> Transition {
    let plan = plan::run(ps, session, objective).await;
    session.tasks = session.tasks.replan(&plan.steps);
    observe(ps, session, VitalSignal::Plan {
        confidence: plan.confidence,
    });
    objective.add_result("plan", format!("{}: {}", plan.strategy, plan.requirement_summary));
    let next = router::after_plan(&plan);
    session.context.insert(PhaseResult::Plan(plan));
    next
}

async fn step_gather(ps: &PhaseSession<'_>, session: &mut Session, objective: &mut Objective) -> Transition {
    let orch = &ps.components.config.orchestrator;
    let plan = current_plan(session);
    let result = gather::collect(ps.components.resources.as_ref(), &plan, orch.max_reads_per_need).await;
    // 兜底计划的信息需求只是原请求本身，找不到不算推理前后不一致
    if !plan.fallback {
        observe(ps, session, VitalSignal::Gather {
            fetched: result.resources.len(),
            gaps: result.gaps.len(),
        });
    }
    for r in &result.resources {
        objective.add_result("gather", r.id.clone());
    }

    let route = router::after_gather(
        &plan,
        &result,
        session.gather_replans,
        orch.gap_limit,
        orch.max_gather_replans,
        &orch.read_only_capabilities,
    );
    let fetched = result.resources.len();
    let gaps = result.gaps.clone();
    session.context.insert(PhaseResult::Gather(result));

    match route {
        GatherRoute::Replan => {
            session.gather_replans += 1;
            let mut ctx = objective.get_continuation_context();
            ctx.identified_problems.extend(gaps);
            session.continuation = Some(ctx);
            Transition::To(Phase::Plan)
        }
        GatherRoute::SyntheticEvaluate => {
            session.context.insert(PhaseResult::Execute(ExecResult::synthetic_success(format!(
                "read-only plan satisfied by gathering {fetched} resource(s)"
            ))));
            Transition::To(Phase::Evaluate)
        }
        GatherRoute::Execute => Transition::To(Phase::Execute),
    }
}

async fn step_execute(ps: &PhaseSession<'_>, session: &mut Session, objective: &mut Objective) -> Transition {
    let result = execute::run(ps, session).await;
    observe(ps, session, VitalSignal::Execute {
        success: result.success,
        errors: result.errors.len(),
    });
    for o in result.tool_outcomes.iter().filter(|o| o.ok) {
        objective.add_result("execute", format!("{}: {}", o.tool, clip(&o.output, 200)));
    }
    let next = router::after_execute(&result);
    session.context.insert(PhaseResult::Execute(result));
    next
}

async fn step_evaluate(
    ps: &PhaseSession<'_>,
    session: &mut Session,
    objective: &mut Objective,
) -> Result<Transition, AgentError> {
    let evaluation = evaluate::run(ps, session).await;
    let eval = evaluation.result;

    let plan = current_plan(session);
    // 只计本轮产出：上一轮的执行错误已经记入上一次 Attempt
    let exec = session.context.current_exec().cloned();
    let gathered_chars: usize = session
        .context
        .current_gather()
        .map(|g| g.resources.iter().map(|r| r.content.chars().count()).sum())
        .unwrap_or(0);
    let answer_chars = session
        .context
        .current_respond()
        .map(|r| r.answer.chars().count())
        .unwrap_or(0);
    let output_chars =
        exec.as_ref().map(|e| e.output_chars()).unwrap_or(0) + gathered_chars + answer_chars;
    observe(ps, session, VitalSignal::Evaluate {
        quality: eval.quality_score,
        plan_confidence: plan.confidence,
        output_chars,
    });

    objective.update_satisfaction(eval.quality_score, eval.missing_aspects.clone());
    objective.set_suggestions(eval.suggestions.clone());
    let exec_errors = exec
        .as_ref()
        .filter(|e| !e.success)
        .map(|e| e.errors.clone())
        .unwrap_or_default();
    let mut results: Vec<String> = Vec::new();
    if let Some(g) = session.context.current_gather() {
        results.extend(g.resources.iter().map(|r| format!("read {}", r.id)));
    }
    if let Some(e) = exec.as_ref() {
        results.extend(
            e.tool_outcomes
                .iter()
                .map(|o| format!("{} {}", o.tool, if o.ok { "ok" } else { "failed" })),
        );
    }
    if let Some(r) = session.context.current_respond() {
        results.push(format!("answer: {}", clip(&r.answer, 120)));
    }
    let unresolved_errors = exec_errors.len();
    objective.record_attempt(
        &plan.strategy,
        results,
        eval.quality_score,
        exec_errors,
        evaluation.lessons,
    );

    let verdict = ps.components.governor.assess(GovernorInput {
        vitals: session.vitals,
        loop_count: session.loop_count + 1,
        budget: session.budget,
        low_streak: session.low_streak,
        unresolved_errors,
    });
    if !verdict.low_vitals.is_empty() {
        tracing::debug!(low = ?verdict.low_vitals, streak = verdict.low_streak, "low vitals");
    }
    session.apply_cycle(verdict).map_err(|e| violation(e.to_string()))?;
    objective.max_iterations = session.budget.max_loops;

    ps.send(PhaseEvent::SatisfactionScored {
        score: eval.quality_score,
        missing_aspects: eval.missing_aspects.clone(),
    });
    let intervention = session
        .last_intervention
        .clone()
        .unwrap_or_else(Intervention::none);
    if intervention.is_high() || intervention.is_critical() {
        tracing::warn!(reason = %intervention.reason, priority = ?intervention.priority, "governor intervention");
        ps.send(PhaseEvent::Intervention {
            intervention: intervention.clone(),
        });
    }

    let next = router::after_evaluate(&EvaluateRouting {
        intervention: &intervention,
        loop_count: session.loop_count,
        budget: session.budget,
        satisfied: objective.is_completed(),
        should_continue: objective.should_continue(),
        recommended: eval.recommended_action,
    });
    tracing::info!(
        loop_count = session.loop_count,
        max_loops = session.budget.max_loops,
        score = eval.quality_score,
        "evaluation finished"
    );
    session.context.insert(PhaseResult::Evaluate(eval));
    if next == Transition::To(Phase::Plan) {
        session.continuation = Some(objective.get_continuation_context());
    }
    Ok(next)
}

async fn step_respond(ps: &PhaseSession<'_>, session: &mut Session, objective: &mut Objective) -> Transition {
    let orch = &ps.components.config.orchestrator;
    let result = respond::run(ps, session, objective).await;
    if result.too_short {
        session.respond_attempts += 1;
    } else {
        session.respond_attempts = 0;
    }
    let retries_exhausted = session.respond_attempts > orch.max_respond_retries;
    session.history.push(Message::assistant(result.answer.clone()));
    objective.add_result("respond", result.answer.clone());
    observe(ps, session, VitalSignal::Respond {
        complete: !result.too_short && objective.is_completed(),
    });

    let next = router::after_respond(&RespondRouting {
        result: &result,
        loop_count: session.loop_count,
        budget: session.budget,
        completed: objective.is_completed(),
        accepted_partial: session.accepted_partial,
        retries_exhausted,
    });
    session.context.insert(PhaseResult::Respond(result));
    next
}

/// 步数耗尽仍未达标：咨询人工，返回下一步（不会再返回 Consult）
async fn consult(ps: &PhaseSession<'_>, session: &mut Session, objective: &mut Objective) -> Transition {
    let governor = &ps.components.governor;
    let guidance = match ps.guidance {
        Some(g) => g,
        None => return Transition::Finish(TerminalReason::BudgetExhausted),
    };
    if session.escalation_rounds >= governor.max_escalation_rounds() {
        tracing::warn!(rounds = session.escalation_rounds, "escalation rounds used up");
        return Transition::Finish(TerminalReason::EscalationLimit);
    }

    let max_detail = ps.components.config.orchestrator.max_detail_requests;
    let mut detail_requests = 0u32;
    loop {
        let situation = situation_report(ps, session, objective);
        let technical = detail_requests > 0;
        let rendered = if technical {
            format!("{}\n\n{}", technical_detail(ps, session, objective), situation)
        } else {
            situation
        };
        let report = SituationReport {
            session_id: session.id.clone(),
            rendered: rendered.clone(),
            technical,
            round: session.escalation_rounds,
        };
        publish_status(ps, session, objective, true);
        ps.send(PhaseEvent::Escalation { report: rendered });
        tracing::info!(round = session.escalation_rounds, technical, "waiting for human guidance");

        let choice = guidance.consult(&report).await;
        tracing::info!(choice = ?choice, "human guidance received");
        match choice {
            None if ps.supervisor.is_cancelled() => return Transition::Finish(TerminalReason::Cancelled),
            None => return Transition::Finish(TerminalReason::HumanUnavailable),
            Some(HumanChoice::Cancel) => return Transition::Finish(TerminalReason::HumanCancelled),
            Some(HumanChoice::AcceptPartial) => {
                session.accepted_partial = true;
                return Transition::To(Phase::Respond);
            }
            Some(HumanChoice::RequestTechnicalDetail) => {
                detail_requests += 1;
                if detail_requests > max_detail {
                    return Transition::Finish(TerminalReason::EscalationLimit);
                }
            }
            Some(HumanChoice::ContinueWithGuidance(text)) => {
                let text = text.trim();
                if !text.is_empty() {
                    objective.add_constraint(&format!("user guidance: {text}"));
                    session.history.push(Message::user(text));
                }
                return extend(ps, session, objective);
            }
            Some(HumanChoice::TryAlternative) => {
                let strategy = current_plan(session).strategy;
                objective.add_constraint(&format!("use a different approach than '{strategy}'"));
                return extend(ps, session, objective);
            }
        }
    }
}

/// 人工同意继续：追加步数并带着已学到的约束重新规划
fn extend(ps: &PhaseSession<'_>, session: &mut Session, objective: &mut Objective) -> Transition {
    let governor = &ps.components.governor;
    session.budget = governor.grant_extension(session.budget, session.loop_count);
    objective.reset_for_retry(true, governor.config().escalation_extension);
    objective.max_iterations = session.budget.max_loops;
    session.escalation_rounds += 1;
    session.low_streak = 0;
    session.continuation = Some(objective.get_continuation_context());
    tracing::info!(
        max_loops = session.budget.max_loops,
        round = session.escalation_rounds,
        "budget extended after human guidance"
    );
    Transition::To(Phase::Plan)
}

fn vitals_line(session: &Session) -> String {
    let v = session.vitals;
    format!("mood {:.2} / focus {:.2} / stamina {:.2}", v.mood, v.focus, v.stamina)
}

fn intervention_line(session: &Session) -> String {
    session
        .last_intervention
        .as_ref()
        .filter(|i| i.required)
        .map(|i| format!("{:?}: {}", i.priority, i.reason))
        .unwrap_or_default()
}

fn situation_report(ps: &PhaseSession<'_>, session: &Session, objective: &Objective) -> String {
    let ctx = objective.get_continuation_context();
    let partial = session
        .context
        .respond()
        .map(|r| clip(&r.answer, 600))
        .unwrap_or_default();
    let data = render_data([
        ("request", session.request.trim().to_string()),
        ("loop_count", session.loop_count.to_string()),
        ("max_loops", session.budget.max_loops.to_string()),
        ("satisfaction", format!("{:.2}", objective.current_satisfaction)),
        ("target", format!("{:.2}", objective.target_satisfaction)),
        ("vitals", vitals_line(session)),
        ("intervention", intervention_line(session)),
        ("missing", bullet_list(&objective.missing_aspects)),
        ("failed", bullet_list(&ctx.failed_approaches)),
        ("constraints", bullet_list(&objective.learned_constraints)),
        ("partial", partial),
    ]);
    ps.components.renderer.render("situation_report", &data)
}

fn technical_detail(ps: &PhaseSession<'_>, session: &Session, objective: &Objective) -> String {
    let as_json = |phase: Phase| {
        session
            .context
            .get(phase)
            .and_then(|r| serde_json::to_string_pretty(r).ok())
            .unwrap_or_default()
    };
    let attempts: Vec<String> = objective
        .attempts
        .iter()
        .enumerate()
        .map(|(i, a)| {
            format!(
                "#{} {} satisfaction {:.2}, {} error(s)",
                i + 1,
                a.strategy,
                a.satisfaction,
                a.errors.len()
            )
        })
        .collect();
    let data = render_data([
        ("session_id", session.id.clone()),
        ("phase", session.phase.to_string()),
        ("profile", session.profile.to_string()),
        ("loop_count", session.loop_count.to_string()),
        ("max_loops", session.budget.max_loops.to_string()),
        ("vitals", vitals_line(session)),
        ("intervention", intervention_line(session)),
        ("plan", as_json(Phase::Plan)),
        ("gather", as_json(Phase::Gather)),
        ("execute", as_json(Phase::Execute)),
        ("evaluate", as_json(Phase::Evaluate)),
        ("attempts", bullet_list(&attempts)),
    ]);
    ps.components.renderer.render("technical_detail", &data)
}

/// 事件里使用的一句话摘要
fn summarize(session: &Session, phase: Phase) -> String {
    match session.context.get(phase) {
        Some(PhaseResult::Plan(p)) => format!(
            "{} step(s), {} capability(ies), strategy {}",
            p.steps.len(),
            p.required_capabilities.len(),
            p.strategy
        ),
        Some(PhaseResult::Gather(g)) => format!(
            "{} resource(s), {} gap(s)",
            g.resources.len(),
            g.gaps.len()
        ),
        Some(PhaseResult::Execute(e)) => format!(
            "{} tool call(s), success {}",
            e.tool_outcomes.len(),
            e.success
        ),
        Some(PhaseResult::Evaluate(e)) => format!(
            "score {:.2}, next {:?}",
            e.quality_score, e.recommended_action
        ),
        Some(PhaseResult::Respond(r)) => format!("{} chars", r.answer.chars().count()),
        None => String::new(),
    }
}
