//! 多会话注册表：后台运行、人工决策提交、状态查询

use std::sync::Arc;
use std::time::Duration;

use bee_pilot::agent::AgentComponents;
use bee_pilot::config::AppConfig;
use bee_pilot::core::{AgentError, Phase, SessionRegistry, TerminalReason};
use bee_pilot::llm::MockLlmClient;
use bee_pilot::phases::HumanChoice;

fn registry(score: &'static str) -> (tempfile::TempDir, SessionRegistry) {
    let dir = tempfile::tempdir().unwrap();
    let llm = MockLlmClient::per_phase(move |phase, _| {
        Ok(match phase {
            "plan" => r#"{"steps": ["reply"], "confidence": 0.7}"#.to_string(),
            "evaluate" => format!(r#"{{"score": {score}}}"#),
            _ => "A reply that is long enough to count as a complete answer.".to_string(),
        })
    });
    let components = Arc::new(AgentComponents::new(AppConfig::default(), Arc::new(llm), dir.path()));
    (dir, SessionRegistry::new(components))
}

#[tokio::test]
async fn test_accept_partial_through_registry() {
    let (_dir, reg) = registry("0.3");
    let id = reg.start_session("hi there").unwrap();

    let report = reg.wait_for_human(&id).await.unwrap().expect("pending report");
    assert_eq!(report.session_id, id);
    assert_eq!(reg.pending_report(&id).unwrap(), Some(report));
    assert_eq!(reg.statistics().unwrap().awaiting_human, 1);

    reg.submit_human_choice(&id, HumanChoice::AcceptPartial).unwrap();
    let mut status = reg.get_status(&id).unwrap();
    while !status.is_terminal() {
        tokio::time::sleep(Duration::from_millis(5)).await;
        status = reg.get_status(&id).unwrap();
    }
    assert_eq!(status.outcome, Some(TerminalReason::PartialAccepted));
    assert!(!status.awaiting_human);

    let out = reg.wait(&id).await.unwrap();
    assert_eq!(out.phase(), Phase::Done);
    assert_eq!(out.reason, TerminalReason::PartialAccepted);
    assert!(matches!(reg.get_status(&id), Err(AgentError::SessionNotFound(_))));
    assert!(matches!(reg.wait(&id).await, Err(AgentError::SessionNotFound(_))));
}

#[tokio::test]
async fn test_unanswered_escalation_times_out_as_unavailable() {
    let (_dir, reg) = registry("0.3");
    let reg = reg.with_human_wait(Duration::from_millis(50));
    let id = reg.start_session("hi there").unwrap();
    let out = reg.wait(&id).await.unwrap();
    assert_eq!(out.reason, TerminalReason::HumanUnavailable);
    assert_eq!(out.phase(), Phase::Escalated);
}

#[tokio::test]
async fn test_parallel_sessions_are_independent() {
    let (_dir, reg) = registry("0.9");
    let a = reg.start_session("hi there").unwrap();
    let b = reg.start_session("hello again").unwrap();
    assert_ne!(a, b);

    let out_a = reg.wait(&a).await.unwrap();
    let out_b = reg.wait(&b).await.unwrap();
    assert_eq!(out_a.reason, TerminalReason::Completed);
    assert_eq!(out_b.reason, TerminalReason::Completed);
    assert_ne!(out_a.session.id, out_b.session.id);

    assert!(reg.list().unwrap().is_empty());
    let stats = reg.statistics().unwrap();
    assert_eq!(stats.finished, 0);
    assert_eq!(stats.active, 0);
    assert_eq!(stats.objectives.count, 2);
    assert!((stats.objectives.success_rate - 1.0).abs() < 1e-9);
}
