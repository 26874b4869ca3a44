//! 会话注册表：后台并发运行多个会话，对外提供状态查询、人工决策提交与取消
//!
//! 每个会话一个 tokio 任务，会话内部阶段严格串行；注册表只持有状态投影（watch）、
//! 人工渠道句柄与取消令牌，完整 Session 始终由各自的状态机独占。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::agent::AgentComponents;
use crate::core::{AgentError, SessionStatus, SessionSupervisor};
use crate::objective::{ObjectiveStats, ObjectiveTracker};
use crate::phases::{
    run_session, ChannelGuidance, GuidanceHandle, HumanChoice, PhaseSession, SessionOutcome,
    SituationReport,
};

struct SessionEntry {
    status: watch::Receiver<SessionStatus>,
    guidance: GuidanceHandle,
    supervisor: SessionSupervisor,
    handle: Option<JoinHandle<Result<SessionOutcome, AgentError>>>,
}

fn entry_finished(entry: &SessionEntry) -> bool {
    entry.status.borrow().is_terminal()
        || entry.handle.as_ref().map_or(true, |h| h.is_finished())
}

/// 注册表统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistryStats {
    pub active: usize,
    pub awaiting_human: usize,
    pub finished: usize,
    pub objectives: ObjectiveStats,
}

/// 多会话注册表（可 Clone，共享同一份内部状态）
#[derive(Clone)]
pub struct SessionRegistry {
    components: Arc<AgentComponents>,
    sessions: Arc<Mutex<HashMap<String, SessionEntry>>>,
    tracker: Arc<Mutex<ObjectiveTracker>>,
    human_wait: Option<Duration>,
}

impl SessionRegistry {
    pub fn new(components: Arc<AgentComponents>) -> Self {
        let tracker = ObjectiveTracker::new(components.config.objective.clone());
        Self {
            components,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            tracker: Arc::new(Mutex::new(tracker)),
            human_wait: None,
        }
    }

    /// 等待人工决策的最长时间；超时视为无人响应
    pub fn with_human_wait(mut self, wait: Duration) -> Self {
        self.human_wait = Some(wait);
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, SessionEntry>>, AgentError> {
        self.sessions
            .lock()
            .map_err(|_| AgentError::InvariantViolation("session registry lock poisoned".into()))
    }

    /// 创建并在后台启动会话，返回 session_id
    pub fn start_session(&self, request: &str) -> Result<String, AgentError> {
        let (session, objective) = self.components.new_session(request);
        let id = session.id.clone();
        let supervisor = SessionSupervisor::new();
        let (guidance, handle) = ChannelGuidance::new(supervisor.child_token(), self.human_wait);
        let (status_tx, status_rx) = watch::channel(session.status(0.0, false));

        let components = Arc::clone(&self.components);
        let tracker = Arc::clone(&self.tracker);
        let task_supervisor = supervisor.clone();
        let join = tokio::spawn(async move {
            let ps = PhaseSession::new(&components, &task_supervisor)
                .with_guidance(&guidance)
                .with_status_tx(&status_tx);
            let result = run_session(&ps, session, objective).await;
            if let Ok(outcome) = &result {
                let succeeded = outcome.phase() == crate::core::Phase::Done;
                if let Ok(mut t) = tracker.lock() {
                    t.archive(&outcome.objective, succeeded);
                }
            }
            result
        });

        self.lock()?.insert(
            id.clone(),
            SessionEntry {
                status: status_rx,
                guidance: handle,
                supervisor,
                handle: Some(join),
            },
        );
        tracing::info!(session_id = %id, "session registered");
        Ok(id)
    }

    pub fn get_status(&self, session_id: &str) -> Result<SessionStatus, AgentError> {
        let sessions = self.lock()?;
        let entry = sessions
            .get(session_id)
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))?;
        let status = entry.status.borrow().clone();
        Ok(status)
    }

    /// 当前待决的情况报告（未等待人工时为 None）
    pub fn pending_report(&self, session_id: &str) -> Result<Option<SituationReport>, AgentError> {
        let sessions = self.lock()?;
        let entry = sessions
            .get(session_id)
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))?;
        let report = entry.guidance.pending_rx.borrow().clone();
        Ok(report)
    }

    /// 等待会话进入等待人工状态（或终态）
    pub async fn wait_for_human(&self, session_id: &str) -> Result<Option<SituationReport>, AgentError> {
        let mut rx = {
            let sessions = self.lock()?;
            sessions
                .get(session_id)
                .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))?
                .guidance
                .pending_rx
                .clone()
        };
        let mut status = {
            let sessions = self.lock()?;
            sessions
                .get(session_id)
                .map(|e| e.status.clone())
                .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))?
        };
        loop {
            let pending = rx.borrow_and_update().clone();
            if pending.is_some() {
                return Ok(pending);
            }
            let finished = status.borrow_and_update().is_terminal();
            if finished {
                return Ok(None);
            }
            let closed = tokio::select! {
                changed = rx.changed() => changed.is_err(),
                changed = status.changed() => changed.is_err(),
            };
            if closed {
                return Ok(None);
            }
        }
    }

    /// 提交人工决策；会话未在等待时返回 NotAwaitingHuman
    pub fn submit_human_choice(&self, session_id: &str, choice: HumanChoice) -> Result<(), AgentError> {
        let sessions = self.lock()?;
        let entry = sessions
            .get(session_id)
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))?;
        if entry.guidance.pending_rx.borrow().is_none() {
            return Err(AgentError::NotAwaitingHuman(session_id.to_string()));
        }
        tracing::info!(session_id = %session_id, choice = ?choice, "human choice submitted");
        entry
            .guidance
            .choice_tx
            .send(choice)
            .map_err(|_| AgentError::NotAwaitingHuman(session_id.to_string()))
    }

    /// 协作式取消：在下一个阶段边界或人工等待中生效
    pub fn cancel(&self, session_id: &str) -> Result<(), AgentError> {
        let sessions = self.lock()?;
        let entry = sessions
            .get(session_id)
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))?;
        entry.supervisor.cancel();
        tracing::info!(session_id = %session_id, "session cancel requested");
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<SessionStatus>, AgentError> {
        let sessions = self.lock()?;
        let mut all: Vec<SessionStatus> = sessions.values().map(|e| e.status.borrow().clone()).collect();
        all.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        Ok(all)
    }

    /// 等待会话结束并取回结果；取回后条目从注册表移除（目标统计已归档，不受影响）
    pub async fn wait(&self, session_id: &str) -> Result<SessionOutcome, AgentError> {
        let handle = {
            let mut sessions = self.lock()?;
            let entry = sessions
                .get_mut(session_id)
                .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))?;
            entry
                .handle
                .take()
                .ok_or_else(|| AgentError::SessionNotFound(format!("{session_id} (already joined)")))?
        };
        let result = handle.await;
        self.lock()?.remove(session_id);
        tracing::debug!(session_id = %session_id, "session removed from registry");
        match result {
            Ok(result) => result,
            Err(e) => Err(AgentError::InvariantViolation(format!("session task failed: {e}"))),
        }
    }

    /// 移除已结束的会话（不取结果）；仍在运行时返回 SessionRunning
    pub fn remove(&self, session_id: &str) -> Result<(), AgentError> {
        let mut sessions = self.lock()?;
        let entry = sessions
            .get(session_id)
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))?;
        if !entry_finished(entry) {
            return Err(AgentError::SessionRunning(session_id.to_string()));
        }
        sessions.remove(session_id);
        Ok(())
    }

    /// 清理所有已结束的会话，返回清理数量
    pub fn prune_finished(&self) -> Result<usize, AgentError> {
        let mut sessions = self.lock()?;
        let before = sessions.len();
        sessions.retain(|_, entry| !entry_finished(entry));
        let pruned = before - sessions.len();
        if pruned > 0 {
            tracing::info!(pruned, "finished sessions pruned");
        }
        Ok(pruned)
    }

    pub fn statistics(&self) -> Result<RegistryStats, AgentError> {
        let objectives = self
            .tracker
            .lock()
            .map(|t| t.statistics())
            .unwrap_or_default();
        let sessions = self.lock()?;
        let mut stats = RegistryStats {
            objectives,
            ..Default::default()
        };
        for entry in sessions.values() {
            let s = entry.status.borrow();
            if s.is_terminal() {
                stats.finished += 1;
            } else {
                stats.active += 1;
                if s.awaiting_human {
                    stats.awaiting_human += 1;
                }
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::llm::MockLlmClient;

    fn registry(score: &'static str) -> (tempfile::TempDir, SessionRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(MockLlmClient::per_phase(move |phase, _| {
            Ok(match phase {
                "plan" => r#"{"steps": ["reply"], "confidence": 0.8}"#.to_string(),
                "evaluate" => format!(r#"{{"score": {score}}}"#),
                _ => "A reply that is long enough to count as a complete answer.".to_string(),
            })
        }));
        let components = Arc::new(AgentComponents::new(AppConfig::default(), llm, dir.path()));
        (dir, SessionRegistry::new(components))
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let (_dir, reg) = registry("0.9");
        assert!(matches!(reg.get_status("nope"), Err(AgentError::SessionNotFound(_))));
        assert!(matches!(reg.cancel("nope"), Err(AgentError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_session_completes_and_is_archived() {
        let (_dir, reg) = registry("0.9");
        let id = reg.start_session("hi there").unwrap();
        let out = reg.wait(&id).await.unwrap();
        assert_eq!(out.phase(), crate::core::Phase::Done);
        assert!(matches!(reg.get_status(&id), Err(AgentError::SessionNotFound(_))));
        assert!(matches!(
            reg.submit_human_choice(&id, HumanChoice::Cancel),
            Err(AgentError::SessionNotFound(_))
        ));
        let stats = reg.statistics().unwrap();
        assert_eq!(stats.finished, 0);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.objectives.count, 1);
        assert!((stats.objectives.success_rate - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_remove_and_prune_only_finished() {
        let (_dir, reg) = registry("0.2");
        let waiting = reg.start_session("hi there").unwrap();
        reg.wait_for_human(&waiting).await.unwrap().expect("escalation report");
        assert!(matches!(reg.remove(&waiting), Err(AgentError::SessionRunning(_))));
        assert_eq!(reg.prune_finished().unwrap(), 0);

        reg.submit_human_choice(&waiting, HumanChoice::Cancel).unwrap();
        while !reg.get_status(&waiting).unwrap().is_terminal() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        reg.remove(&waiting).unwrap();
        assert!(reg.list().unwrap().is_empty());
        assert!(matches!(reg.remove(&waiting), Err(AgentError::SessionNotFound(_))));

        let done = reg.start_session("hi there").unwrap();
        reg.wait_for_human(&done).await.unwrap().expect("escalation report");
        reg.submit_human_choice(&done, HumanChoice::AcceptPartial).unwrap();
        while !reg.get_status(&done).unwrap().is_terminal() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(reg.prune_finished().unwrap(), 1);
        assert!(reg.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_while_awaiting_human() {
        let (_dir, reg) = registry("0.2");
        let id = reg.start_session("hi there").unwrap();
        let report = reg.wait_for_human(&id).await.unwrap().expect("escalation report");
        assert!(report.rendered.contains("Human guidance needed"));
        assert!(reg.get_status(&id).unwrap().awaiting_human);
        reg.cancel(&id).unwrap();
        let out = reg.wait(&id).await.unwrap();
        assert_eq!(out.reason, crate::core::TerminalReason::Cancelled);
    }
}
