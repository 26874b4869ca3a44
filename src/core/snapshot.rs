//! 会话快照：把 Session + Objective 存成 JSON，之后可从同一阶段继续
//!
//! 写入先落到临时文件再 rename，避免中途崩溃留下半个快照。

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{AgentError, Session};
use crate::objective::Objective;

/// 快照格式版本
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub session: Session,
    pub objective: Objective,
}

impl SessionSnapshot {
    pub fn capture(session: &Session, objective: &Objective) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            session: session.clone(),
            objective: objective.clone(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), AgentError> {
        self.write_json(path)
            .map_err(|e| AgentError::Persistence(format!("{e:#}")))
    }

    fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create snapshot dir {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("serialize snapshot")?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, path).with_context(|| format!("rename to {}", path.display()))?;
        tracing::info!(path = %path.display(), session_id = %self.session.id, "snapshot saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, AgentError> {
        let snapshot = Self::read_json(path).map_err(|e| AgentError::Persistence(format!("{e:#}")))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(AgentError::Persistence(format!(
                "unsupported snapshot version {} (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        Ok(snapshot)
    }

    fn read_json(path: &Path) -> anyhow::Result<Self> {
        let text =
            std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parse snapshot {}", path.display()))
    }
}
