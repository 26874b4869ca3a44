//! 文件/资源能力：read(path) 与 search(query)
//!
//! 拒绝访问与不存在都是正常结果（CapabilityError::Denied / NotFound），由 Gather 记为信息缺口。

use std::time::Duration;

use async_trait::async_trait;

use crate::config::ToolsSection;
use crate::core::{CapabilityError, FetchedResource};
use crate::tools::{search_workspace, SafeFs};

#[async_trait]
pub trait ResourceProvider: Send + Sync {
    async fn read(&self, path: &str) -> Result<FetchedResource, CapabilityError>;

    async fn search(&self, query: &str) -> Result<Vec<String>, CapabilityError>;
}

/// 以沙箱工作区为后端的资源能力
#[derive(Debug, Clone)]
pub struct WorkspaceResources {
    fs: SafeFs,
    max_read_bytes: usize,
    max_results: usize,
    timeout: Duration,
}

impl WorkspaceResources {
    pub fn new(fs: SafeFs, cfg: &ToolsSection) -> Self {
        Self {
            fs,
            max_read_bytes: cfg.max_read_bytes,
            max_results: cfg.max_search_results,
            timeout: Duration::from_secs(cfg.tool_timeout_secs.max(1)),
        }
    }

    fn timeout_error(&self, what: &str) -> CapabilityError {
        CapabilityError::Timeout {
            capability: what.to_string(),
            secs: self.timeout.as_secs(),
        }
    }
}

#[async_trait]
impl ResourceProvider for WorkspaceResources {
    async fn read(&self, path: &str) -> Result<FetchedResource, CapabilityError> {
        let fs = self.fs.clone();
        let path_owned = path.to_string();
        let max = self.max_read_bytes;
        let task = tokio::task::spawn_blocking(move || fs.read_limited(&path_owned, max));
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => Err(CapabilityError::Unavailable(format!("read task failed: {e}"))),
            Err(_) => Err(self.timeout_error("read")),
        }
    }

    async fn search(&self, query: &str) -> Result<Vec<String>, CapabilityError> {
        let root = self.fs.root().to_path_buf();
        let query = query.to_string();
        let max = self.max_results;
        let task = tokio::task::spawn_blocking(move || search_workspace(&root, &query, None, max));
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(hits)) => Ok(hits),
            Ok(Err(e)) => Err(CapabilityError::Unavailable(format!("search task failed: {e}"))),
            Err(_) => Err(self.timeout_error("search")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_and_search() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("guide.md"), "governor budget notes").unwrap();
        let res = WorkspaceResources::new(SafeFs::new(dir.path()), &ToolsSection::default());

        let hits = res.search("governor budget").await.unwrap();
        assert_eq!(hits, vec!["guide.md".to_string()]);
        let doc = res.read("guide.md").await.unwrap();
        assert!(doc.content.contains("budget"));
        assert!(!doc.truncated);

        assert!(matches!(res.read("../x").await, Err(CapabilityError::Denied(_))));
        assert!(matches!(res.read("missing.md").await, Err(CapabilityError::NotFound(_))));
    }
}
