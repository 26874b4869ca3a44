//! Gather 阶段：读取计划列出的目标资源，并为每个信息需求搜索工作区
//!
//! 不调用文本生成。读取失败、拒绝访问、搜索无结果都记为缺口，不报错。

use std::collections::HashSet;

use crate::capability::ResourceProvider;
use crate::core::{CapabilityError, GatherResult, PlanResult};

/// 对计划执行一次收集；max_reads_per_need 限制每个需求读取的命中数
pub async fn collect(
    resources: &dyn ResourceProvider,
    plan: &PlanResult,
    max_reads_per_need: usize,
) -> GatherResult {
    let mut result = GatherResult {
        strategy: if plan.target_resources.is_empty() {
            "search".to_string()
        } else {
            "targeted-read".to_string()
        },
        ..Default::default()
    };
    let mut seen: HashSet<String> = HashSet::new();

    for target in &plan.target_resources {
        let target = target.trim();
        if target.is_empty() || !seen.insert(target.to_string()) {
            continue;
        }
        match resources.read(target).await {
            Ok(r) => result.resources.push(r),
            Err(e) => result.gaps.push(gap_text(target, &e)),
        }
    }

    for need in &plan.information_needs {
        let need = need.trim();
        if need.is_empty() {
            continue;
        }
        let hits = match resources.search(need).await {
            Ok(h) => h,
            Err(e) => {
                result.gaps.push(gap_text(need, &e));
                continue;
            }
        };
        if hits.is_empty() {
            result.gaps.push(format!("no workspace match for: {need}"));
            continue;
        }
        let mut read = 0;
        for hit in hits {
            if read >= max_reads_per_need {
                break;
            }
            if !seen.insert(hit.clone()) {
                continue;
            }
            match resources.read(&hit).await {
                Ok(r) => {
                    result.resources.push(r);
                    read += 1;
                }
                Err(e) => tracing::debug!(path = %hit, error = %e, "search hit unreadable"),
            }
        }
    }

    tracing::info!(
        fetched = result.resources.len(),
        gaps = result.gaps.len(),
        "gather finished"
    );
    result
}

fn gap_text(subject: &str, err: &CapabilityError) -> String {
    match err {
        CapabilityError::Denied(_) => format!("access denied: {subject}"),
        CapabilityError::NotFound(_) => format!("not found: {subject}"),
        other => format!("{subject}: {other}"),
    }
}

/// 供 Evaluate / Respond 提示词使用的资源摘录
pub fn excerpt(gather: &GatherResult, per_resource: usize) -> String {
    gather
        .resources
        .iter()
        .map(|r| {
            let body = super::clip(&r.content, per_resource);
            format!("### {}\n{}", r.id, body)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::WorkspaceResources;
    use crate::config::ToolsSection;
    use crate::core::Complexity;
    use crate::tools::SafeFs;

    fn plan(targets: &[&str], needs: &[&str]) -> PlanResult {
        PlanResult {
            requirement_summary: "x".into(),
            steps: vec![],
            required_capabilities: vec!["read_file".into()],
            target_resources: targets.iter().map(|s| s.to_string()).collect(),
            information_needs: needs.iter().map(|s| s.to_string()).collect(),
            complexity: Complexity::Low,
            confidence: 0.7,
            strategy: "s".into(),
            fallback: false,
        }
    }

    fn workspace() -> (tempfile::TempDir, WorkspaceResources) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "Project pilot handles deployment notes").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "deployment happens on fridays").unwrap();
        let fs = SafeFs::new(dir.path());
        let res = WorkspaceResources::new(fs, &ToolsSection::default());
        (dir, res)
    }

    #[tokio::test]
    async fn test_targets_and_gaps() {
        let (_dir, res) = workspace();
        let g = collect(&res, &plan(&["README.md", "missing.md", "../etc/passwd"], &[]), 3).await;
        assert_eq!(g.resources.len(), 1);
        assert_eq!(g.resources[0].id, "README.md");
        assert_eq!(g.gaps.len(), 2);
        assert!(g.gaps.iter().any(|x| x.starts_with("not found")));
        assert!(g.gaps.iter().any(|x| x.starts_with("access denied")));
    }

    #[tokio::test]
    async fn test_search_needs_dedup_targets() {
        let (_dir, res) = workspace();
        let g = collect(&res, &plan(&["README.md"], &["deployment schedule", "zzqqxx"]), 3).await;
        let ids: Vec<&str> = g.resources.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids.iter().filter(|i| **i == "README.md").count(), 1);
        assert!(ids.contains(&"notes.txt"));
        assert_eq!(g.gaps, vec!["no workspace match for: zzqqxx".to_string()]);
        assert!(excerpt(&g, 10).contains("### notes.txt"));
    }
}
