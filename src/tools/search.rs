//! 工作区搜索：按查询关键词在沙箱内查找相关文件
//!
//! 文件名命中权重高于内容命中；跳过隐藏目录、target、node_modules 与超大文件。
//! 排名只求稳定可复现，不追求相关性最优。

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::CapabilityError;
use crate::tools::{RiskLevel, SafeFs, Tool};

/// 单文件大小上限（超过则跳过内容匹配）
const MAX_FILE_SIZE: u64 = 1024 * 1024;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "what", "which", "from", "into", "about", "are",
    "how", "please", "file", "files", "find", "show", "tell",
];

/// 把查询拆成小写关键词（至少 3 个字符，去掉常见停用词）
pub fn query_terms(query: &str) -> Vec<String> {
    let re = match regex::Regex::new(r"[\p{L}\p{N}_.\-]+") {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };
    let mut terms: Vec<String> = Vec::new();
    for m in re.find_iter(&query.to_lowercase()) {
        let t = m.as_str().trim_matches(|c| c == '.' || c == '-');
        if t.chars().count() >= 3 && !STOPWORDS.contains(&t) && !terms.iter().any(|x| x == t) {
            terms.push(t.to_string());
        }
    }
    terms
}

/// 在 root 下搜索，返回按得分排序的相对路径
pub fn search_workspace(
    root: &Path,
    query: &str,
    include: Option<&str>,
    max_results: usize,
) -> Vec<String> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return Vec::new();
    }
    let include_pattern = include.and_then(|p| glob::Pattern::new(p).ok());

    let mut scored: Vec<(usize, String)> = Vec::new();
    for entry in walkdir::WalkDir::new(root)
        .max_depth(10)
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            e.depth() == 0
                || (!name.starts_with('.') && name != "target" && name != "node_modules")
        })
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let rel = match path.strip_prefix(root) {
            Ok(r) => r.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_lowercase();
        if let Some(ref pattern) = include_pattern {
            if !pattern.matches(&file_name) {
                continue;
            }
        }

        let rel_lower = rel.to_lowercase();
        let mut score = terms.iter().filter(|t| rel_lower.contains(t.as_str())).count() * 3;

        let small = entry
            .metadata()
            .map(|m| m.len() <= MAX_FILE_SIZE)
            .unwrap_or(false);
        if small {
            if let Ok(content) = std::fs::read_to_string(path) {
                let content = content.to_lowercase();
                score += terms
                    .iter()
                    .filter(|t| content.contains(t.as_str()))
                    .count();
            }
        }
        if score > 0 {
            scored.push((score, rel));
        }
    }

    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    scored
        .into_iter()
        .take(max_results)
        .map(|(_, p)| p)
        .collect()
}

/// 搜索工具：{"query": "...", "include": "*.rs"}
pub struct SearchFilesTool {
    fs: SafeFs,
    max_results: usize,
}

impl SearchFilesTool {
    pub fn new(fs: SafeFs, max_results: usize) -> Self {
        Self { fs, max_results }
    }
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search workspace files by keywords. Args: {\"query\": \"keywords\", \"include\": \"optional glob such as *.rs\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "include": { "type": "string" }
            },
            "required": ["query"]
        })
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::Low
    }

    async fn execute(&self, args: Value) -> Result<String, CapabilityError> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CapabilityError::Malformed("search_files requires query".into()))?;
        let include = args.get("include").and_then(|v| v.as_str());
        let hits = search_workspace(self.fs.root(), query, include, self.max_results);
        if hits.is_empty() {
            return Ok(format!("No matches found for '{}'", query));
        }
        Ok(hits.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("docs/pacemaker.md"), "The pacemaker bounds loops.").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "pacemaker mentioned once").unwrap();
        std::fs::write(dir.path().join(".git/pacemaker"), "hidden").unwrap();
        dir
    }

    #[test]
    fn test_query_terms() {
        assert_eq!(
            query_terms("What is the Pacemaker in README.md?"),
            vec!["pacemaker".to_string(), "readme.md".to_string()]
        );
        assert!(query_terms("a an it").is_empty());
    }

    #[test]
    fn test_filename_hits_rank_first() {
        let dir = workspace();
        let hits = search_workspace(dir.path(), "pacemaker", None, 10);
        assert_eq!(hits, vec!["docs/pacemaker.md".to_string(), "notes.txt".to_string()]);
    }

    #[test]
    fn test_include_filter_and_limit() {
        let dir = workspace();
        let hits = search_workspace(dir.path(), "pacemaker", Some("*.txt"), 10);
        assert_eq!(hits, vec!["notes.txt".to_string()]);
        assert_eq!(search_workspace(dir.path(), "pacemaker", None, 1).len(), 1);
    }

    #[tokio::test]
    async fn test_tool_reports_no_matches() {
        let dir = workspace();
        let tool = SearchFilesTool::new(SafeFs::new(dir.path()), 10);
        let out = tool
            .execute(serde_json::json!({"query": "zebra"}))
            .await
            .unwrap();
        assert!(out.starts_with("No matches"));
    }
}
