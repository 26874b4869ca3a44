//! 沙箱文件系统工具
//!
//! SafeFs 绑定 root_dir，所有路径必须落在 root 下（禁止 ../ 与绝对路径逃逸，符号链接按真实路径校验）；
//! ReadFileTool / ListDirTool / WriteFileTool 基于 SafeFs 提供读、列、写能力。
//! 拒绝访问是策略层的正常结果，以 CapabilityError::Denied 返回。

use std::io::Read;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::core::{CapabilityError, FetchedResource};
use crate::tools::{RiskLevel, Tool};

/// 沙箱文件系统：绑定根目录，防止路径逃逸
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 只做词法检查：拒绝绝对路径与越过根目录的 ..
    fn lexical_join(&self, path: &str) -> Result<PathBuf, CapabilityError> {
        let trimmed = path.trim().trim_start_matches("./");
        let mut depth: i32 = 0;
        let mut joined = self.root_dir.clone();
        for comp in Path::new(trimmed).components() {
            match comp {
                Component::Normal(c) => {
                    depth += 1;
                    joined.push(c);
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(CapabilityError::Denied(path.to_string()));
                    }
                    joined.pop();
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(CapabilityError::Denied(path.to_string()));
                }
            }
        }
        Ok(joined)
    }

    /// 解析已存在的路径，必须在沙箱内
    pub fn resolve(&self, path: &str) -> Result<PathBuf, CapabilityError> {
        let full = self.lexical_join(path)?;
        let canonical = full
            .canonicalize()
            .map_err(|_| CapabilityError::NotFound(path.to_string()))?;
        if canonical.starts_with(&self.root_dir) {
            Ok(canonical)
        } else {
            // 如指向沙箱外的符号链接
            Err(CapabilityError::Denied(path.to_string()))
        }
    }

    /// 读取文件，最多 max_bytes 字节
    pub fn read_limited(&self, path: &str, max_bytes: usize) -> Result<FetchedResource, CapabilityError> {
        let resolved = self.resolve(path)?;
        if resolved.is_dir() {
            return Err(CapabilityError::NotFound(format!("{path} is a directory")));
        }
        let size = std::fs::metadata(&resolved)
            .map(|m| m.len())
            .map_err(|e| CapabilityError::Unavailable(format!("stat {path}: {e}")))?;
        let file = std::fs::File::open(&resolved)
            .map_err(|e| CapabilityError::Unavailable(format!("open {path}: {e}")))?;
        let mut buf = Vec::new();
        file.take(max_bytes as u64)
            .read_to_end(&mut buf)
            .map_err(|e| CapabilityError::Unavailable(format!("read {path}: {e}")))?;
        Ok(FetchedResource {
            id: path.trim().trim_start_matches("./").to_string(),
            content: String::from_utf8_lossy(&buf).to_string(),
            truncated: size > max_bytes as u64,
            size,
        })
    }

    pub fn list_dir(&self, path: &str) -> Result<Vec<String>, CapabilityError> {
        let base = if path.trim().is_empty() || path.trim() == "." {
            self.root_dir.clone()
        } else {
            self.resolve(path)?
        };
        let mut entries = Vec::new();
        for e in std::fs::read_dir(&base)
            .map_err(|e| CapabilityError::Unavailable(format!("list {path}: {e}")))?
        {
            let e = e.map_err(|e| CapabilityError::Unavailable(e.to_string()))?;
            let name = e.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') {
                let ty = if e.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    "/"
                } else {
                    ""
                };
                entries.push(format!("{}{}", name, ty));
            }
        }
        entries.sort();
        Ok(entries)
    }

    /// 写入文件（自动创建父目录），返回写入字节数
    pub fn write_file(&self, path: &str, content: &str) -> Result<usize, CapabilityError> {
        let full = self.lexical_join(path)?;
        if full == self.root_dir {
            return Err(CapabilityError::Denied(path.to_string()));
        }
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CapabilityError::Unavailable(format!("mkdir {path}: {e}")))?;
            let parent_canon = parent
                .canonicalize()
                .map_err(|_| CapabilityError::NotFound(path.to_string()))?;
            if !parent_canon.starts_with(&self.root_dir) {
                return Err(CapabilityError::Denied(path.to_string()));
            }
        }
        std::fs::write(&full, content)
            .map_err(|e| CapabilityError::Unavailable(format!("write {path}: {e}")))?;
        Ok(content.len())
    }
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

/// 读取文件内容
pub struct ReadFileTool {
    fs: SafeFs,
    max_bytes: usize,
}

impl ReadFileTool {
    pub fn new(fs: SafeFs, max_bytes: usize) -> Self {
        Self { fs, max_bytes }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read file contents. Args: {\"path\": \"file path relative to workspace\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
        })
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::Low
    }

    async fn execute(&self, args: Value) -> Result<String, CapabilityError> {
        let path = str_arg(&args, "path")
            .ok_or_else(|| CapabilityError::Malformed("read_file requires path".into()))?;
        tracing::info!(path = %path, "read_file tool execute");
        let res = self.fs.read_limited(path, self.max_bytes)?;
        if res.truncated {
            Ok(format!("{}\n...[truncated, {} bytes total]", res.content, res.size))
        } else {
            Ok(res.content)
        }
    }
}

/// 列出目录
pub struct ListDirTool {
    fs: SafeFs,
}

impl ListDirTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List directory. Args: {\"path\": \"directory path, default '.'\"}"
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::Low
    }

    async fn execute(&self, args: Value) -> Result<String, CapabilityError> {
        let path = str_arg(&args, "path").unwrap_or(".");
        tracing::info!(path = %path, "list_dir tool execute");
        let entries = self.fs.list_dir(path)?;
        Ok(entries.join("\n"))
    }
}

/// 写入文件（高风险，默认需要批准）
pub struct WriteFileTool {
    fs: SafeFs,
}

impl WriteFileTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file. Args: {\"path\": \"relative path\", \"content\": \"file content\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"]
        })
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::High
    }

    async fn execute(&self, args: Value) -> Result<String, CapabilityError> {
        let path = str_arg(&args, "path")
            .ok_or_else(|| CapabilityError::Malformed("write_file requires path".into()))?;
        let content = str_arg(&args, "content").unwrap_or("");
        tracing::info!(path = %path, bytes = content.len(), "write_file tool execute");
        let written = self.fs.write_file(path, content)?;
        Ok(format!("Wrote {written} bytes to {path}"))
    }
}
