//! 工具箱：风险分级的工具 trait、注册表、带超时与审计的执行器，以及沙箱文件/搜索工具

pub mod executor;
pub mod filesystem;
pub mod registry;
pub mod schema;
pub mod search;

use std::path::Path;

pub use executor::ToolExecutor;
pub use filesystem::{ListDirTool, ReadFileTool, SafeFs, WriteFileTool};
pub use registry::{RiskLevel, Tool, ToolRegistry};
pub use schema::tool_call_schema_json;
pub use search::{search_workspace, SearchFilesTool};

use crate::config::ToolsSection;

/// 以 workspace 为根注册内置工具：read_file / list_dir / search_files / write_file
pub fn default_registry(workspace: &Path, cfg: &ToolsSection) -> ToolRegistry {
    let root = cfg.filesystem_root.as_deref().unwrap_or(workspace);
    let fs = SafeFs::new(root);
    let mut registry = ToolRegistry::new();
    registry.register(ReadFileTool::new(fs.clone(), cfg.max_read_bytes));
    registry.register(ListDirTool::new(fs.clone()));
    registry.register(SearchFilesTool::new(fs.clone(), cfg.max_search_results));
    registry.register(WriteFileTool::new(fs));
    registry
}
