//! 工具调用 JSON Schema 生成（schemars）
//!
//! Execute 阶段把「合法 tool call 批次」的结构注入 system prompt，减少模型输出格式错误。

use schemars::{schema_for, JsonSchema};
use std::collections::HashMap;

/// 单个工具调用：{"tool": "...", "args": {...}}（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，如 read_file、list_dir、search_files、write_file
    pub tool: String,
    /// 工具参数，依工具不同而不同（path、content、query 等）
    pub args: HashMap<String, String>,
}

/// Execute 阶段期望的回复结构
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallBatch {
    /// 按顺序执行的调用
    pub tool_calls: Vec<ToolCallFormat>,
}

/// 返回工具调用批次的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallBatch);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
