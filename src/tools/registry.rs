//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / risk / execute），由 ToolRegistry 按名注册与查找，
//! ToolExecutor 在调用时加超时并输出审计日志。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::CapabilityError;

/// 工具调用的风险等级；超过配置的自动批准上限时需要人工批准
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、风险等级、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（用于 JSON 中的 "tool" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认不限参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::Medium
    }

    async fn execute(&self, args: Value) -> Result<String, CapabilityError>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>（有序，保证 prompt 稳定）
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// 未注册的工具按 medium 处理
    pub fn risk_of(&self, name: &str) -> RiskLevel {
        self.tools
            .get(name)
            .map(|t| t.risk())
            .unwrap_or(RiskLevel::Medium)
    }

    pub async fn execute(&self, name: &str, args: Value) -> Result<String, CapabilityError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| CapabilityError::NotFound(format!("tool {name}")))?;
        tool.execute(args).await
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// 生成 prompt 中的 Available tools 段落：name [risk]: description
    pub fn describe(&self) -> String {
        self.tools
            .iter()
            .map(|(name, tool)| {
                format!("- {} [{}]: {}", name, tool.risk().as_str(), tool.description())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 工具 schema JSON（含参数 schema）
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|(name, tool)| {
                serde_json::json!({
                    "name": name,
                    "description": tool.description(),
                    "risk": tool.risk(),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Shout;

    #[async_trait]
    impl Tool for Shout {
        fn name(&self) -> &str {
            "shout"
        }

        fn description(&self) -> &str {
            "Upper-cases text"
        }

        fn risk(&self) -> RiskLevel {
            RiskLevel::Low
        }

        async fn execute(&self, args: Value) -> Result<String, CapabilityError> {
            Ok(args
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_uppercase())
        }
    }

    #[tokio::test]
    async fn test_register_and_execute() {
        let mut registry = ToolRegistry::new();
        registry.register(Shout);
        let out = registry
            .execute("shout", serde_json::json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(out, "HI");
        assert_eq!(registry.risk_of("shout"), RiskLevel::Low);
        assert_eq!(registry.risk_of("nope"), RiskLevel::Medium);
        assert!(registry.describe().contains("shout [low]"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let registry = ToolRegistry::new();
        let err = registry.execute("nope", Value::Null).await.unwrap_err();
        assert!(matches!(err, CapabilityError::NotFound(_)));
    }

    #[test]
    fn test_risk_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::High > RiskLevel::Medium);
        let parsed: RiskLevel = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(parsed, RiskLevel::High);
    }
}
