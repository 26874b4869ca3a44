//! bee-pilot - 自主任务执行智能体
//!
//! 模块划分：
//! - **agent**: 共享组件构建与单次请求运行
//! - **capability**: 文本生成、资源读取/搜索、输出规范化、报告渲染
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 状态、体征、Governor、会话、注册表、快照、错误与恢复
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 单次请求的对话历史
//! - **objective**: 任务分类与目标追踪
//! - **phases**: Plan / Gather / Execute / Evaluate / Respond 与状态机驱动
//! - **tools**: 风险分级的沙箱工具与执行器

pub mod agent;
pub mod capability;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod objective;
pub mod observability;
pub mod phases;
pub mod tools;
