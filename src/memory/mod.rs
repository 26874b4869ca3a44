//! 记忆层：单次请求内的只追加对话历史

pub mod conversation;

pub use conversation::{ConversationHistory, Message, Role};
