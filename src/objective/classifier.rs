//! 任务类型识别：根据请求文本推断 TaskProfile
//!
//! 纯关键词规则，无状态，可在会话间共享。

use serde::{Deserialize, Serialize};

/// 任务类型；每种类型对应一个基础步数（见 [governor.base_loops]）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskProfile {
    /// 闲聊/问候
    GeneralChat,
    /// 事实性问答
    InformationRequest,
    /// 在工作区查找内容
    Search,
    /// 操作指导、建议
    Guidance,
    /// 分析/比较/评审
    Analysis,
    /// 修改已有内容
    Modification,
    /// 新建内容
    Creation,
}

impl TaskProfile {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskProfile::GeneralChat => "general_chat",
            TaskProfile::InformationRequest => "information_request",
            TaskProfile::Search => "search",
            TaskProfile::Guidance => "guidance",
            TaskProfile::Analysis => "analysis",
            TaskProfile::Modification => "modification",
            TaskProfile::Creation => "creation",
        }
    }
}

impl std::fmt::Display for TaskProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const CREATION_KEYWORDS: &[&str] = &[
    "create", "write a", "write an", "generate", "build", "implement", "scaffold", "draft",
    "新建", "创建", "写一个", "写个", "生成", "实现",
];

const MODIFICATION_KEYWORDS: &[&str] = &[
    "modify", "change", "update", "edit", "fix", "refactor", "rename", "replace", "remove",
    "delete", "修改", "更新", "修复", "重构", "删除", "替换",
];

const ANALYSIS_KEYWORDS: &[&str] = &[
    "analyze", "analyse", "analysis", "compare", "review", "evaluate", "assess", "explain why",
    "diagnose", "分析", "比较", "评审", "评估", "为什么",
];

const SEARCH_KEYWORDS: &[&str] = &[
    "find", "search", "locate", "grep", "look for", "where is", "which file", "查找", "搜索",
    "在哪",
];

const GUIDANCE_KEYWORDS: &[&str] = &[
    "how do i", "how to", "how can i", "should i", "recommend", "advice", "best way", "steps to",
    "如何", "怎么", "建议",
];

const INFORMATION_KEYWORDS: &[&str] = &[
    "what is", "what are", "who is", "when", "define", "describe", "tell me about", "list",
    "show", "read", "是什么", "介绍",
];

const CHAT_KEYWORDS: &[&str] = &[
    "hello", "hi ", "hey", "thanks", "thank you", "how are you", "good morning", "bye",
    "你好", "谢谢", "早上好",
];

/// 任务类型检测器
#[derive(Debug, Default, Clone, Copy)]
pub struct TaskClassifier;

impl TaskClassifier {
    pub fn new() -> Self {
        Self
    }

    /// 按优先级匹配：创建 > 修改 > 分析 > 搜索 > 指导 > 问答 > 闲聊；都不匹配时按长度判断
    pub fn classify(&self, request: &str) -> TaskProfile {
        let content = format!("{} ", request.trim().to_lowercase());

        if contains_any(&content, CREATION_KEYWORDS) {
            return TaskProfile::Creation;
        }
        if contains_any(&content, MODIFICATION_KEYWORDS) {
            return TaskProfile::Modification;
        }
        if contains_any(&content, ANALYSIS_KEYWORDS) {
            return TaskProfile::Analysis;
        }
        if contains_any(&content, SEARCH_KEYWORDS) {
            return TaskProfile::Search;
        }
        if contains_any(&content, GUIDANCE_KEYWORDS) {
            return TaskProfile::Guidance;
        }
        if contains_any(&content, INFORMATION_KEYWORDS) {
            return TaskProfile::InformationRequest;
        }
        if contains_any(&content, CHAT_KEYWORDS) {
            return TaskProfile::GeneralChat;
        }

        // 短消息倾向于闲聊
        if content.chars().count() < 40 && !content.contains('?') {
            TaskProfile::GeneralChat
        } else {
            TaskProfile::InformationRequest
        }
    }
}

fn contains_any(content: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| content.contains(k))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_profiles() {
        let c = TaskClassifier::new();
        assert_eq!(c.classify("hello there, how are you?"), TaskProfile::GeneralChat);
        assert_eq!(
            c.classify("Create a CLI tool that converts CSV to JSON"),
            TaskProfile::Creation
        );
        assert_eq!(c.classify("fix the typo in README.md"), TaskProfile::Modification);
        assert_eq!(
            c.classify("Analyze the error handling in src/lib.rs"),
            TaskProfile::Analysis
        );
        assert_eq!(c.classify("find every TODO in the workspace"), TaskProfile::Search);
        assert_eq!(c.classify("how do I configure logging?"), TaskProfile::Guidance);
        assert_eq!(c.classify("what is a pacemaker?"), TaskProfile::InformationRequest);
    }

    #[test]
    fn test_chinese_keywords() {
        let c = TaskClassifier::new();
        assert_eq!(c.classify("你好"), TaskProfile::GeneralChat);
        assert_eq!(c.classify("帮我写一个脚本"), TaskProfile::Creation);
        assert_eq!(c.classify("分析一下这个日志"), TaskProfile::Analysis);
    }

    #[test]
    fn test_short_message_defaults_to_chat() {
        let c = TaskClassifier::new();
        assert_eq!(c.classify("ok"), TaskProfile::GeneralChat);
        assert_eq!(c.classify(""), TaskProfile::GeneralChat);
    }
}
