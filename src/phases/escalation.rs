//! 人工升级：步数耗尽仍未达标时，向人展示情况报告与固定菜单
//!
//! 菜单：继续并附加指导 / 换一种方法 / 接受部分结果 / 查看技术细节 / 取消。
//! HumanGuidance 是唯一的接入点：CLI 读 stdin，注册表走 ChannelGuidance，测试用 FixedGuidance。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// 人工选项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "choice", content = "guidance", rename_all = "snake_case")]
pub enum HumanChoice {
    ContinueWithGuidance(String),
    TryAlternative,
    AcceptPartial,
    RequestTechnicalDetail,
    Cancel,
}

impl HumanChoice {
    /// 解析菜单输入：编号 1-5 或关键词；"continue <指导>" / "1 <指导>" 携带指导文本
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let (head, rest) = match input.split_once(char::is_whitespace) {
            Some((h, r)) => (h, r.trim()),
            None => (input, ""),
        };
        let choice = match head.to_lowercase().as_str() {
            "1" | "continue" | "c" => HumanChoice::ContinueWithGuidance(rest.to_string()),
            "2" | "alternative" | "alt" => HumanChoice::TryAlternative,
            "3" | "accept" => HumanChoice::AcceptPartial,
            "4" | "detail" | "details" => HumanChoice::RequestTechnicalDetail,
            "5" | "cancel" | "quit" | "q" => HumanChoice::Cancel,
            _ => return None,
        };
        Some(choice)
    }
}

/// 交给人的情况报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SituationReport {
    pub session_id: String,
    pub rendered: String,
    /// 技术细节视图
    pub technical: bool,
    pub round: u32,
}

#[async_trait]
pub trait HumanGuidance: Send + Sync {
    /// None 表示无人响应（超时 / 渠道关闭 / 取消）
    async fn consult(&self, report: &SituationReport) -> Option<HumanChoice>;
}

/// 预置答案（测试与非交互运行）
#[derive(Debug, Default)]
pub struct FixedGuidance {
    choices: Mutex<VecDeque<HumanChoice>>,
    seen: Mutex<Vec<SituationReport>>,
}

impl FixedGuidance {
    pub fn new(choices: impl IntoIterator<Item = HumanChoice>) -> Self {
        Self {
            choices: Mutex::new(choices.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// 已收到的报告
    pub fn reports(&self) -> Vec<SituationReport> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl HumanGuidance for FixedGuidance {
    async fn consult(&self, report: &SituationReport) -> Option<HumanChoice> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(report.clone());
        }
        self.choices.lock().ok()?.pop_front()
    }
}

/// 基于通道的人工渠道：当前报告通过 watch 暴露，选择经 mpsc 送回
pub struct ChannelGuidance {
    choices: tokio::sync::Mutex<mpsc::UnboundedReceiver<HumanChoice>>,
    pending: watch::Sender<Option<SituationReport>>,
    cancel: CancellationToken,
    wait: Option<Duration>,
}

/// ChannelGuidance 的外部句柄
pub struct GuidanceHandle {
    pub choice_tx: mpsc::UnboundedSender<HumanChoice>,
    pub pending_rx: watch::Receiver<Option<SituationReport>>,
}

impl ChannelGuidance {
    pub fn new(cancel: CancellationToken, wait: Option<Duration>) -> (Self, GuidanceHandle) {
        let (choice_tx, choice_rx) = mpsc::unbounded_channel();
        let (pending, pending_rx) = watch::channel(None);
        (
            Self {
                choices: tokio::sync::Mutex::new(choice_rx),
                pending,
                cancel,
                wait,
            },
            GuidanceHandle {
                choice_tx,
                pending_rx,
            },
        )
    }
}

#[async_trait]
impl HumanGuidance for ChannelGuidance {
    async fn consult(&self, report: &SituationReport) -> Option<HumanChoice> {
        self.pending.send_replace(Some(report.clone()));
        let mut rx = self.choices.lock().await;
        let wait = self.wait;
        let deadline = async move {
            match wait {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        let choice = tokio::select! {
            c = rx.recv() => c,
            _ = self.cancel.cancelled() => None,
            _ = deadline => None,
        };
        self.pending.send_replace(None);
        choice
    }
}
