//! bee-pilot 命令行入口
//!
//! 单次运行一条请求：分类 -> 五阶段状态机 -> 输出 final_report。
//! --interactive 时步数耗尽会在终端展示情况报告并读取菜单选择；
//! --events 把阶段事件以 JSON 行打印到 stdout。

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};

use bee_pilot::agent::AgentComponents;
use bee_pilot::config::load_config;
use bee_pilot::core::{SessionSnapshot, SessionSupervisor};
use bee_pilot::phases::{
    resume_session, run_session, HumanChoice, HumanGuidance, PhaseEvent, PhaseSession,
    SituationReport,
};

#[derive(Parser, Debug)]
#[command(name = "bee-pilot", version, about = "Autonomous plan/gather/execute/evaluate/respond agent")]
struct Cli {
    /// 额外的 TOML 配置文件
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 工作区根目录（覆盖 [app].workspace_root）
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// LLM 后端：deepseek / openai / mock
    #[arg(long)]
    provider: Option<String>,

    /// 步数耗尽时在终端询问人工
    #[arg(short, long)]
    interactive: bool,

    /// 以 JSON 行输出阶段事件
    #[arg(long)]
    events: bool,

    /// 结束后把会话快照写到此路径
    #[arg(long)]
    save_snapshot: Option<PathBuf>,

    /// 从快照继续（忽略 request）
    #[arg(long)]
    resume: Option<PathBuf>,

    /// 日志级别（RUST_LOG 优先）
    #[arg(long, default_value = "info")]
    log_level: String,

    /// 请求文本
    request: Vec<String>,
}

/// 从 stdin 读取菜单选择
struct StdinGuidance {
    lines: Mutex<tokio::io::Lines<BufReader<tokio::io::Stdin>>>,
}

impl StdinGuidance {
    fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

#[async_trait]
impl HumanGuidance for StdinGuidance {
    async fn consult(&self, report: &SituationReport) -> Option<HumanChoice> {
        eprintln!("\n{}\n", report.rendered);
        let mut lines = self.lines.lock().await;
        loop {
            eprint!("choice> ");
            let _ = std::io::stderr().flush();
            let line = match lines.next_line().await {
                Ok(Some(l)) => l,
                _ => return None,
            };
            match HumanChoice::parse(&line) {
                Some(choice) => return Some(choice),
                None => eprintln!("unrecognized choice: {}", line.trim()),
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    bee_pilot::observability::init(&cli.log_level)?;

    let mut config = load_config(cli.config.clone()).context("Failed to load config")?;
    if let Some(ws) = &cli.workspace {
        config.app.workspace_root = Some(ws.clone());
    }
    if let Some(p) = &cli.provider {
        config.llm.provider = p.clone();
    }
    let components = Arc::new(AgentComponents::from_config(config).context("Failed to build agent")?);

    let supervisor = SessionSupervisor::new();
    let ctrl_c = supervisor.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling session");
            ctrl_c.cancel();
        }
    });

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<PhaseEvent>();
    let print_events = cli.events;
    let printer = tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            if print_events {
                if let Ok(line) = serde_json::to_string(&ev) {
                    println!("{line}");
                }
            }
        }
    });

    let stdin_guidance = StdinGuidance::new();
    let mut ps = PhaseSession::new(&components, &supervisor).with_event_tx(&event_tx);
    if cli.interactive {
        ps = ps.with_guidance(&stdin_guidance);
    }

    let outcome = match &cli.resume {
        Some(path) => {
            let snapshot = SessionSnapshot::load(path).context("Failed to load snapshot")?;
            resume_session(&ps, snapshot).await?
        }
        None => {
            let request = cli.request.join(" ");
            if request.trim().is_empty() {
                anyhow::bail!("no request given (pass it as arguments or use --resume)");
            }
            let (session, objective) = components.new_session(&request);
            run_session(&ps, session, objective).await?
        }
    };
    drop(ps);
    drop(event_tx);
    let _ = printer.await;

    if let Some(path) = &cli.save_snapshot {
        SessionSnapshot::capture(&outcome.session, &outcome.objective)
            .save(path)
            .context("Failed to save snapshot")?;
    }

    println!("{}", outcome.report);
    let (prompt, completion, total) = components.text.token_usage();
    tracing::info!(prompt, completion, total, "token usage");
    Ok(())
}
