//! Office - Agent 办公室会话入口
//!
//! 入口：初始化日志、加载配置、装配会话，并把 stdin 的每一行转成会话命令。
//! y/yes/да 确认，n/no/нет 拒绝，/run <计划任务 id>、/status <handle>、/briefing、/quit；
//! 其余文本作为新任务。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use office::config::{load_config, AppConfig};
use office::core::{spawn_session, Command, SessionBuilder, ShutdownManager, ShutdownReason};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    office::observability::init();

    // 可选参数：额外的配置文件
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    let mut reasons = shutdown.subscribe();

    let controller = SessionBuilder::new(cfg)
        .build()
        .context("Failed to build session")?;
    let ledger = controller.ledger().clone();
    let (cmd_tx, view_rx, mut events, session) = spawn_session(controller, shutdown.clone());

    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!("{}\n", event.render()),
                Err(RecvError::Lagged(n)) => tracing::warn!("Dropped {} session events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let token = shutdown.token();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = token.cancelled() => break,
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };
        let Some(line) = line else {
            break;
        };
        let Some(cmd) = Command::parse(&line) else {
            continue;
        };
        let quit = matches!(cmd, Command::Quit);
        if cmd_tx.send(cmd).is_err() || quit {
            break;
        }
    }

    let _ = cmd_tx.send(Command::Quit);
    session.await.context("Session task panicked")?;
    if !shutdown.is_shutdown() {
        shutdown.shutdown(ShutdownReason::UserInitiated);
    }
    let _ = printer.await;

    tracing::info!("Session ended in phase {}", view_rx.borrow().phase);
    shutdown.finish(&ledger);
    match reasons.try_recv() {
        Ok(ShutdownReason::FatalError(reason)) => anyhow::bail!("Session stopped: {}", reason),
        _ => Ok(()),
    }
}
