//! 会话编排：主控循环
//!
//! 建立 cmd / view / event 三通道，在后台任务中先做启动预检，
//! 再逐条消费命令（Submit/RunScheduled/Confirm/Decline/Status/Briefing/Quit）驱动 SessionController。
//! 致命错误经 ShutdownManager 以 FatalError 结束整个进程。

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::core::recovery::{describe, propagation};
use crate::core::{
    OfficeError, Propagation, SessionController, SessionOutcome, SessionView, ShutdownManager, ShutdownReason,
};
use crate::dispatch::HandOffInstruction;
use crate::executor::ExecutionHandle;
use crate::router::RoutingDecision;

/// 从交互界面发往会话的命令
#[derive(Debug, Clone)]
pub enum Command {
    /// 提交任务描述，得到提案
    Submit(String),
    /// 以计划任务发起提案
    RunScheduled(i64),
    /// 确认当前提案
    Confirm,
    /// 拒绝当前提案
    Decline,
    /// 查询执行句柄
    Status(String),
    Briefing,
    Quit,
    /// 命令参数不合法，回显用法
    Usage(&'static str),
}

impl Command {
    /// 解析一行终端输入；空行返回 None，其余非命令文本都作为任务提交
    pub fn parse(line: &str) -> Option<Command> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let cmd = match line.to_lowercase().as_str() {
            "y" | "yes" | "да" => Command::Confirm,
            "n" | "no" | "нет" => Command::Decline,
            "/briefing" => Command::Briefing,
            "/quit" | "/exit" => Command::Quit,
            _ => {
                if let Some(rest) = command_arg(line, "/status") {
                    match rest {
                        "" => Command::Usage("usage: /status <handle>"),
                        handle => Command::Status(handle.to_string()),
                    }
                } else if let Some(rest) = command_arg(line, "/run") {
                    match rest.parse() {
                        Ok(id) => Command::RunScheduled(id),
                        Err(_) => Command::Usage("usage: /run <scheduled task id>"),
                    }
                } else {
                    Command::Submit(line.to_string())
                }
            }
        };
        Some(cmd)
    }
}

/// 会话向界面广播的事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Preflight { text: String },
    Proposed { decision: RoutingDecision, text: String },
    Dispatched { handle: ExecutionHandle, run_id: i64 },
    HandedOff(HandOffInstruction),
    Declined,
    Report { text: String },
    Error { kind: &'static str, message: String },
}

impl SessionEvent {
    /// 终端展示文本
    pub fn render(&self) -> String {
        match self {
            SessionEvent::Preflight { text } | SessionEvent::Report { text } => text.clone(),
            SessionEvent::Proposed { text, .. } => text.clone(),
            SessionEvent::Dispatched { handle, run_id } => {
                format!("🚀 Dispatched, tracking handle {handle} (run #{run_id})")
            }
            SessionEvent::HandedOff(instruction) => instruction.render(),
            SessionEvent::Declined => "🗑️ Proposal discarded".to_string(),
            SessionEvent::Error { message, .. } => message.clone(),
        }
    }
}

/// `/cmd` 或 `/cmd <arg>` 的参数部分；`/cmdfoo` 不算
fn command_arg<'a>(line: &'a str, command: &str) -> Option<&'a str> {
    match line.strip_prefix(command) {
        Some(rest) if rest.is_empty() || rest.starts_with(' ') => Some(rest.trim()),
        _ => None,
    }
}

fn error_event(err: &OfficeError) -> SessionEvent {
    SessionEvent::Error {
        kind: err.kind(),
        message: describe(err),
    }
}

/// 启动会话任务：返回命令发送端、视图接收端、事件接收端与任务句柄。
/// 触发 `shutdown` 或发送 Quit 都会结束循环。
pub fn spawn_session(
    mut controller: SessionController,
    shutdown: Arc<ShutdownManager>,
) -> (
    mpsc::UnboundedSender<Command>,
    watch::Receiver<SessionView>,
    broadcast::Receiver<SessionEvent>,
    JoinHandle<()>,
) {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (view_tx, view_rx) = watch::channel(SessionView::default());
    let (event_tx, event_rx) = broadcast::channel::<SessionEvent>(32);

    let handle = tokio::spawn(async move {
        let token = shutdown.token();
        match controller.start().await {
            Ok(report) => {
                let _ = event_tx.send(SessionEvent::Preflight { text: report.render() });
            }
            Err(e) => {
                tracing::error!("Session pre-flight failed: {}", e);
                let _ = event_tx.send(error_event(&e));
                shutdown.shutdown(ShutdownReason::FatalError(describe(&e)));
                return;
            }
        }
        let _ = view_tx.send(controller.view());

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                Some(cmd) = cmd_rx.recv() => {
                    let result = match cmd {
                        Command::Submit(task) => controller.submit(&task).await.map(|proposal| {
                            SessionEvent::Proposed {
                                text: proposal.render(),
                                decision: proposal.decision,
                            }
                        }),
                        Command::RunScheduled(id) => controller.propose_scheduled(id).await.map(|proposal| {
                            SessionEvent::Proposed {
                                text: proposal.render(),
                                decision: proposal.decision,
                            }
                        }),
                        Command::Confirm => controller.confirm().await.map(|outcome| match outcome {
                            SessionOutcome::Dispatched { handle, run } => SessionEvent::Dispatched {
                                handle,
                                run_id: run.id,
                            },
                            SessionOutcome::HandedOff(instruction) => SessionEvent::HandedOff(instruction),
                        }),
                        Command::Decline => controller.decline().map(|_| SessionEvent::Declined),
                        Command::Status(handle) => controller
                            .status(&ExecutionHandle::new(handle))
                            .await
                            .map(|text| SessionEvent::Report { text }),
                        Command::Briefing => controller
                            .briefing()
                            .await
                            .map(|text| SessionEvent::Report { text }),
                        Command::Usage(text) => Err(OfficeError::Validation(text.to_string())),
                        Command::Quit => break,
                    };

                    let fatal = match result {
                        Ok(event) => {
                            let _ = event_tx.send(event);
                            None
                        }
                        Err(e) => {
                            let _ = event_tx.send(error_event(&e));
                            (propagation(&e) == Propagation::Fatal).then(|| describe(&e))
                        }
                    };
                    let _ = view_tx.send(controller.view());
                    if let Some(reason) = fatal {
                        tracing::error!("Fatal session error, stopping");
                        shutdown.shutdown(ShutdownReason::FatalError(reason));
                        break;
                    }
                }
                else => break,  // cmd_tx 已关闭，退出循环
            }
        }
        tracing::info!("Session loop finished");
    });

    (cmd_tx, view_rx, event_rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::core::SessionPhase;
    use crate::dispatch::Dispatcher;
    use crate::executor::MockExecutor;
    use crate::ledger::{Horizon, Ledger, Priority, TaskStatus};
    use crate::router::RouteTable;
    use crate::tracker::ExecutionTracker;

    fn controller_with(ledger: Arc<Ledger>) -> SessionController {
        let mock = Arc::new(MockExecutor::new());
        let dispatcher = Dispatcher::new(mock.clone(), ledger.clone(), "agents");
        SessionController::new(ledger, RouteTable::builtin(), dispatcher, ExecutionTracker::new(mock))
    }

    fn controller() -> SessionController {
        controller_with(Arc::new(Ledger::open_in_memory().unwrap()))
    }

    #[test]
    fn test_parse_command() {
        assert!(matches!(Command::parse("ДА"), Some(Command::Confirm)));
        assert!(matches!(Command::parse(" yes "), Some(Command::Confirm)));
        assert!(matches!(Command::parse("нет"), Some(Command::Decline)));
        assert!(matches!(Command::parse("/quit"), Some(Command::Quit)));
        assert!(matches!(Command::parse("/briefing"), Some(Command::Briefing)));
        assert!(matches!(Command::parse("/status exec-3"), Some(Command::Status(h)) if h == "exec-3"));
        assert!(matches!(Command::parse("/statusbar"), Some(Command::Submit(_))));
        assert!(matches!(Command::parse("/run 12"), Some(Command::RunScheduled(12))));
        assert!(matches!(Command::parse("Напиши статью"), Some(Command::Submit(t)) if t == "Напиши статью"));
        assert!(Command::parse("   ").is_none());
    }

    #[test]
    fn test_parse_rejects_missing_arguments() {
        assert!(matches!(Command::parse("/status"), Some(Command::Usage(_))));
        assert!(matches!(Command::parse("/status   "), Some(Command::Usage(_))));
        assert!(matches!(Command::parse("/run"), Some(Command::Usage(_))));
        assert!(matches!(Command::parse("/run weekly"), Some(Command::Usage(_))));
    }

    #[tokio::test]
    async fn test_session_loop_dispatches_after_confirm() {
        let (cmd_tx, view_rx, mut events, handle) =
            spawn_session(controller(), Arc::new(ShutdownManager::new()));

        assert!(matches!(events.recv().await.unwrap(), SessionEvent::Preflight { .. }));

        cmd_tx.send(Command::Submit("Напиши статью про X".into())).unwrap();
        match events.recv().await.unwrap() {
            SessionEvent::Proposed { decision, .. } => assert_eq!(decision.target, "manager-pipeline"),
            other => panic!("unexpected event {:?}", other),
        }

        cmd_tx.send(Command::Confirm).unwrap();
        let dispatched = events.recv().await.unwrap();
        assert!(matches!(dispatched, SessionEvent::Dispatched { .. }));

        cmd_tx.send(Command::Quit).unwrap();
        handle.await.unwrap();
        let view = view_rx.borrow().clone();
        assert_eq!(view.phase, SessionPhase::Idle);
        assert!(view.last_handle.is_some());
    }

    #[tokio::test]
    async fn test_run_scheduled_task_through_loop() {
        let ledger = Arc::new(Ledger::open_in_memory().unwrap());
        let task = ledger
            .create_scheduled_task("planner", "Напиши статью про релиз", Horizon::Day, Priority::Normal)
            .unwrap();
        let (cmd_tx, _view_rx, mut events, handle) =
            spawn_session(controller_with(ledger.clone()), Arc::new(ShutdownManager::new()));
        events.recv().await.unwrap();

        cmd_tx.send(Command::RunScheduled(task.id)).unwrap();
        assert!(matches!(events.recv().await.unwrap(), SessionEvent::Proposed { .. }));
        cmd_tx.send(Command::Confirm).unwrap();
        let run_id = match events.recv().await.unwrap() {
            SessionEvent::Dispatched { run_id, .. } => run_id,
            other => panic!("unexpected event {:?}", other),
        };
        drop(cmd_tx);
        handle.await.unwrap();

        let task = ledger.scheduled_task(task.id).unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.linked_run_id, Some(run_id));
    }

    #[tokio::test]
    async fn test_wrong_phase_command_is_reported() {
        let (cmd_tx, _view_rx, mut events, handle) =
            spawn_session(controller(), Arc::new(ShutdownManager::new()));
        events.recv().await.unwrap();

        cmd_tx.send(Command::Confirm).unwrap();
        match events.recv().await.unwrap() {
            SessionEvent::Error { kind, .. } => assert_eq!(kind, "invalid_transition"),
            other => panic!("unexpected event {:?}", other),
        }

        cmd_tx.send(Command::parse("/status").unwrap()).unwrap();
        match events.recv().await.unwrap() {
            SessionEvent::Error { kind, message } => {
                assert_eq!(kind, "validation");
                assert!(message.contains("/status <handle>"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        drop(cmd_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_fatal_error_shuts_down_with_reason() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("office.db");
        let ledger = Arc::new(Ledger::open(&path).unwrap());
        // 预检写日记时存储失败
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch("DROP TABLE diary;")
            .unwrap();

        let shutdown = Arc::new(ShutdownManager::new());
        let mut reasons = shutdown.subscribe();
        let (_cmd_tx, _view_rx, mut events, handle) = spawn_session(controller_with(ledger), shutdown.clone());

        match events.recv().await.unwrap() {
            SessionEvent::Error { kind, .. } => assert_eq!(kind, "storage"),
            other => panic!("unexpected event {:?}", other),
        }
        handle.await.unwrap();
        assert!(shutdown.is_shutdown());
        assert!(matches!(reasons.recv().await.unwrap(), ShutdownReason::FatalError(_)));
    }

    #[tokio::test]
    async fn test_cancellation_stops_loop() {
        let shutdown = Arc::new(ShutdownManager::new());
        let (_cmd_tx, _view_rx, _events, handle) = spawn_session(controller(), shutdown.clone());
        shutdown.shutdown(ShutdownReason::Signal);
        handle.await.unwrap();
    }
}
