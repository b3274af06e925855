//! 优雅关闭：统一的关闭信号与退出前的账本收尾

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::ledger::Ledger;

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// /quit 或输入流结束
    UserInitiated,
    /// Ctrl+C / SIGTERM
    Signal,
    FatalError(String),
}

/// 关闭信号管理器
#[derive(Clone)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason_tx: broadcast::Sender<ShutdownReason>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason_tx, _) = broadcast::channel(1);
        Self {
            token: CancellationToken::new(),
            reason_tx,
        }
    }

    /// 传给会话循环的取消令牌
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        if !self.token.is_cancelled() {
            tracing::info!("Shutting down: {:?}", reason);
        }
        let _ = self.reason_tx.send(reason);
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.reason_tx.subscribe()
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                manager.shutdown(ShutdownReason::Signal);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }

    /// 退出前合并账本 WAL；失败只告警
    pub fn finish(&self, ledger: &Ledger) {
        match ledger.checkpoint() {
            Ok(()) => tracing::info!("Ledger checkpointed"),
            Err(e) => tracing::warn!("Ledger checkpoint failed: {}", e),
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_cancels_token_and_broadcasts() {
        let manager = ShutdownManager::new();
        let mut reasons = manager.subscribe();
        let token = manager.token();

        manager.shutdown(ShutdownReason::UserInitiated);
        assert!(token.is_cancelled());
        assert!(manager.is_shutdown());
        assert_eq!(reasons.recv().await.unwrap(), ShutdownReason::UserInitiated);
    }

    #[test]
    fn test_finish_on_disk_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("office.db")).unwrap();
        ledger.append_diary("session", None, "bye").unwrap();
        ShutdownManager::new().finish(&ledger);
        assert_eq!(ledger.diary_len().unwrap(), 1);
    }
}
