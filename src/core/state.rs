//! 会话状态：阶段机与对外投影
//!
//! Idle -> AwaitingTask -> Proposed -> {Dispatching | HandedOff} -> Idle。
//! 不存在 Proposed -> AwaitingTask：被拒绝的提案以新任务重新进入。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::executor::ExecutionHandle;
use crate::router::RoutingDecision;

/// 会话阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    AwaitingTask,
    Proposed,
    Dispatching,
    HandedOff,
}

impl SessionPhase {
    pub fn can_advance_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        matches!(
            (self, next),
            (Idle, AwaitingTask)
                | (AwaitingTask, Proposed)
                | (Proposed, Dispatching)
                | (Proposed, HandedOff)
                | (Proposed, Idle)
                | (Dispatching, Idle)
                | (HandedOff, Idle)
        )
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionPhase::Idle => "idle",
            SessionPhase::AwaitingTask => "awaiting_task",
            SessionPhase::Proposed => "proposed",
            SessionPhase::Dispatching => "dispatching",
            SessionPhase::HandedOff => "handed_off",
        })
    }
}

/// 等待确认的提案
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Proposal {
    pub task: String,
    pub decision: RoutingDecision,
    /// 由计划任务发起时的任务 id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_task: Option<i64>,
    pub proposed_at: DateTime<Utc>,
}

impl Proposal {
    /// 原样呈现路由结论与理由，并提示需要确认
    pub fn render(&self) -> String {
        format!("📥 {}\n{}\n❓ Confirm? (y/n)", self.task, self.decision.render())
    }
}

/// 会话的对外投影（watch 通道推送）
#[derive(Clone, Debug, Serialize)]
pub struct SessionView {
    pub phase: SessionPhase,
    pub proposal: Option<Proposal>,
    pub last_handle: Option<ExecutionHandle>,
    pub error_message: Option<String>,
}

impl Default for SessionView {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Idle,
            proposal: None,
            last_handle: None,
            error_message: None,
        }
    }
}
