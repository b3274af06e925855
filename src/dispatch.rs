//! 派发器：把已确认的自主任务提交给流水线，或为交互任务生成交接说明
//!
//! 派发器自身不重试（at-most-once）；没有确认标记时拒绝提交。

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::core::{OfficeError, Result};
use crate::executor::{ExecutionHandle, ExecutorError, PipelineExecutor, TaskPayload};
use crate::ledger::Ledger;
use crate::router::{Mode, RoutingDecision};

/// 人工确认标记：只对记录时的那个目标有效
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Confirmation {
    pub id: Uuid,
    pub mode: Mode,
    pub target: String,
    pub confirmed_at: DateTime<Utc>,
}

impl Confirmation {
    pub fn record(decision: &RoutingDecision) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode: decision.mode,
            target: decision.target.clone(),
            confirmed_at: Utc::now(),
        }
    }

    pub fn covers(&self, decision: &RoutingDecision) -> bool {
        self.mode == decision.mode && self.target == decision.target
    }
}

/// 交互任务的交接说明
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandOffInstruction {
    pub agent: String,
    /// Agent 的工作上下文目录
    pub context_path: PathBuf,
    pub task: String,
}

impl HandOffInstruction {
    pub fn render(&self) -> String {
        format!(
            "🧑‍💻 Hand-off to {}\n📂 cd {}\n📝 {}",
            self.agent,
            self.context_path.display(),
            self.task
        )
    }
}

/// 派发结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dispatch {
    Submitted(ExecutionHandle),
    HandOff(HandOffInstruction),
}

pub struct Dispatcher {
    executor: Arc<dyn PipelineExecutor>,
    ledger: Arc<Ledger>,
    agents_root: PathBuf,
    callback_url: Option<String>,
}

impl Dispatcher {
    pub fn new(executor: Arc<dyn PipelineExecutor>, ledger: Arc<Ledger>, agents_root: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            ledger,
            agents_root: agents_root.into(),
            callback_url: None,
        }
    }

    /// 流水线完成后回调的地址，随载荷提交
    pub fn with_callback_url(mut self, url: Option<String>) -> Self {
        self.callback_url = url;
        self
    }

    pub fn hand_off(&self, decision: &RoutingDecision, task: &str) -> HandOffInstruction {
        HandOffInstruction {
            agent: decision.target.clone(),
            context_path: self.agents_root.join(&decision.target),
            task: task.to_string(),
        }
    }

    /// 自主任务需要覆盖该决策的确认标记；交互任务只生成交接说明
    pub async fn dispatch(
        &self,
        decision: &RoutingDecision,
        payload: &TaskPayload,
        confirmation: Option<&Confirmation>,
    ) -> Result<Dispatch> {
        if decision.mode == Mode::Interactive {
            return Ok(Dispatch::HandOff(self.hand_off(decision, &payload.task)));
        }

        if !confirmation.is_some_and(|c| c.covers(decision)) {
            let err = OfficeError::NotConfirmed {
                target: decision.target.clone(),
            };
            tracing::error!("{}", err);
            self.ledger.append_diary("dispatcher", Some(err.kind()), &err.to_string())?;
            return Err(err);
        }

        let mut payload = payload.clone();
        if payload.callback_url.is_none() {
            payload = payload.with_callback(self.callback_url.clone());
        }

        match self.executor.submit(&decision.target, &payload).await {
            Ok(handle) => Ok(Dispatch::Submitted(handle)),
            Err(ExecutorError::UnknownPipeline(name)) => Err(OfficeError::UnknownPipeline(name)),
            Err(e) => {
                tracing::warn!("Submission to '{}' failed: {}", decision.target, e);
                Err(OfficeError::DispatchFailed {
                    pipeline: decision.target.clone(),
                    cause: e.to_string(),
                })
            }
        }
    }
}
