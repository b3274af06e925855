//! 会话控制器：预检、提案、确认后派发或交接
//!
//! 一个会话同一时刻最多一个提案；派发后不等待执行完成，追踪由 ExecutionTracker 异步完成。

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::core::recovery::{describe, propagation};
use crate::core::{OfficeError, Proposal, Propagation, Result, SessionPhase, SessionView};
use crate::dispatch::{Confirmation, Dispatch, Dispatcher, HandOffInstruction};
use crate::executor::{ExecutionHandle, ExecutionSummary, TaskPayload};
use crate::ledger::{Ledger, Lifecycle, RunStatus, TaskRun, TaskStatus};
use crate::router::RouteTable;
use crate::tracker::ExecutionTracker;

const SESSION_AGENT: &str = "session";

/// 启动预检结果
#[derive(Debug, Clone, Serialize)]
pub struct PreflightReport {
    pub executor_available: bool,
    pub failures: Vec<ExecutionSummary>,
    /// 本次新对账为 errored 的 TaskRun 数
    pub reconciled: usize,
}

impl PreflightReport {
    pub fn render(&self) -> String {
        if !self.executor_available {
            return "⚠️ Executor unreachable, pre-flight check skipped".to_string();
        }
        if self.failures.is_empty() {
            return "✅ No unresolved failures".to_string();
        }
        let mut out = format!("💥 Unresolved failures: {}\n", self.failures.len());
        for f in &self.failures {
            out.push_str(&format!(
                "  {} [{}] {}\n",
                f.handle,
                f.workflow_id.as_deref().unwrap_or("-"),
                f.native_status
            ));
        }
        out
    }
}

/// 确认后的结果
#[derive(Debug, Clone, Serialize)]
pub enum SessionOutcome {
    Dispatched { handle: ExecutionHandle, run: TaskRun },
    HandedOff(HandOffInstruction),
}

pub struct SessionController {
    ledger: Arc<Ledger>,
    router: RouteTable,
    dispatcher: Dispatcher,
    tracker: ExecutionTracker,
    preflight_limit: usize,
    phase: SessionPhase,
    proposal: Option<Proposal>,
    last_handle: Option<ExecutionHandle>,
    last_error: Option<String>,
    started: bool,
}

impl SessionController {
    pub fn new(
        ledger: Arc<Ledger>,
        router: RouteTable,
        dispatcher: Dispatcher,
        tracker: ExecutionTracker,
    ) -> Self {
        Self {
            ledger,
            router,
            dispatcher,
            tracker,
            preflight_limit: 5,
            phase: SessionPhase::Idle,
            proposal: None,
            last_handle: None,
            last_error: None,
            started: false,
        }
    }

    pub fn with_preflight_limit(mut self, limit: usize) -> Self {
        self.preflight_limit = limit;
        self
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            phase: self.phase,
            proposal: self.proposal.clone(),
            last_handle: self.last_handle.clone(),
            error_message: self.last_error.clone(),
        }
    }

    fn move_to(&mut self, next: SessionPhase) -> Result<()> {
        if !self.phase.can_advance_to(next) {
            return Err(OfficeError::InvalidTransition {
                entity: "session",
                id: 0,
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        tracing::info!("Session: {} -> {}", self.phase, next);
        self.phase = next;
        Ok(())
    }

    /// 启动预检：拉取最近失败的执行并对账。执行器不可达只记日记，不阻塞会话。
    pub async fn start(&mut self) -> Result<PreflightReport> {
        if self.started {
            return Err(OfficeError::InvalidTransition {
                entity: "session",
                id: 0,
                from: self.phase.to_string(),
                to: SessionPhase::AwaitingTask.to_string(),
            });
        }

        let report = match self.tracker.unresolved_failures(self.preflight_limit).await {
            Ok(failures) => {
                let reconciled = self.tracker.reconcile(&self.ledger, &failures)?;
                self.ledger.append_diary(
                    SESSION_AGENT,
                    Some("preflight"),
                    &format!("{} unresolved failure(s), {} reconciled", failures.len(), reconciled),
                )?;
                PreflightReport {
                    executor_available: true,
                    failures,
                    reconciled,
                }
            }
            Err(e) if propagation(&e) == Propagation::Soft => {
                tracing::warn!("{}", describe(&e));
                self.ledger.append_diary(SESSION_AGENT, Some(e.kind()), &e.to_string())?;
                PreflightReport {
                    executor_available: false,
                    failures: Vec::new(),
                    reconciled: 0,
                }
            }
            Err(e) => return Err(e),
        };

        self.move_to(SessionPhase::AwaitingTask)?;
        self.started = true;
        Ok(report)
    }

    /// 接收任务描述并给出提案；Idle 时（上一个任务已结束）自动回到 AwaitingTask
    pub async fn submit(&mut self, task: &str) -> Result<Proposal> {
        self.propose(task, None)
    }

    /// 以 pending 的计划任务发起提案；确认后任务进入 in_progress
    pub async fn propose_scheduled(&mut self, id: i64) -> Result<Proposal> {
        let task = self.ledger.scheduled_task(id)?;
        if !task.status.can_advance_to(TaskStatus::InProgress) {
            return Err(OfficeError::InvalidTransition {
                entity: "scheduled_task",
                id,
                from: task.status.to_string(),
                to: TaskStatus::InProgress.to_string(),
            });
        }
        self.propose(&task.title, Some(id))
    }

    fn propose(&mut self, task: &str, scheduled_task: Option<i64>) -> Result<Proposal> {
        let task = task.trim();
        if self.started && self.phase == SessionPhase::Idle {
            self.move_to(SessionPhase::AwaitingTask)?;
        }
        if self.phase != SessionPhase::AwaitingTask {
            return Err(OfficeError::InvalidTransition {
                entity: "session",
                id: 0,
                from: self.phase.to_string(),
                to: SessionPhase::Proposed.to_string(),
            });
        }
        if task.is_empty() {
            return Err(OfficeError::Validation("task description is empty".into()));
        }

        let decision = self.router.route(task);
        self.ledger.append_diary(
            SESSION_AGENT,
            Some("proposal"),
            &format!("{} -> {} {}: {}", task, decision.mode, decision.target, decision.rationale),
        )?;
        let proposal = Proposal {
            task: task.to_string(),
            decision,
            scheduled_task,
            proposed_at: Utc::now(),
        };
        self.move_to(SessionPhase::Proposed)?;
        self.proposal = Some(proposal.clone());
        self.last_error = None;
        Ok(proposal)
    }

    /// 请求者确认：自主任务派发并记录句柄，交互任务生成交接说明；两者都回到 Idle
    pub async fn confirm(&mut self) -> Result<SessionOutcome> {
        let proposal = match (self.phase, self.proposal.take()) {
            (SessionPhase::Proposed, Some(p)) => p,
            (_, stale) => {
                self.proposal = stale;
                return Err(OfficeError::InvalidTransition {
                    entity: "session",
                    id: 0,
                    from: self.phase.to_string(),
                    to: SessionPhase::Dispatching.to_string(),
                });
            }
        };

        if !proposal.decision.is_autonomous() {
            self.move_to(SessionPhase::HandedOff)?;
            let outcome = self.hand_off(&proposal);
            self.move_to(SessionPhase::Idle)?;
            return outcome;
        }

        self.move_to(SessionPhase::Dispatching)?;
        // 句柄写入账本之后才回到 Idle；失败的提案不保留，重试需作为新任务提交
        let outcome = self.dispatch_confirmed(&proposal).await;
        self.move_to(SessionPhase::Idle)?;
        if let Err(e) = &outcome {
            self.ledger.append_diary(SESSION_AGENT, Some(e.kind()), &e.to_string())?;
            self.last_error = Some(describe(e));
        }
        outcome
    }

    fn hand_off(&self, proposal: &Proposal) -> Result<SessionOutcome> {
        let instruction = self.dispatcher.hand_off(&proposal.decision, &proposal.task);
        self.ledger.append_diary(
            SESSION_AGENT,
            Some("handed_off"),
            &format!("{} -> {}", proposal.task, instruction.agent),
        )?;
        if let Some(id) = proposal.scheduled_task {
            self.ledger.advance_scheduled_task(SESSION_AGENT, id, TaskStatus::InProgress)?;
        }
        Ok(SessionOutcome::HandedOff(instruction))
    }

    /// 预留 TaskRun -> 带 taskId 提交 -> 记录句柄（-> 启动计划任务）
    async fn dispatch_confirmed(&mut self, proposal: &Proposal) -> Result<SessionOutcome> {
        let decision = &proposal.decision;
        let confirmation = Confirmation::record(decision);
        let run = self.ledger.reserve_run(&proposal.task, &decision.target)?;
        let payload = TaskPayload::new(proposal.task.as_str()).with_task_id(run.id);

        let handle = match self.dispatcher.dispatch(decision, &payload, Some(&confirmation)).await {
            Ok(Dispatch::Submitted(handle)) => handle,
            Ok(Dispatch::HandOff(instruction)) => {
                self.ledger.advance_run(run.id, RunStatus::Errored, Some("handed off, not submitted"))?;
                return Ok(SessionOutcome::HandedOff(instruction));
            }
            Err(e) => {
                self.ledger.advance_run(run.id, RunStatus::Errored, Some(&e.to_string()))?;
                return Err(e);
            }
        };

        let run = self.ledger.attach_handle(run.id, handle.as_str())?;
        if let Some(id) = proposal.scheduled_task {
            self.ledger.start_scheduled_task(SESSION_AGENT, id, run.id)?;
        }
        self.last_handle = Some(handle.clone());
        Ok(SessionOutcome::Dispatched { handle, run })
    }

    /// 拒绝提案：丢弃并回到 Idle
    pub fn decline(&mut self) -> Result<()> {
        if self.phase != SessionPhase::Proposed {
            return Err(OfficeError::InvalidTransition {
                entity: "session",
                id: 0,
                from: self.phase.to_string(),
                to: SessionPhase::Idle.to_string(),
            });
        }
        let task = self.proposal.take().map(|p| p.task).unwrap_or_default();
        self.ledger
            .append_diary(SESSION_AGENT, Some("proposal_declined"), &task)?;
        self.move_to(SessionPhase::Idle)
    }

    /// 查询某个句柄的执行状态并生成摘要
    pub async fn status(&self, handle: &ExecutionHandle) -> Result<String> {
        if handle.as_str().trim().is_empty() {
            return Err(OfficeError::Validation("execution handle is empty".into()));
        }
        self.tracker.sync(&self.ledger, handle).await
    }

    /// 账本简报，附带执行器概览（不可达时省略）
    pub async fn briefing(&self) -> Result<String> {
        let mut text = self.ledger.briefing(10)?.render();
        match self.tracker.overview(20).await {
            Ok(overview) => text.push_str(&overview.render()),
            Err(e) if propagation(&e) == Propagation::Soft => {
                text.push_str(&describe(&e));
            }
            Err(e) => return Err(e),
        }
        Ok(text)
    }
}
