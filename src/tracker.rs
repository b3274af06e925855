//! 执行追踪器：查询执行器中已完成与进行中的执行，并把结果对账回账本
//!
//! 没有推送式完成通知；状态的新鲜度只取决于调用频率。会话启动时的预检
//! （`unresolved_failures` + `reconcile`）是唯一的自动查询点。
//!
//! 配置了 workflow id 时，列表查询只覆盖本办公室的流水线（每个 workflow 并发查询后合并）。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;

use crate::core::{OfficeError, Result};
use crate::executor::{ExecutionDetail, ExecutionHandle, ExecutionStatus, ExecutionSummary, ExecutorError, PipelineExecutor};
use crate::ledger::{Ledger, Lifecycle, RunStatus};

impl From<ExecutionStatus> for RunStatus {
    fn from(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::Errored => RunStatus::Errored,
            ExecutionStatus::Running => RunStatus::Running,
            ExecutionStatus::Succeeded => RunStatus::Succeeded,
        }
    }
}

fn tracker_error(err: ExecutorError) -> OfficeError {
    match err {
        ExecutorError::NotFound(handle) => OfficeError::not_found("execution", handle),
        other => {
            tracing::warn!("Execution tracker query failed: {}", other);
            OfficeError::ExecutorUnavailable(other.to_string())
        }
    }
}

/// 三态计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionOverview {
    pub errored: usize,
    pub running: usize,
    pub succeeded: usize,
}

impl ExecutionOverview {
    pub fn render(&self) -> String {
        format!(
            "🔄 running: {}  ✅ succeeded: {}  ❌ errored: {}",
            self.running, self.succeeded, self.errored
        )
    }
}

pub struct ExecutionTracker {
    executor: Arc<dyn PipelineExecutor>,
    /// 流水线名 -> workflow id；为空时不按 workflow 过滤
    workflows: BTreeMap<String, String>,
}

impl ExecutionTracker {
    pub fn new(executor: Arc<dyn PipelineExecutor>) -> Self {
        Self {
            executor,
            workflows: BTreeMap::new(),
        }
    }

    pub fn with_workflows<I>(mut self, workflows: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.workflows.extend(workflows);
        self
    }

    pub fn workflow_for(&self, pipeline: &str) -> Option<&str> {
        self.workflows.get(pipeline).map(String::as_str)
    }

    /// 最近的执行，新的在前
    pub async fn list_recent(&self, status: Option<ExecutionStatus>, limit: usize) -> Result<Vec<ExecutionSummary>> {
        if self.workflows.is_empty() {
            return self
                .executor
                .list_executions(None, status, limit)
                .await
                .map_err(tracker_error);
        }

        let workflow_ids: BTreeSet<&str> = self.workflows.values().map(String::as_str).collect();
        let queries = workflow_ids
            .iter()
            .map(|id| self.executor.list_executions(Some(*id), status, limit));
        let mut merged = Vec::new();
        for result in join_all(queries).await {
            merged.extend(result.map_err(tracker_error)?);
        }
        merged.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        merged.truncate(limit);
        Ok(merged)
    }

    pub async fn get(&self, handle: &ExecutionHandle) -> Result<ExecutionDetail> {
        self.executor.get_execution(handle, true).await.map_err(tracker_error)
    }

    /// 最近失败的执行（预检用）
    pub async fn unresolved_failures(&self, limit: usize) -> Result<Vec<ExecutionSummary>> {
        self.list_recent(Some(ExecutionStatus::Errored), limit).await
    }

    /// 把失败的执行对账到账本：仍未终结的 TaskRun 前进到 errored 并记录 AgentError。
    /// 返回新标记的执行数。
    pub fn reconcile(&self, ledger: &Ledger, summaries: &[ExecutionSummary]) -> Result<usize> {
        let mut marked = 0;
        for summary in summaries.iter().filter(|s| s.status == ExecutionStatus::Errored) {
            let Some(run) = ledger.run_by_handle(summary.handle.as_str())? else {
                continue;
            };
            if run.status.is_terminal() {
                continue;
            }
            let detail = format!("Execution {} ended with '{}'", summary.handle, summary.native_status);
            ledger.advance_run(run.id, RunStatus::Errored, Some(&detail))?;
            ledger.record_agent_error(&run.pipeline, Some(run.id), "execution_failed", &detail)?;
            marked += 1;
        }
        if marked > 0 {
            tracing::info!("Reconciled {} failed execution(s) into the ledger", marked);
        }
        Ok(marked)
    }

    /// 拉取一次执行的最新状态，推进对应 TaskRun，并生成最终摘要
    pub async fn sync(&self, ledger: &Ledger, handle: &ExecutionHandle) -> Result<String> {
        let detail = self.get(handle).await?;
        let status = detail.summary.status;

        let line = match status {
            ExecutionStatus::Succeeded => format!("✅ Execution {handle} succeeded"),
            ExecutionStatus::Running => format!("🔄 Execution {handle} is still running"),
            ExecutionStatus::Errored => format!(
                "❌ Execution {handle} failed: {}",
                detail.error_message.as_deref().unwrap_or(&detail.summary.native_status)
            ),
        };

        if let Some(run) = ledger.run_by_handle(handle.as_str())? {
            let target = RunStatus::from(status);
            if run.status != target && run.status.can_advance_to(target) {
                let summary = target.is_terminal().then_some(line.as_str());
                ledger.advance_run(run.id, target, summary)?;
                if target == RunStatus::Errored {
                    ledger.record_agent_error(&run.pipeline, Some(run.id), "execution_failed", &line)?;
                }
            }
            return Ok(format!("{line}\n📝 {} -> {}", run.content, run.pipeline));
        }
        Ok(line)
    }

    /// 三种状态并发查询后的计数
    pub async fn overview(&self, limit: usize) -> Result<ExecutionOverview> {
        let queries = ExecutionStatus::ALL
            .iter()
            .map(|status| self.list_recent(Some(*status), limit));
        let results = join_all(queries).await;

        let mut overview = ExecutionOverview::default();
        for (status, result) in ExecutionStatus::ALL.iter().zip(results) {
            let count = result?.len();
            match status {
                ExecutionStatus::Errored => overview.errored = count,
                ExecutionStatus::Running => overview.running = count,
                ExecutionStatus::Succeeded => overview.succeeded = count,
            }
        }
        Ok(overview)
    }
}
