//! Mock 执行器（用于测试，无需 n8n）
//!
//! 句柄按提交顺序编号（exec-1、exec-2 ...），新执行初始为 running；
//! 状态可由测试脚本化，`set_unreachable(true)` 模拟后端不可达。

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{
    ExecutionDetail, ExecutionHandle, ExecutionStatus, ExecutionSummary, ExecutorError, PipelineExecutor,
    TaskPayload,
};

#[derive(Debug, Clone)]
struct MockRun {
    seq: u64,
    pipeline: String,
    status: ExecutionStatus,
    error: Option<String>,
}

#[derive(Debug, Default)]
struct MockState {
    next: u64,
    runs: BTreeMap<String, MockRun>,
    submitted: Vec<(String, TaskPayload)>,
    unreachable: bool,
}

/// 内存中的执行器
#[derive(Debug, Default)]
pub struct MockExecutor {
    state: Mutex<MockState>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 一开始就不可达的执行器
    pub fn unreachable() -> Self {
        let mock = Self::default();
        mock.set_unreachable(true);
        mock
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// 脚本化某次执行的状态；未知句柄返回 false
    pub fn set_status(&self, handle: &ExecutionHandle, status: ExecutionStatus) -> bool {
        match self.state().runs.get_mut(handle.as_str()) {
            Some(run) => {
                run.status = status;
                true
            }
            None => false,
        }
    }

    /// 预置一条已失败的执行（模拟上次会话遗留的失败）
    pub fn seed_failure(&self, pipeline: &str, message: &str) -> ExecutionHandle {
        let mut state = self.state();
        state.next += 1;
        let seq = state.next;
        let handle = format!("exec-{seq}");
        state.runs.insert(
            handle.clone(),
            MockRun {
                seq,
                pipeline: pipeline.to_string(),
                status: ExecutionStatus::Errored,
                error: Some(message.to_string()),
            },
        );
        ExecutionHandle::new(handle)
    }

    /// 已提交的 (流水线, 载荷)，按提交顺序
    pub fn submitted(&self) -> Vec<(String, TaskPayload)> {
        self.state().submitted.clone()
    }

    fn summary(handle: &str, run: &MockRun) -> ExecutionSummary {
        ExecutionSummary {
            handle: ExecutionHandle::new(handle),
            workflow_id: Some(run.pipeline.clone()),
            status: run.status,
            native_status: run.status.native_filter().to_string(),
            started_at: Some(Utc::now()),
            stopped_at: (run.status != ExecutionStatus::Running).then(Utc::now),
        }
    }
}

#[async_trait]
impl PipelineExecutor for MockExecutor {
    async fn submit(&self, pipeline: &str, payload: &TaskPayload) -> Result<ExecutionHandle, ExecutorError> {
        let mut state = self.state();
        if state.unreachable {
            return Err(ExecutorError::Unavailable("mock executor is offline".into()));
        }
        state.next += 1;
        let seq = state.next;
        let handle = format!("exec-{seq}");
        state.runs.insert(
            handle.clone(),
            MockRun {
                seq,
                pipeline: pipeline.to_string(),
                status: ExecutionStatus::Running,
                error: None,
            },
        );
        state.submitted.push((pipeline.to_string(), payload.clone()));
        Ok(ExecutionHandle::new(handle))
    }

    async fn list_executions(
        &self,
        workflow_id: Option<&str>,
        status: Option<ExecutionStatus>,
        limit: usize,
    ) -> Result<Vec<ExecutionSummary>, ExecutorError> {
        let state = self.state();
        if state.unreachable {
            return Err(ExecutorError::Unavailable("mock executor is offline".into()));
        }
        let mut runs: Vec<(&String, &MockRun)> = state
            .runs
            .iter()
            .filter(|(_, run)| workflow_id.map_or(true, |w| run.pipeline == w))
            .filter(|(_, run)| status.map_or(true, |s| run.status == s))
            .collect();
        runs.sort_by(|a, b| b.1.seq.cmp(&a.1.seq));
        Ok(runs
            .into_iter()
            .take(limit)
            .map(|(handle, run)| Self::summary(handle, run))
            .collect())
    }

    async fn get_execution(&self, handle: &ExecutionHandle, include_data: bool) -> Result<ExecutionDetail, ExecutorError> {
        let state = self.state();
        if state.unreachable {
            return Err(ExecutorError::Unavailable("mock executor is offline".into()));
        }
        let run = state
            .runs
            .get(handle.as_str())
            .ok_or_else(|| ExecutorError::NotFound(handle.to_string()))?;
        Ok(ExecutionDetail {
            summary: Self::summary(handle.as_str(), run),
            error_message: run.error.clone(),
            data: include_data.then(|| serde_json::json!({ "pipeline": run.pipeline })),
        })
    }
}
