//! 流水线执行器边界：提交、列表、详情
//!
//! 核心把执行器当作有自己可用性与重试语义的远程服务；所有实现（n8n / Mock）实现 PipelineExecutor。
//! 执行器原生状态在此收敛为三态：errored / running / succeeded。

pub mod mock;
pub mod n8n;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use mock::MockExecutor;
pub use n8n::N8nExecutor;

/// 执行器边界上的错误
#[derive(Error, Debug, Clone)]
pub enum ExecutorError {
    /// 网络 / 后端不可达
    #[error("executor unreachable: {0}")]
    Unavailable(String),

    #[error("executor rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("execution not found: {0}")]
    NotFound(String),

    #[error("unexpected executor response: {0}")]
    Decode(String),

    #[error("pipeline not configured: {0}")]
    UnknownPipeline(String),
}

/// 派发返回的不透明执行标识
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionHandle(String);

impl ExecutionHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 三态执行模型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Errored,
    Running,
    Succeeded,
}

impl ExecutionStatus {
    pub const ALL: [ExecutionStatus; 3] = [Self::Errored, Self::Running, Self::Succeeded];

    /// 执行器原生状态映射；未知状态视为仍在进行
    pub fn from_native(native: &str) -> Self {
        match native {
            "error" | "crashed" | "failed" | "canceled" | "cancelled" => Self::Errored,
            "success" => Self::Succeeded,
            "running" | "new" | "waiting" => Self::Running,
            other => {
                tracing::debug!("Unknown executor status '{}', treating as running", other);
                Self::Running
            }
        }
    }

    /// 查询过滤时使用的原生状态名
    pub fn native_filter(self) -> &'static str {
        match self {
            Self::Errored => "error",
            Self::Running => "running",
            Self::Succeeded => "success",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Errored => "errored",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
        })
    }
}

/// 提交给流水线的任务载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPayload {
    pub task: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub context: serde_json::Value,
}

impl TaskPayload {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            task_id: None,
            callback_url: None,
            context: serde_json::Value::Null,
        }
    }

    /// 账本中 TaskRun 的 id，流水线回调时据此对应
    pub fn with_task_id(mut self, task_id: i64) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_callback(mut self, url: Option<String>) -> Self {
        self.callback_url = url;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub handle: ExecutionHandle,
    pub workflow_id: Option<String>,
    pub status: ExecutionStatus,
    pub native_status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionDetail {
    pub summary: ExecutionSummary,
    pub error_message: Option<String>,
    pub data: Option<serde_json::Value>,
}

/// 执行器接口
#[async_trait]
pub trait PipelineExecutor: Send + Sync {
    /// 提交载荷到指定流水线，返回执行句柄；不做重试
    async fn submit(&self, pipeline: &str, payload: &TaskPayload) -> Result<ExecutionHandle, ExecutorError>;

    /// 列出执行；workflow 为空时不过滤
    async fn list_executions(
        &self,
        workflow_id: Option<&str>,
        status: Option<ExecutionStatus>,
        limit: usize,
    ) -> Result<Vec<ExecutionSummary>, ExecutorError>;

    /// 获取单次执行详情；include_data 为 true 时带回运行数据
    async fn get_execution(&self, handle: &ExecutionHandle, include_data: bool) -> Result<ExecutionDetail, ExecutorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_status_mapping() {
        assert_eq!(ExecutionStatus::from_native("error"), ExecutionStatus::Errored);
        assert_eq!(ExecutionStatus::from_native("crashed"), ExecutionStatus::Errored);
        assert_eq!(ExecutionStatus::from_native("running"), ExecutionStatus::Running);
        assert_eq!(ExecutionStatus::from_native("waiting"), ExecutionStatus::Running);
        assert_eq!(ExecutionStatus::from_native("success"), ExecutionStatus::Succeeded);
        assert_eq!(ExecutionStatus::from_native("mystery"), ExecutionStatus::Running);
    }

    #[test]
    fn test_payload_wire_shape() {
        let payload = TaskPayload::new("Напиши статью")
            .with_task_id(42)
            .with_callback(Some("http://cb".into()));
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["task"], "Напиши статью");
        assert_eq!(value["taskId"], 42);
        assert_eq!(value["callbackUrl"], "http://cb");
        assert!(value.get("context").is_none());

        let bare = serde_json::to_value(TaskPayload::new("x")).unwrap();
        assert!(bare.get("taskId").is_none());
    }
}
