//! n8n 执行器客户端
//!
//! 提交走流水线的 webhook（POST {task, taskId, callbackUrl}）；查询走 n8n 公共 API
//! `/api/v1/executions`，以 X-N8N-API-KEY 鉴权。
//!
//! webhook 配置为“立即响应”时回复里没有 executionId，此时按流水线的 workflow_id
//! 取提交之后开始的最新一次执行作为句柄；两者都拿不到则提交失败，
//! 不返回追踪器无法解析的句柄。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::Value;

use super::{
    ExecutionDetail, ExecutionHandle, ExecutionStatus, ExecutionSummary, ExecutorError, PipelineExecutor,
    TaskPayload,
};
use crate::config::PipelineSection;

const API_KEY_HEADER: &str = "X-N8N-API-KEY";

/// 按 workflow 反查执行时允许的时钟偏差
const START_SKEW_SECS: i64 = 5;

/// 反查时检查的最近执行条数
const LOOKUP_LIMIT: usize = 5;

/// n8n 客户端：持有 HTTP 客户端、API 根地址与流水线端点表
pub struct N8nExecutor {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    pipelines: HashMap<String, PipelineSection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawExecution {
    id: Value,
    #[serde(default)]
    workflow_id: Option<Value>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    finished: Option<bool>,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    stopped_at: Option<DateTime<Utc>>,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ExecutionList {
    #[serde(default)]
    data: Vec<RawExecution>,
}

/// n8n 的 id 可能是数字或字符串
fn id_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl RawExecution {
    fn native_status(&self) -> String {
        match (&self.status, self.finished) {
            (Some(s), _) => s.clone(),
            // 旧版 API 没有 status 字段，只有 finished
            (None, Some(true)) => "success".to_string(),
            (None, _) => "running".to_string(),
        }
    }

    fn into_summary(self) -> (ExecutionSummary, Option<Value>) {
        let native_status = self.native_status();
        let summary = ExecutionSummary {
            handle: ExecutionHandle::new(id_text(&self.id)),
            workflow_id: self.workflow_id.as_ref().map(id_text),
            status: ExecutionStatus::from_native(&native_status),
            native_status,
            started_at: self.started_at,
            stopped_at: self.stopped_at,
        };
        (summary, self.data)
    }
}

/// webhook 回复中的 executionId（数字或字符串）
fn execution_id(reply: &Value) -> Option<ExecutionHandle> {
    match reply.get("executionId")? {
        Value::Null => None,
        id => Some(ExecutionHandle::new(id_text(id))),
    }
}

/// 从运行数据中取出错误信息（resultData.error.message）
fn error_message(data: &Value) -> Option<String> {
    data.pointer("/resultData/error/message")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn transport_error(err: reqwest::Error) -> ExecutorError {
    if err.is_decode() {
        ExecutorError::Decode(err.to_string())
    } else {
        ExecutorError::Unavailable(err.to_string())
    }
}

async fn check_status(resp: Response) -> Result<Response, ExecutorError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body: String = resp.text().await.unwrap_or_default().chars().take(200).collect();
    Err(ExecutorError::Rejected {
        status: status.as_u16(),
        body,
    })
}

impl N8nExecutor {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout_secs: u64,
        pipelines: HashMap<String, PipelineSection>,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            pipelines,
        }
    }

    /// 提交后反查：该 workflow 中在提交之后开始的最新执行
    async fn latest_execution(
        &self,
        pipeline: &str,
        workflow_id: &str,
        submitted_at: DateTime<Utc>,
    ) -> Result<ExecutionHandle, ExecutorError> {
        let earliest = submitted_at - ChronoDuration::seconds(START_SKEW_SECS);
        let recent = self.list_executions(Some(workflow_id), None, LOOKUP_LIMIT).await?;
        let found = recent
            .into_iter()
            .find(|e| e.started_at.map_or(true, |t| t >= earliest))
            .ok_or_else(|| {
                ExecutorError::Decode(format!(
                    "no execution of workflow {} started after submitting to '{}'",
                    workflow_id, pipeline
                ))
            })?;
        tracing::debug!(
            "Pipeline '{}' replied without executionId, resolved {} via workflow {}",
            pipeline,
            found.handle,
            workflow_id
        );
        Ok(found.handle)
    }

    fn api(&self, path: &str) -> reqwest::RequestBuilder {
        let req = self.client.get(format!("{}/api/v1{}", self.base_url, path));
        match &self.api_key {
            Some(key) => req.header(API_KEY_HEADER, key),
            None => req,
        }
    }
}

#[async_trait]
impl PipelineExecutor for N8nExecutor {
    async fn submit(&self, pipeline: &str, payload: &TaskPayload) -> Result<ExecutionHandle, ExecutorError> {
        let endpoint = self
            .pipelines
            .get(pipeline)
            .ok_or_else(|| ExecutorError::UnknownPipeline(pipeline.to_string()))?;

        let submitted_at = Utc::now();
        let resp = self
            .client
            .post(&endpoint.webhook_url)
            .json(payload)
            .send()
            .await
            .map_err(transport_error)?;
        let text = check_status(resp).await?.text().await.map_err(transport_error)?;
        // 立即响应的 webhook 可能回复空体或纯文本
        let reply: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        let handle = match (execution_id(&reply), &endpoint.workflow_id) {
            (Some(handle), _) => handle,
            (None, Some(workflow_id)) => self.latest_execution(pipeline, workflow_id, submitted_at).await?,
            (None, None) => {
                return Err(ExecutorError::Decode(format!(
                    "pipeline '{}' replied without executionId and has no workflow_id to look it up",
                    pipeline
                )))
            }
        };
        tracing::info!("Submitted task to '{}' (handle {})", pipeline, handle);
        Ok(handle)
    }

    async fn list_executions(
        &self,
        workflow_id: Option<&str>,
        status: Option<ExecutionStatus>,
        limit: usize,
    ) -> Result<Vec<ExecutionSummary>, ExecutorError> {
        let mut query: Vec<(&str, String)> = vec![("limit", limit.max(1).to_string())];
        if let Some(id) = workflow_id {
            query.push(("workflowId", id.to_string()));
        }
        if let Some(status) = status {
            query.push(("status", status.native_filter().to_string()));
        }

        let resp = self.api("/executions").query(&query).send().await.map_err(transport_error)?;
        let list: ExecutionList = check_status(resp).await?.json().await.map_err(transport_error)?;
        Ok(list.data.into_iter().map(|raw| raw.into_summary().0).collect())
    }

    async fn get_execution(&self, handle: &ExecutionHandle, include_data: bool) -> Result<ExecutionDetail, ExecutorError> {
        let resp = self
            .api(&format!("/executions/{}", handle))
            .query(&[("includeData", include_data)])
            .send()
            .await
            .map_err(transport_error)?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ExecutorError::NotFound(handle.to_string()));
        }
        let raw: RawExecution = check_status(resp).await?.json().await.map_err(transport_error)?;
        let (summary, data) = raw.into_summary();
        Ok(ExecutionDetail {
            error_message: data.as_ref().and_then(error_message),
            data: if include_data { data } else { None },
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn executor(server: &MockServer, workflow_id: Option<&str>) -> N8nExecutor {
        let mut pipelines = HashMap::new();
        pipelines.insert(
            "manager-pipeline".to_string(),
            PipelineSection {
                webhook_url: server.url("/webhook/manager"),
                workflow_id: workflow_id.map(str::to_string),
            },
        );
        N8nExecutor::new(&server.base_url(), Some("key".into()), 5, pipelines)
    }

    fn article(task_id: i64) -> TaskPayload {
        TaskPayload::new("Напиши статью про X").with_task_id(task_id)
    }

    #[tokio::test]
    async fn test_submit_uses_execution_id_from_reply() {
        let server = MockServer::start_async().await;
        let webhook = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/webhook/manager")
                    .body_contains("\"taskId\":7");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({"executionId": 812, "id": "workflow-output"}));
            })
            .await;

        let handle = executor(&server, None).submit("manager-pipeline", &article(7)).await.unwrap();
        webhook.assert_async().await;
        assert_eq!(handle.as_str(), "812");
    }

    #[tokio::test]
    async fn test_submit_resolves_handle_through_workflow() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/webhook/manager");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({"message": "Workflow was started"}));
            })
            .await;
        let lookup = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/v1/executions")
                    .query_param("workflowId", "wf-manager");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({"data": [{
                        "id": 913,
                        "workflowId": "wf-manager",
                        "status": "running",
                        "startedAt": Utc::now().to_rfc3339()
                    }]}));
            })
            .await;

        let handle = executor(&server, Some("wf-manager"))
            .submit("manager-pipeline", &article(8))
            .await
            .unwrap();
        lookup.assert_async().await;
        assert_eq!(handle.as_str(), "913");
    }

    #[tokio::test]
    async fn test_submit_without_execution_id_or_workflow_fails() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/webhook/manager");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({"message": "Workflow was started", "id": "abc"}));
            })
            .await;

        let err = executor(&server, None)
            .submit("manager-pipeline", &article(9))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Decode(_)));
    }

    #[tokio::test]
    async fn test_submit_ignores_executions_started_before_submission() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/webhook/manager");
                then.status(200).body("Workflow was started");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/executions");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({"data": [{
                        "id": 700,
                        "workflowId": "wf-manager",
                        "status": "success",
                        "startedAt": (Utc::now() - ChronoDuration::hours(1)).to_rfc3339()
                    }]}));
            })
            .await;

        let err = executor(&server, Some("wf-manager"))
            .submit("manager-pipeline", &article(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Decode(_)));
    }

    #[test]
    fn test_raw_execution_parsing() {
        let raw: RawExecution = serde_json::from_value(json!({
            "id": 1042,
            "workflowId": "wf-manager",
            "status": "error",
            "startedAt": "2026-10-18T10:00:00.000Z",
            "stoppedAt": "2026-10-18T10:01:00.000Z",
            "data": {"resultData": {"error": {"message": "Writer node failed"}}}
        }))
        .unwrap();
        let (summary, data) = raw.into_summary();
        assert_eq!(summary.handle.as_str(), "1042");
        assert_eq!(summary.status, ExecutionStatus::Errored);
        assert_eq!(summary.workflow_id.as_deref(), Some("wf-manager"));
        assert_eq!(error_message(&data.unwrap()).as_deref(), Some("Writer node failed"));
    }

    #[test]
    fn test_legacy_finished_flag() {
        let raw: RawExecution = serde_json::from_value(json!({"id": "7", "finished": true})).unwrap();
        assert_eq!(raw.native_status(), "success");
        let raw: RawExecution = serde_json::from_value(json!({"id": "8"})).unwrap();
        assert_eq!(raw.into_summary().0.status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn test_submit_unknown_pipeline() {
        let executor = N8nExecutor::new("http://127.0.0.1:9", None, 1, HashMap::new());
        let err = executor
            .submit("nope", &TaskPayload::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::UnknownPipeline(_)));
    }

    #[tokio::test]
    async fn test_unreachable_executor() {
        let executor = N8nExecutor::new("http://127.0.0.1:9", None, 1, HashMap::new());
        let err = executor
            .list_executions(None, Some(ExecutionStatus::Errored), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Unavailable(_)));
    }
}
