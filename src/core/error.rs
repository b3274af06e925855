//! 核心错误类型与传播策略
//!
//! 与 recovery::propagation 配合：数据不变量违例在账本边界拒绝；执行器不可达视为软失败；
//! 确认纪律违例是调用方的硬错误，不重试。

use thiserror::Error;

/// 路由、派发、追踪、账本过程中可能出现的错误
#[derive(Error, Debug)]
pub enum OfficeError {
    /// 未经确认即调用派发（调用方逻辑错误）
    #[error("Dispatch to '{target}' attempted without a recorded confirmation")]
    NotConfirmed { target: String },

    /// 提交到执行器失败，原因原样上报给请求者
    #[error("Dispatch to pipeline '{pipeline}' failed: {cause}")]
    DispatchFailed { pipeline: String, cause: String },

    /// 追踪查询失败（不阻塞会话）
    #[error("Pipeline executor unavailable: {0}")]
    ExecutorUnavailable(String),

    #[error("Invalid transition for {entity} #{id}: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        id: i64,
        from: String,
        to: String,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown pipeline: {0}")]
    UnknownPipeline(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OfficeError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// 写入日记时使用的短类别名
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotConfirmed { .. } => "not_confirmed",
            Self::DispatchFailed { .. } => "dispatch_failed",
            Self::ExecutorUnavailable(_) => "executor_unavailable",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::NotFound { .. } => "not_found",
            Self::Validation(_) => "validation",
            Self::UnknownPipeline(_) => "unknown_pipeline",
            Self::Config(_) => "config",
            Self::Storage(_) => "storage",
            Self::Serialization(_) => "serialization",
        }
    }
}

pub type Result<T> = std::result::Result<T, OfficeError>;

/// 传播策略：根据错误类型决定会话如何继续
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// 软失败：记录后继续（执行器不可达）
    Soft,
    /// 拒绝本次操作并上报给请求者，会话继续
    Reject,
    /// 调用方硬错误：不得重试，必须修正调用逻辑
    Fatal,
}
