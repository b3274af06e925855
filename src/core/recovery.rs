//! 错误传播策略
//!
//! 根据 OfficeError 类型返回 Propagation，供会话控制器决定是继续、拒绝还是终止当前调用。

use crate::core::{OfficeError, Propagation};

/// 将错误映射为传播动作
pub fn propagation(err: &OfficeError) -> Propagation {
    match err {
        OfficeError::ExecutorUnavailable(_) => Propagation::Soft,
        OfficeError::NotConfirmed { .. } => Propagation::Fatal,
        OfficeError::DispatchFailed { .. }
        | OfficeError::InvalidTransition { .. }
        | OfficeError::NotFound { .. }
        | OfficeError::Validation(_)
        | OfficeError::UnknownPipeline(_) => Propagation::Reject,
        OfficeError::Config(_) | OfficeError::Storage(_) | OfficeError::Serialization(_) => {
            Propagation::Fatal
        }
    }
}

/// 面向请求者的一行提示
pub fn describe(err: &OfficeError) -> String {
    match propagation(err) {
        Propagation::Soft => format!("⚠️ {err} (continuing)"),
        Propagation::Reject => format!("❌ {err}"),
        Propagation::Fatal => format!("⛔ {err}"),
    }
}
