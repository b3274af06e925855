//! Office - Agent 办公室的路由与状态账本核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与传播策略、会话状态机、会话控制器、主控循环
//! - **dispatch**: 确认后派发到流水线，或生成交互 Agent 的交接说明
//! - **executor**: 流水线执行器边界（n8n / Mock）
//! - **ledger**: SQLite 状态账本（日记、计划任务、Quest、记忆、画像、反馈、错误、执行记录）
//! - **observability**: 日志初始化
//! - **router**: 有序规则表，把任务分流为自主或交互
//! - **tracker**: 执行追踪与账本对账

pub mod config;
pub mod core;
pub mod dispatch;
pub mod executor;
pub mod ledger;
pub mod observability;
pub mod router;
pub mod tracker;

pub use crate::core::{OfficeError, Result};
pub use ledger::Ledger;
pub use router::{Mode, RouteTable, RoutingDecision};
