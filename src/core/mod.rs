//! 核心编排层：错误与传播策略、会话状态、会话控制器、主控循环、构建与关闭

pub mod builder;
pub mod controller;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod shutdown;
pub mod state;

pub use builder::SessionBuilder;
pub use controller::{PreflightReport, SessionController, SessionOutcome};
pub use error::{OfficeError, Propagation, Result};
pub use orchestrator::{spawn_session, Command, SessionEvent};
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::{Proposal, SessionPhase, SessionView};
