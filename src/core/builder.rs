//! 会话构建器：按配置装配账本、执行器、路由表、派发器与追踪器
//!
//! 测试可注入 MockExecutor / 内存账本，其余从 AppConfig 推导。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::{Result, SessionController};
use crate::dispatch::Dispatcher;
use crate::executor::{N8nExecutor, PipelineExecutor};
use crate::ledger::Ledger;
use crate::router::RouteTable;
use crate::tracker::ExecutionTracker;

pub struct SessionBuilder {
    config: AppConfig,
    executor: Option<Arc<dyn PipelineExecutor>>,
    ledger: Option<Arc<Ledger>>,
    router: Option<RouteTable>,
}

impl SessionBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            executor: None,
            ledger: None,
            router: None,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn PipelineExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<Ledger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_router(mut self, router: RouteTable) -> Self {
        self.router = Some(router);
        self
    }

    /// 配置的 n8n 执行器
    pub fn n8n_executor(config: &AppConfig) -> N8nExecutor {
        let section = &config.executor;
        tracing::info!(
            "Using n8n executor at {} ({} pipelines)",
            section.base_url,
            section.pipelines.len()
        );
        N8nExecutor::new(
            &section.base_url,
            section.resolved_api_key(),
            section.timeout_secs,
            section.pipelines.clone(),
        )
    }

    /// 路由表：rules_file > 内置；[router].default_agent 覆盖默认 Agent
    pub fn route_table(config: &AppConfig) -> Result<RouteTable> {
        let table = match &config.router.rules_file {
            Some(path) => RouteTable::from_file(path)?,
            None => RouteTable::builtin(),
        };
        Ok(match &config.router.default_agent {
            Some(agent) => table.with_default_agent(agent.clone()),
            None => table,
        })
    }

    pub fn build(self) -> Result<SessionController> {
        let ledger = match self.ledger {
            Some(ledger) => ledger,
            None => Arc::new(Ledger::open(&self.config.ledger.path)?),
        };
        let executor: Arc<dyn PipelineExecutor> = match self.executor {
            Some(executor) => executor,
            None => Arc::new(Self::n8n_executor(&self.config)),
        };
        let router = match self.router {
            Some(router) => router,
            None => Self::route_table(&self.config)?,
        };

        let dispatcher = Dispatcher::new(executor.clone(), ledger.clone(), self.config.app.agents_root.clone())
            .with_callback_url(self.config.executor.callback_url.clone());
        let tracker = ExecutionTracker::new(executor).with_workflows(self.config.executor.workflow_ids());

        Ok(SessionController::new(ledger, router, dispatcher, tracker)
            .with_preflight_limit(self.config.session.preflight_limit))
    }
}
