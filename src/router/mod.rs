//! 任务路由：把任务描述分流为自主流水线或交互式 Agent
//!
//! 规则表有序、静态；`route` 是纯函数且总有结果。没有规则命中时
//! 落到交互式通用 Agent，绝不让未分类的任务无人值守地执行。

pub mod rules;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub use rules::{RouteRule, RuleSpec, DEFAULT_AGENT};

use crate::core::Result;

/// 执行方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// 派发到自动化流水线
    Autonomous,
    /// 交给本地 Agent，由人参与
    Interactive,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Autonomous => "autonomous",
            Mode::Interactive => "interactive",
        })
    }
}

/// 路由结论
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub mode: Mode,
    /// 流水线名或 Agent 名
    pub target: String,
    pub rationale: String,
    /// 命中的规则名；默认分支为 None
    pub rule: Option<String>,
    /// 未命中任何规则
    pub fallback: bool,
}

impl RoutingDecision {
    pub fn is_autonomous(&self) -> bool {
        self.mode == Mode::Autonomous
    }

    /// 呈现给请求者的提案文本
    pub fn render(&self) -> String {
        let icon = match self.mode {
            Mode::Autonomous => "🤖",
            Mode::Interactive => "🧑‍💻",
        };
        format!("{icon} {} -> {}\n💡 {}", self.mode, self.target, self.rationale)
    }
}

/// 有序规则表
#[derive(Debug, Clone)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
    default_agent: String,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RouteTable {
    pub fn new(rules: Vec<RouteRule>, default_agent: impl Into<String>) -> Self {
        Self {
            rules,
            default_agent: default_agent.into(),
        }
    }

    /// 内置规则表
    pub fn builtin() -> Self {
        // 内置正则均为常量，单测保证可编译
        let rules = rules::compile_all(rules::builtin_rules()).unwrap_or_default();
        Self::new(rules, DEFAULT_AGENT)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let (rules, default_agent) = rules::parse_routes(text)?;
        Ok(Self::new(rules, default_agent.unwrap_or_else(|| DEFAULT_AGENT.to_string())))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let (rules, default_agent) = rules::load_routes(path)?;
        tracing::info!("Loaded {} routing rules from {}", rules.len(), path.display());
        Ok(Self::new(rules, default_agent.unwrap_or_else(|| DEFAULT_AGENT.to_string())))
    }

    pub fn with_default_agent(mut self, agent: impl Into<String>) -> Self {
        self.default_agent = agent.into();
        self
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    pub fn default_agent(&self) -> &str {
        &self.default_agent
    }

    /// 分类任务描述：先匹配者胜，否则交互式默认 Agent
    pub fn route(&self, task: &str) -> RoutingDecision {
        if let Some(rule) = self.rules.iter().find(|r| r.pattern.is_match(task)) {
            tracing::debug!("Task matched rule '{}' -> {}", rule.name, rule.target);
            return RoutingDecision {
                mode: rule.mode,
                target: rule.target.clone(),
                rationale: format!(
                    "Matched '{}' ({}): {} work goes to {}",
                    rule.name, rule.description, rule.mode, rule.target
                ),
                rule: Some(rule.name.clone()),
                fallback: false,
            };
        }

        tracing::debug!("No routing rule matched, falling back to {}", self.default_agent);
        RoutingDecision {
            mode: Mode::Interactive,
            target: self.default_agent.clone(),
            rationale: format!(
                "No rule matched; unclassified work stays interactive with {}",
                self.default_agent
            ),
            rule: None,
            fallback: true,
        }
    }
}
