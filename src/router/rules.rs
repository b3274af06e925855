//! 路由规则表：内置有序规则与 routes.toml 加载
//!
//! 规则按顺序匹配，先匹配者胜；自主类规则排在交互类之前。

use std::path::Path;

use regex::Regex;
use serde::Deserialize;

use super::Mode;
use crate::core::{OfficeError, Result};

/// 未匹配任何规则时接手的通用 Agent
pub const DEFAULT_AGENT: &str = "general-agent";

/// 一条已编译的规则
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub name: String,
    pub pattern: Regex,
    pub mode: Mode,
    pub target: String,
    pub description: String,
}

/// routes.toml 中的一条规则
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    pub pattern: String,
    pub mode: Mode,
    pub target: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RoutesToml {
    #[serde(default)]
    default_agent: Option<String>,
    #[serde(default)]
    rule: Vec<RuleSpec>,
}

impl RouteRule {
    pub fn compile(spec: RuleSpec) -> Result<Self> {
        let pattern = Regex::new(&spec.pattern)
            .map_err(|e| OfficeError::Config(format!("route '{}': {}", spec.name, e)))?;
        Ok(Self {
            description: spec.description.unwrap_or_else(|| spec.name.replace('-', " ")),
            name: spec.name,
            pattern,
            mode: spec.mode,
            target: spec.target,
        })
    }
}

fn builtin(name: &str, pattern: &str, mode: Mode, target: &str, description: &str) -> RuleSpec {
    RuleSpec {
        name: name.to_string(),
        pattern: pattern.to_string(),
        mode,
        target: target.to_string(),
        description: Some(description.to_string()),
    }
}

/// 内置规则（俄语 / 英语任务描述）
pub fn builtin_rules() -> Vec<RuleSpec> {
    use Mode::{Autonomous, Interactive};
    vec![
        builtin(
            "content-authoring",
            r"(?i)\b(напиш\w*|написать|подготов\w*|сочини\w*|write|draft|compose)\b.*\b(стать\w*|пост\w*|заметк\w*|article|blog|post)",
            Autonomous,
            "manager-pipeline",
            "content/article authoring",
        ),
        builtin(
            "research-summarize",
            r"(?i)\b(исследу\w*|изучи\w*|собери\w*|найди\w*|research|investigate|collect)\b.*\b(саммари|итог\w*|обзор\w*|дайджест\w*|выжимк\w*|summary|summari[sz]e\w*|digest|overview)",
            Autonomous,
            "research-pipeline",
            "research and summarize",
        ),
        builtin(
            "site-improvement",
            r"(?i)\b(улучш\w*|аудит\w*|оптимизир\w*|improve|audit|optimi[sz]e)\b.*\b(сайт\w*|лендинг\w*|ux|site|website|landing)",
            Autonomous,
            "site-improvement-chain",
            "site improvement chain",
        ),
        builtin(
            "recurring-series",
            r"(?i)\b(кажд\w*|ежедневн\w*|еженедельн\w*|ежемесячн\w*|сери[яюи]|every\s+(day|week|month)|daily|weekly|monthly|series)\b",
            Autonomous,
            "recurring-series",
            "recurring job series",
        ),
        builtin(
            "code-discussion",
            r"(?i)\b(баг\w*|исправ\w*|рефактор\w*|код\w*|отлад\w*|модул\w*|bug|fix|refactor|code|debug|module)\b",
            Interactive,
            "dev-agent",
            "code requiring discussion",
        ),
        builtin(
            "iterative-content",
            r"(?i)\b(отредактир\w*|редактур\w*|правк\w*|перепиш\w*|доработ\w*|черновик\w*|edit|rewrite|revise|proofread)\b",
            Interactive,
            "content-agent",
            "iterative content",
        ),
        builtin(
            "dialog-research",
            r"(?i)\b(обсуд\w*|разбер\w*|подума\w*|исследу\w*|discuss|brainstorm|explore|research)\b",
            Interactive,
            "research-agent",
            "dialog-driven research",
        ),
        builtin(
            "workflow-management",
            r"(?i)\b(n8n|воркфло\w*|пайплайн\w*|автоматизац\w*|workflow\w*|pipeline\w*|automation)\b",
            Interactive,
            "ops-agent",
            "workflow management",
        ),
    ]
}

/// 编译一组规则；任意一条无效即整体失败
pub fn compile_all(specs: Vec<RuleSpec>) -> Result<Vec<RouteRule>> {
    specs.into_iter().map(RouteRule::compile).collect()
}

/// 解析 routes.toml 文本，返回 (规则, 可选的默认 Agent)
pub fn parse_routes(text: &str) -> Result<(Vec<RouteRule>, Option<String>)> {
    let file: RoutesToml =
        toml::from_str(text).map_err(|e| OfficeError::Config(format!("routes file: {}", e)))?;
    Ok((compile_all(file.rule)?, file.default_agent))
}

pub fn load_routes(path: &Path) -> Result<(Vec<RouteRule>, Option<String>)> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| OfficeError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    parse_routes(&text)
}
