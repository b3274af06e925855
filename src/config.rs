//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `OFFICE__*` 覆盖（双下划线表示嵌套，如 `OFFICE__EXECUTOR__BASE_URL=http://n8n:5678`）。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub ledger: LedgerSection,
    pub executor: ExecutorSection,
    pub router: RouterSection,
    pub session: SessionSection,
}

/// [app] 段：应用名、交互式 Agent 工作上下文根目录
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 每个交互 Agent 的工作目录在其下（agents/dev-agent ...）
    #[serde(default = "default_agents_root")]
    pub agents_root: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            agents_root: default_agents_root(),
        }
    }
}

fn default_agents_root() -> PathBuf {
    PathBuf::from("agents")
}

/// [ledger] 段：SQLite 文件位置
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerSection {
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
        }
    }
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/office.db")
}

/// [executor] 段：n8n 地址、鉴权、回调、超时与流水线端点
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSection {
    #[serde(default = "default_executor_base_url")]
    pub base_url: String,
    /// 未设置时读取环境变量 N8N_API_KEY
    pub api_key: Option<String>,
    pub callback_url: Option<String>,
    #[serde(default = "default_executor_timeout")]
    pub timeout_secs: u64,
    /// 流水线名 -> 端点
    #[serde(default)]
    pub pipelines: HashMap<String, PipelineSection>,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            base_url: default_executor_base_url(),
            api_key: None,
            callback_url: None,
            timeout_secs: default_executor_timeout(),
            pipelines: HashMap::new(),
        }
    }
}

impl ExecutorSection {
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| std::env::var("N8N_API_KEY").ok())
    }

    /// 配置了 workflow_id 的流水线：(流水线名, workflow id)
    pub fn workflow_ids(&self) -> Vec<(String, String)> {
        self.pipelines
            .iter()
            .filter_map(|(name, p)| p.workflow_id.clone().map(|id| (name.clone(), id)))
            .collect()
    }
}

fn default_executor_base_url() -> String {
    "http://localhost:5678".to_string()
}

fn default_executor_timeout() -> u64 {
    30
}

/// [executor.pipelines.<name>] 段
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    pub webhook_url: String,
    /// n8n workflow id：执行列表按它过滤，webhook 未回 executionId 时按它反查句柄
    pub workflow_id: Option<String>,
}

/// [router] 段：规则文件与默认 Agent
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RouterSection {
    /// 为空时使用内置规则表
    pub rules_file: Option<PathBuf>,
    pub default_agent: Option<String>,
}

/// [session] 段
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    /// 启动预检时拉取的失败执行条数
    #[serde(default = "default_preflight_limit")]
    pub preflight_limit: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            preflight_limit: default_preflight_limit(),
        }
    }
}

fn default_preflight_limit() -> usize {
    5
}

/// 从 config 目录加载配置，环境变量 OFFICE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 OFFICE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("OFFICE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.session.preflight_limit, 5);
        assert_eq!(cfg.executor.timeout_secs, 30);
        assert_eq!(cfg.app.agents_root, PathBuf::from("agents"));
        assert!(cfg.router.rules_file.is_none());
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[ledger]
path = "/tmp/office-test.db"

[executor]
base_url = "http://n8n:5678"
callback_url = "http://office:8080/callback"

[executor.pipelines.manager-pipeline]
webhook_url = "http://n8n:5678/webhook/manager"
workflow_id = "wf1"

[session]
preflight_limit = 3
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.session.preflight_limit, 3);
        assert_eq!(cfg.ledger.path, PathBuf::from("/tmp/office-test.db"));
        let pipeline = &cfg.executor.pipelines["manager-pipeline"];
        assert_eq!(pipeline.workflow_id.as_deref(), Some("wf1"));
        assert_eq!(
            cfg.executor.workflow_ids(),
            vec![("manager-pipeline".to_string(), "wf1".to_string())]
        );
        assert_eq!(cfg.executor.callback_url.as_deref(), Some("http://office:8080/callback"));
    }
}
