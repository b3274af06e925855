//! 账本实体与状态枚举
//!
//! 所有带状态的实体实现 Lifecycle：只允许声明过的前向迁移，其余一律 InvalidTransition。

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 日记默认事件类型
pub const DEFAULT_EVENT_TYPE: &str = "status_change";

/// 数据库中出现了枚举之外的取值
#[derive(Error, Debug)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// 以 snake_case 文本存储的枚举：Display / FromStr / ToSql / FromSql 一次生成
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: UnknownVariant| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

/// 带状态实体的前向生命周期
pub trait Lifecycle: Copy + PartialEq + fmt::Display + FromSql + ToSql {
    /// 实体名（错误信息与审计日记用）
    const ENTITY: &'static str;

    /// 是否允许 self -> next；相同状态不算前进
    fn can_advance_to(self, next: Self) -> bool;

    fn is_terminal(self) -> bool;
}

text_enum! {
    /// 计划时间桶
    Horizon, "horizon" {
        Now => "now",
        Day => "day",
        Week => "week",
        Month => "month",
    }
}

text_enum! {
    Priority, "priority" {
        Urgent => "urgent",
        Normal => "normal",
        Later => "later",
    }
}

text_enum! {
    /// 计划任务状态：pending -> in_progress -> {done | cancelled}，pending 也可直接取消
    TaskStatus, "task status" {
        Pending => "pending",
        InProgress => "in_progress",
        Done => "done",
        Cancelled => "cancelled",
    }
}

impl Lifecycle for TaskStatus {
    const ENTITY: &'static str = "scheduled_task";

    fn can_advance_to(self, next: Self) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress) | (Pending, Cancelled) | (InProgress, Done) | (InProgress, Cancelled)
        )
    }

    fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Cancelled)
    }
}

text_enum! {
    /// 需要人类完成的动作类型
    QuestType, "quest type" {
        ProvideToken => "provide_token",
        ApiKey => "api_key",
        Approve => "approve",
        TopUp => "top_up",
        Info => "info",
    }
}

impl QuestType {
    /// Agent 回调里的未知类型降级为 info
    pub fn parse_lenient(s: &str) -> Self {
        s.parse().unwrap_or(QuestType::Info)
    }
}

text_enum! {
    QuestStatus, "quest status" {
        Pending => "pending",
        Completed => "completed",
        Skipped => "skipped",
    }
}

impl Lifecycle for QuestStatus {
    const ENTITY: &'static str = "quest";

    fn can_advance_to(self, next: Self) -> bool {
        self == QuestStatus::Pending && next != QuestStatus::Pending
    }

    fn is_terminal(self) -> bool {
        self != QuestStatus::Pending
    }
}

text_enum! {
    MemoryType, "memory type" {
        Lesson => "lesson",
        Fact => "fact",
        Preference => "preference",
        Skill => "skill",
    }
}

text_enum! {
    ProfileCategory, "profile category" {
        Style => "style",
        Preference => "preference",
        Habit => "habit",
    }
}

text_enum! {
    ProfileSource, "profile source" {
        Explicit => "explicit",
        Inferred => "inferred",
        Feedback => "feedback",
    }
}

text_enum! {
    /// 已派发流水线执行在账本中的投影
    RunStatus, "run status" {
        /// 已预留 id，尚未拿到执行句柄
        Queued => "queued",
        Submitted => "submitted",
        Running => "running",
        Succeeded => "succeeded",
        Errored => "errored",
    }
}

impl Lifecycle for RunStatus {
    const ENTITY: &'static str = "task_run";

    fn can_advance_to(self, next: Self) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (Queued, Submitted)
                | (Queued, Errored)
                | (Submitted, Running)
                | (Submitted, Succeeded)
                | (Submitted, Errored)
                | (Running, Succeeded)
                | (Running, Errored)
        )
    }

    fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Errored)
    }
}

text_enum! {
    IdeaStatus, "idea status" {
        Planning => "planning",
        Planned => "planned",
        InProgress => "in_progress",
        Done => "done",
    }
}

impl Lifecycle for IdeaStatus {
    const ENTITY: &'static str = "idea";

    fn can_advance_to(self, next: Self) -> bool {
        use IdeaStatus::*;
        matches!(
            (self, next),
            (Planning, Planned) | (Planning, InProgress) | (Planned, InProgress) | (InProgress, Done)
        )
    }

    fn is_terminal(self) -> bool {
        self == IdeaStatus::Done
    }
}

text_enum! {
    ArticleStatus, "article status" {
        Draft => "draft",
        Published => "published",
    }
}

impl Lifecycle for ArticleStatus {
    const ENTITY: &'static str = "article";

    fn can_advance_to(self, next: Self) -> bool {
        self == ArticleStatus::Draft && next == ArticleStatus::Published
    }

    fn is_terminal(self) -> bool {
        self == ArticleStatus::Published
    }
}

/// 审计日记（只追加）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiaryEntry {
    pub id: i64,
    pub agent: String,
    pub event_type: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: i64,
    pub title: String,
    pub horizon: Horizon,
    pub priority: Priority,
    pub status: TaskStatus,
    /// 启动后对应的 TaskRun
    pub linked_run_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quest {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub quest_type: QuestType,
    pub agent: String,
    pub status: QuestStatus,
    pub data: serde_json::Value,
    pub response: Option<serde_json::Value>,
    pub xp_reward: i64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// 新建 Quest 的参数
#[derive(Debug, Clone)]
pub struct NewQuest {
    pub title: String,
    pub description: String,
    pub quest_type: QuestType,
    pub agent: String,
    pub data: serde_json::Value,
    pub xp_reward: i64,
}

impl NewQuest {
    pub fn new(agent: impl Into<String>, title: impl Into<String>, quest_type: QuestType) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            quest_type,
            agent: agent.into(),
            data: serde_json::Value::Null,
            xp_reward: 10,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_xp(mut self, xp_reward: i64) -> Self {
        self.xp_reward = xp_reward;
        self
    }
}

/// Quest 的人类处理结果
#[derive(Debug, Clone)]
pub enum QuestResolution {
    Completed(serde_json::Value),
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMemory {
    pub id: i64,
    pub agent: String,
    pub memory_type: MemoryType,
    pub content: String,
    pub source_task_id: Option<i64>,
    pub importance: u8,
    pub usage_count: i64,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMemory {
    pub agent: String,
    pub memory_type: MemoryType,
    pub content: String,
    pub source_task_id: Option<i64>,
    pub importance: u8,
    pub tags: BTreeSet<String>,
}

impl NewMemory {
    pub fn new(agent: impl Into<String>, memory_type: MemoryType, content: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            memory_type,
            content: content.into(),
            source_task_id: None,
            importance: 5,
            tags: BTreeSet::new(),
        }
    }

    pub fn with_importance(mut self, importance: u8) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_source_task(mut self, task_id: i64) -> Self {
        self.source_task_id = Some(task_id);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// 用户画像条目，(category, key) 唯一
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileFact {
    pub id: i64,
    pub category: ProfileCategory,
    pub key: String,
    pub value: String,
    pub confidence: f64,
    pub source: ProfileSource,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFeedback {
    pub id: i64,
    pub task_id: i64,
    pub agent: String,
    pub rating: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

/// 执行失败记录；reflection / lesson 由后续分析步骤填写
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentError {
    pub id: i64,
    pub agent: String,
    pub task_id: Option<i64>,
    pub error_type: String,
    pub error_detail: String,
    pub reflection: Option<String>,
    pub lesson: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: i64,
    pub content: String,
    pub pipeline: String,
    /// 提交成功前为空
    pub handle: Option<String>,
    pub status: RunStatus,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Idea {
    pub id: i64,
    pub content: String,
    pub plan: Option<String>,
    pub status: IdeaStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub status: ArticleStatus,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_edges() {
        use TaskStatus::*;
        assert!(Pending.can_advance_to(InProgress));
        assert!(Pending.can_advance_to(Cancelled));
        assert!(InProgress.can_advance_to(Done));
        assert!(InProgress.can_advance_to(Cancelled));

        assert!(!Pending.can_advance_to(Done));
        assert!(!Pending.can_advance_to(Pending));
        assert!(!Done.can_advance_to(InProgress));
        assert!(!Cancelled.can_advance_to(Pending));
        assert!(!InProgress.can_advance_to(Pending));
    }

    #[test]
    fn test_run_status_edges() {
        use RunStatus::*;
        assert!(Queued.can_advance_to(Submitted));
        assert!(Queued.can_advance_to(Errored));
        assert!(!Queued.can_advance_to(Running));
        assert!(!Submitted.can_advance_to(Queued));
        assert!(!Errored.can_advance_to(Submitted));
    }

    #[test]
    fn test_quest_only_resolves_from_pending() {
        use QuestStatus::*;
        assert!(Pending.can_advance_to(Completed));
        assert!(Pending.can_advance_to(Skipped));
        assert!(!Completed.can_advance_to(Skipped));
        assert!(!Skipped.can_advance_to(Pending));
    }

    #[test]
    fn test_text_roundtrip_and_unknown() {
        assert_eq!("in_progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert_eq!(QuestType::TopUp.to_string(), "top_up");
        let err = "someday".parse::<Horizon>().unwrap_err();
        assert_eq!(err.kind, "horizon");
    }

    #[test]
    fn test_lenient_quest_type() {
        assert_eq!(QuestType::parse_lenient("api_key"), QuestType::ApiKey);
        assert_eq!(QuestType::parse_lenient("bribe"), QuestType::Info);
    }
}
