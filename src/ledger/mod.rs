//! 状态账本：日记、计划任务、Quest、Agent 记忆、用户画像、反馈、错误、执行记录、创意与文章
//!
//! 底层为 SQLite（rusqlite），单连接加互斥锁；每次写入都是单行原子插入/更新，
//! 并额外追加一条日记作为唯一审计轨迹。
//!
//! 不变量在写入时逐行校验：
//! - created_at 只在创建时写入
//! - 带状态实体只能沿 Lifecycle 声明的边前进
//! - user_profile 的 (category, key) 唯一，写入为 upsert
//! - diary 与 task_feedback 不提供任何更新操作

mod diary;
mod errors;
mod feedback;
mod memory;
mod profile;
mod quests;
mod report;
mod runs;
mod schema;
mod tasks;
pub mod types;
mod works;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;

use crate::core::{OfficeError, Result};

pub use report::{Briefing, DailyReport};
pub use types::*;

/// 列表查询的上限
pub const MAX_LIST_LIMIT: usize = 200;

/// 账本句柄；通过 Arc 在组件间共享
pub struct Ledger {
    conn: Mutex<Connection>,
}

impl Ledger {
    /// 打开（或创建）磁盘上的账本；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| OfficeError::Config(format!("ledger dir {}: {e}", parent.display())))?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        tracing::info!("Ledger opened at {}", path.display());
        Self::init(conn)
    }

    /// 内存账本（测试与无持久化运行）
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(schema::SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // 持锁期间 panic 不会破坏 SQLite 自身的一致性，继续使用连接
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 把 WAL 合并回主库（退出前调用）
    pub fn checkpoint(&self) -> Result<()> {
        self.conn()
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        Ok(())
    }
}

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

pub(crate) fn clamp_limit(limit: usize) -> i64 {
    limit.clamp(1, MAX_LIST_LIMIT) as i64
}

/// 在同一连接上追加审计日记
pub(crate) fn audit(conn: &Connection, agent: &str, event_type: &str, content: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO diary (agent, event_type, content, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![agent, event_type, content, now()],
    )?;
    Ok(conn.last_insert_rowid())
}

/// 读取 JSON 文本列；内容损坏时报转换错误而不是静默丢弃
pub(crate) fn json_column<T: DeserializeOwned>(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<T>> {
    let text: Option<String> = row.get(column)?;
    text.map(|text| {
        serde_json::from_str(&text).map_err(|e| {
            let index = row.as_ref().column_index(column).unwrap_or_default();
            rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e))
        })
    })
    .transpose()
}

/// 读取某行当前状态
pub(crate) fn load_status<S: Lifecycle>(conn: &Connection, table: &str, id: i64) -> Result<S> {
    conn.query_row(
        &format!("SELECT status FROM {table} WHERE id = ?1"),
        [id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| OfficeError::not_found(S::ENTITY, id))
}

pub(crate) fn check_advance<S: Lifecycle>(id: i64, from: S, to: S) -> Result<()> {
    if from.can_advance_to(to) {
        Ok(())
    } else {
        Err(invalid_transition(id, from, to))
    }
}

/// 带 `WHERE status = from` 的更新若未命中，说明状态已被并发写入改变
pub(crate) fn ensure_applied<S: Lifecycle>(changed: usize, id: i64, from: S, to: S) -> Result<()> {
    if changed == 1 {
        Ok(())
    } else {
        Err(invalid_transition(id, from, to))
    }
}

fn invalid_transition<S: Lifecycle>(id: i64, from: S, to: S) -> OfficeError {
    OfficeError::InvalidTransition {
        entity: S::ENTITY,
        id,
        from: from.to_string(),
        to: to.to_string(),
    }
}
