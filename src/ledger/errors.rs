//! Agent 错误记录：执行失败时创建，reflection / lesson 由后续分析步骤一次性补全

use rusqlite::{params, OptionalExtension, Row};

use super::{audit, clamp_limit, now, AgentError, Ledger, MemoryType, NewMemory};
use crate::core::{OfficeError, Result};

/// 反思得出的教训写入记忆时的重要度
const LESSON_IMPORTANCE: u8 = 7;

fn error_from_row(row: &Row<'_>) -> rusqlite::Result<AgentError> {
    Ok(AgentError {
        id: row.get("id")?,
        agent: row.get("agent")?,
        task_id: row.get("task_id")?,
        error_type: row.get("error_type")?,
        error_detail: row.get("error_detail")?,
        reflection: row.get("reflection")?,
        lesson: row.get("lesson")?,
        created_at: row.get("created_at")?,
    })
}

impl Ledger {
    pub fn record_agent_error(
        &self,
        agent: &str,
        task_id: Option<i64>,
        error_type: &str,
        error_detail: &str,
    ) -> Result<AgentError> {
        let created_at = now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO agent_errors (agent, task_id, error_type, error_detail, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![agent, task_id, error_type, error_detail, created_at],
        )?;
        let id = conn.last_insert_rowid();
        let short: String = error_detail.chars().take(120).collect();
        audit(&conn, agent, "error", &format!("Error #{id} [{error_type}]: {short}"))?;
        Ok(AgentError {
            id,
            agent: agent.to_string(),
            task_id,
            error_type: error_type.to_string(),
            error_detail: error_detail.to_string(),
            reflection: None,
            lesson: None,
            created_at,
        })
    }

    pub fn agent_error(&self, id: i64) -> Result<AgentError> {
        self.conn()
            .query_row("SELECT * FROM agent_errors WHERE id = ?1", [id], error_from_row)
            .optional()?
            .ok_or_else(|| OfficeError::not_found("agent_error", id))
    }

    /// 最近的错误，新的在前
    pub fn agent_errors(&self, agent: Option<&str>, limit: usize) -> Result<Vec<AgentError>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM agent_errors WHERE (?1 IS NULL OR agent = ?1) ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![agent, clamp_limit(limit)], error_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// 补全反思与教训；已补全过的记录再次写入返回 InvalidTransition。
    /// 有 lesson 时同时存为该 Agent 的 lesson 记忆
    pub fn reflect_on_error(&self, id: i64, reflection: &str, lesson: Option<&str>) -> Result<AgentError> {
        let changed = {
            let conn = self.conn();
            let changed = conn.execute(
                "UPDATE agent_errors SET reflection = ?1, lesson = ?2
                 WHERE id = ?3 AND reflection IS NULL AND lesson IS NULL",
                params![reflection, lesson, id],
            )?;
            if changed == 1 {
                audit(&conn, "analyst", "error_reflected", &format!("Error #{id} reflected"))?;
            }
            changed
        };
        let record = self.agent_error(id)?;
        if changed == 0 {
            return Err(OfficeError::InvalidTransition {
                entity: "agent_error",
                id,
                from: "reflected".into(),
                to: "reflected".into(),
            });
        }
        if let Some(lesson) = lesson {
            let mut memory = NewMemory::new(record.agent.clone(), MemoryType::Lesson, lesson)
                .with_importance(LESSON_IMPORTANCE)
                .with_tags(["error", record.error_type.as_str()]);
            if let Some(task_id) = record.task_id {
                memory = memory.with_source_task(task_id);
            }
            self.save_memory(memory)?;
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reflection_filled_once_and_lesson_memorised() {
        let ledger = Ledger::open_in_memory().unwrap();
        let err = ledger
            .record_agent_error("researcher", Some(7), "execution_failed", "timeout on search")
            .unwrap();
        assert!(err.reflection.is_none());

        let reflected = ledger
            .reflect_on_error(err.id, "search API was slow", Some("Use cached results first"))
            .unwrap();
        assert_eq!(reflected.reflection.as_deref(), Some("search API was slow"));

        let lessons = ledger
            .memories(Some("researcher"), Some(MemoryType::Lesson), 10)
            .unwrap();
        assert_eq!(lessons.len(), 1);
        assert_eq!(lessons[0].source_task_id, Some(7));

        let again = ledger.reflect_on_error(err.id, "second opinion", None).unwrap_err();
        assert!(matches!(again, OfficeError::InvalidTransition { .. }));
    }

    #[test]
    fn test_reflect_missing_error() {
        let ledger = Ledger::open_in_memory().unwrap();
        assert!(matches!(
            ledger.reflect_on_error(99, "n/a", None),
            Err(OfficeError::NotFound { .. })
        ));
    }
}
