//! 日记：只追加的审计日志，不提供更新或删除

use rusqlite::{params, Row};

use super::{clamp_limit, now, DiaryEntry, Ledger, DEFAULT_EVENT_TYPE};
use crate::core::Result;

fn diary_from_row(row: &Row<'_>) -> rusqlite::Result<DiaryEntry> {
    Ok(DiaryEntry {
        id: row.get("id")?,
        agent: row.get("agent")?,
        event_type: row.get("event_type")?,
        content: row.get("content")?,
        created_at: row.get("created_at")?,
    })
}

impl Ledger {
    /// 追加一条日记；event_type 缺省为 status_change
    pub fn append_diary(&self, agent: &str, event_type: Option<&str>, content: &str) -> Result<DiaryEntry> {
        let event_type = event_type.unwrap_or(DEFAULT_EVENT_TYPE);
        let created_at = now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO diary (agent, event_type, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![agent, event_type, content, created_at],
        )?;
        Ok(DiaryEntry {
            id: conn.last_insert_rowid(),
            agent: agent.to_string(),
            event_type: event_type.to_string(),
            content: content.to_string(),
            created_at,
        })
    }

    /// 最近的日记，新的在前；可按 agent 过滤
    pub fn diary(&self, agent: Option<&str>, limit: usize) -> Result<Vec<DiaryEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM diary WHERE (?1 IS NULL OR agent = ?1) ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![agent, clamp_limit(limit)], diary_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// 按事件类型查询日记，新的在前
    pub fn diary_by_event(&self, event_type: &str, limit: usize) -> Result<Vec<DiaryEntry>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT * FROM diary WHERE event_type = ?1 ORDER BY id DESC LIMIT ?2")?;
        let rows = stmt.query_map(params![event_type, clamp_limit(limit)], diary_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// 日记总条数（审计断言用）
    pub fn diary_len(&self) -> Result<usize> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM diary", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diary_newest_first_and_filtered() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger.append_diary("writer", None, "draft started").unwrap();
        ledger.append_diary("coder", Some("error"), "build failed").unwrap();
        ledger.append_diary("writer", None, "draft done").unwrap();

        let all = ledger.diary(None, 50).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].content, "draft done");

        let writer = ledger.diary(Some("writer"), 50).unwrap();
        assert_eq!(writer.len(), 2);
        assert!(writer.iter().all(|e| e.agent == "writer"));

        let errors = ledger.diary_by_event("error", 10).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].agent, "coder");
    }
}
