//! Agent 记忆：以追加为主，usage_count 是唯一可变字段（每次上下文检索 +1）

use std::collections::BTreeSet;

use rusqlite::{params, Row};

use super::{audit, clamp_limit, json_column, now, AgentMemory, Ledger, MemoryType, NewMemory};
use crate::core::Result;

fn memory_from_row(row: &Row<'_>) -> rusqlite::Result<AgentMemory> {
    let importance: i64 = row.get("importance")?;
    Ok(AgentMemory {
        id: row.get("id")?,
        agent: row.get("agent")?,
        memory_type: row.get("memory_type")?,
        content: row.get("content")?,
        source_task_id: row.get("source_task_id")?,
        importance: importance.clamp(1, 10) as u8,
        usage_count: row.get("usage_count")?,
        tags: json_column::<BTreeSet<String>>(row, "tags")?.unwrap_or_default(),
        created_at: row.get("created_at")?,
    })
}

impl Ledger {
    /// 保存一条记忆；importance 收敛到 1..=10
    pub fn save_memory(&self, memory: NewMemory) -> Result<AgentMemory> {
        let importance = memory.importance.clamp(1, 10);
        let tags = serde_json::to_string(&memory.tags)?;
        let created_at = now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO agent_memory (agent, memory_type, content, source_task_id, importance, tags, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                memory.agent,
                memory.memory_type,
                memory.content,
                memory.source_task_id,
                importance,
                tags,
                created_at
            ],
        )?;
        let id = conn.last_insert_rowid();
        audit(
            &conn,
            &memory.agent,
            "memory_saved",
            &format!("Memory #{id} [{}] importance {importance}", memory.memory_type),
        )?;
        Ok(AgentMemory {
            id,
            agent: memory.agent,
            memory_type: memory.memory_type,
            content: memory.content,
            source_task_id: memory.source_task_id,
            importance,
            usage_count: 0,
            tags: memory.tags,
            created_at,
        })
    }

    /// 浏览记忆（不计入使用次数）
    pub fn memories(
        &self,
        agent: Option<&str>,
        memory_type: Option<MemoryType>,
        limit: usize,
    ) -> Result<Vec<AgentMemory>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM agent_memory
             WHERE (?1 IS NULL OR agent = ?1) AND (?2 IS NULL OR memory_type = ?2)
             ORDER BY id DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![agent, memory_type, clamp_limit(limit)], memory_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// 为 Agent 检索上下文记忆：重要度优先，其次最新；命中的每条 usage_count +1
    pub fn memory_context(&self, agent: &str, limit: usize) -> Result<Vec<AgentMemory>> {
        let conn = self.conn();
        let mut memories = {
            let mut stmt = conn.prepare(
                "SELECT * FROM agent_memory WHERE agent = ?1
                 ORDER BY importance DESC, id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![agent, clamp_limit(limit)], memory_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        if memories.is_empty() {
            return Ok(memories);
        }
        for memory in &mut memories {
            conn.execute(
                "UPDATE agent_memory SET usage_count = usage_count + 1 WHERE id = ?1",
                [memory.id],
            )?;
            memory.usage_count += 1;
        }
        audit(
            &conn,
            agent,
            "memory_recalled",
            &format!("Recalled {} memories", memories.len()),
        )?;
        Ok(memories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_orders_by_importance_and_counts_usage() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger
            .save_memory(NewMemory::new("writer", MemoryType::Fact, "Audience is Russian-speaking").with_importance(3))
            .unwrap();
        ledger
            .save_memory(
                NewMemory::new("writer", MemoryType::Lesson, "Always cite sources")
                    .with_importance(9)
                    .with_tags(["style", "quality"]),
            )
            .unwrap();
        ledger
            .save_memory(NewMemory::new("coder", MemoryType::Skill, "Knows Rust"))
            .unwrap();

        let ctx = ledger.memory_context("writer", 10).unwrap();
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx[0].content, "Always cite sources");
        assert!(ctx[0].tags.contains("style"));
        assert!(ctx.iter().all(|m| m.usage_count == 1));

        let ctx = ledger.memory_context("writer", 1).unwrap();
        assert_eq!(ctx[0].usage_count, 2);

        let browsed = ledger.memories(Some("writer"), Some(MemoryType::Fact), 10).unwrap();
        assert_eq!(browsed[0].usage_count, 1);
    }

    #[test]
    fn test_importance_clamped() {
        let ledger = Ledger::open_in_memory().unwrap();
        let m = ledger
            .save_memory(NewMemory::new("qa", MemoryType::Preference, "x").with_importance(42))
            .unwrap();
        assert_eq!(m.importance, 10);
        let m = ledger
            .save_memory(NewMemory::new("qa", MemoryType::Preference, "y").with_importance(0))
            .unwrap();
        assert_eq!(m.importance, 1);
    }

    #[test]
    fn test_corrupt_tags_are_reported() {
        let ledger = Ledger::open_in_memory().unwrap();
        let m = ledger
            .save_memory(NewMemory::new("writer", MemoryType::Fact, "Likes lists").with_tags(["format"]))
            .unwrap();
        ledger
            .conn()
            .execute("UPDATE agent_memory SET tags = 'format' WHERE id = ?1", [m.id])
            .unwrap();

        let err = ledger.memories(Some("writer"), None, 10).unwrap_err();
        assert!(matches!(
            err,
            crate::core::OfficeError::Storage(rusqlite::Error::FromSqlConversionFailure(..))
        ));
    }
}
