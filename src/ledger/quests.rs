//! Quest：需要人类完成的动作；任意 Agent 可创建，只能由面向人类的界面处理

use rusqlite::{params, OptionalExtension, Row};

use super::{
    audit, check_advance, clamp_limit, ensure_applied, json_column, load_status, now, Ledger, NewQuest,
    Quest, QuestResolution, QuestStatus,
};
use crate::core::{OfficeError, Result};

fn quest_from_row(row: &Row<'_>) -> rusqlite::Result<Quest> {
    Ok(Quest {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        quest_type: row.get("quest_type")?,
        agent: row.get("agent")?,
        status: row.get("status")?,
        data: json_column(row, "data")?.unwrap_or(serde_json::Value::Null),
        response: json_column(row, "response")?,
        xp_reward: row.get("xp_reward")?,
        created_at: row.get("created_at")?,
        completed_at: row.get("completed_at")?,
    })
}

impl Ledger {
    pub fn create_quest(&self, quest: NewQuest) -> Result<Quest> {
        if quest.title.trim().is_empty() {
            return Err(OfficeError::Validation("quest title is empty".into()));
        }
        if quest.xp_reward < 0 {
            return Err(OfficeError::Validation("xp_reward must not be negative".into()));
        }
        let data = serde_json::to_string(&quest.data)?;
        let created_at = now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO quests (title, description, quest_type, agent, status, data, xp_reward, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                quest.title,
                quest.description,
                quest.quest_type,
                quest.agent,
                QuestStatus::Pending,
                data,
                quest.xp_reward,
                created_at
            ],
        )?;
        let id = conn.last_insert_rowid();
        audit(
            &conn,
            &quest.agent,
            "quest_created",
            &format!("Quest #{id} [{}] '{}' (+{} XP)", quest.quest_type, quest.title, quest.xp_reward),
        )?;
        Ok(Quest {
            id,
            title: quest.title,
            description: quest.description,
            quest_type: quest.quest_type,
            agent: quest.agent,
            status: QuestStatus::Pending,
            data: quest.data,
            response: None,
            xp_reward: quest.xp_reward,
            created_at,
            completed_at: None,
        })
    }

    pub fn quest(&self, id: i64) -> Result<Quest> {
        self.conn()
            .query_row("SELECT * FROM quests WHERE id = ?1", [id], quest_from_row)
            .optional()?
            .ok_or_else(|| OfficeError::not_found("quest", id))
    }

    pub fn quests(&self, status: Option<QuestStatus>, limit: usize) -> Result<Vec<Quest>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM quests WHERE (?1 IS NULL OR status = ?1) ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![status, clamp_limit(limit)], quest_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// 人类处理 Quest：完成（附带回复）或跳过；只能处理一次
    pub fn resolve_quest(&self, id: i64, resolution: QuestResolution) -> Result<Quest> {
        let (to, response) = match resolution {
            QuestResolution::Completed(value) => (QuestStatus::Completed, Some(serde_json::to_string(&value)?)),
            QuestResolution::Skipped => (QuestStatus::Skipped, None),
        };
        {
            let conn = self.conn();
            let from: QuestStatus = load_status(&conn, "quests", id)?;
            check_advance(id, from, to)?;
            let changed = conn.execute(
                "UPDATE quests SET status = ?1, response = ?2, completed_at = ?3 WHERE id = ?4 AND status = ?5",
                params![to, response, now(), id, from],
            )?;
            ensure_applied(changed, id, from, to)?;
            audit(&conn, "user", "quest_resolved", &format!("Quest #{id}: {from} -> {to}"))?;
        }
        self.quest(id)
    }
}
