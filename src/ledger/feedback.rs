//! 任务反馈：创建后不可变，只有插入与查询

use rusqlite::{params, Row};

use super::{audit, now, Ledger, TaskFeedback};
use crate::core::{OfficeError, Result};

fn feedback_from_row(row: &Row<'_>) -> rusqlite::Result<TaskFeedback> {
    let rating: i64 = row.get("rating")?;
    Ok(TaskFeedback {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        agent: row.get("agent")?,
        rating: rating as u8,
        comment: row.get("comment")?,
        created_at: row.get("created_at")?,
    })
}

impl Ledger {
    pub fn add_feedback(&self, task_id: i64, agent: &str, rating: u8, comment: &str) -> Result<TaskFeedback> {
        if !(1..=5).contains(&rating) {
            return Err(OfficeError::Validation(format!("rating {rating} outside 1..=5")));
        }
        let created_at = now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO task_feedback (task_id, agent, rating, comment, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![task_id, agent, rating, comment, created_at],
        )?;
        let id = conn.last_insert_rowid();
        audit(
            &conn,
            agent,
            "feedback",
            &format!("Task #{task_id} rated {rating}/5"),
        )?;
        Ok(TaskFeedback {
            id,
            task_id,
            agent: agent.to_string(),
            rating,
            comment: comment.to_string(),
            created_at,
        })
    }

    /// 某任务的全部反馈，新的在前
    pub fn feedback_for(&self, task_id: i64) -> Result<Vec<TaskFeedback>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT * FROM task_feedback WHERE task_id = ?1 ORDER BY id DESC")?;
        let rows = stmt.query_map([task_id], feedback_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_rating_bounds() {
        let ledger = Ledger::open_in_memory().unwrap();
        assert!(matches!(
            ledger.add_feedback(1, "user", 0, ""),
            Err(OfficeError::Validation(_))
        ));
        assert!(matches!(
            ledger.add_feedback(1, "user", 6, ""),
            Err(OfficeError::Validation(_))
        ));

        ledger.add_feedback(1, "user", 4, "good, but too long").unwrap();
        ledger.add_feedback(1, "user", 5, "after edits").unwrap();
        let all = ledger.feedback_for(1).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].rating, 5);
        assert!(ledger.feedback_for(2).unwrap().is_empty());
    }
}
