//! 计划任务：创建为 pending，只能前进，每次状态变化刷新 updated_at

use rusqlite::{params, OptionalExtension, Row};

use super::{
    audit, check_advance, clamp_limit, ensure_applied, load_status, now, Horizon, Ledger, Priority,
    ScheduledTask, TaskStatus,
};
use crate::core::{OfficeError, Result};

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduledTask> {
    Ok(ScheduledTask {
        id: row.get("id")?,
        title: row.get("title")?,
        horizon: row.get("horizon")?,
        priority: row.get("priority")?,
        status: row.get("status")?,
        linked_run_id: row.get("linked_run_id")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

impl Ledger {
    pub fn create_scheduled_task(
        &self,
        agent: &str,
        title: &str,
        horizon: Horizon,
        priority: Priority,
    ) -> Result<ScheduledTask> {
        let title = title.trim();
        if title.is_empty() {
            return Err(OfficeError::Validation("scheduled task title is empty".into()));
        }
        let created_at = now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO scheduled_tasks (title, horizon, priority, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![title, horizon, priority, TaskStatus::Pending, created_at],
        )?;
        let id = conn.last_insert_rowid();
        audit(
            &conn,
            agent,
            "task_created",
            &format!("Scheduled task #{id} '{title}' ({horizon}, {priority})"),
        )?;
        Ok(ScheduledTask {
            id,
            title: title.to_string(),
            horizon,
            priority,
            status: TaskStatus::Pending,
            linked_run_id: None,
            created_at,
            updated_at: created_at,
        })
    }

    pub fn scheduled_task(&self, id: i64) -> Result<ScheduledTask> {
        self.conn()
            .query_row("SELECT * FROM scheduled_tasks WHERE id = ?1", [id], task_from_row)
            .optional()?
            .ok_or_else(|| OfficeError::not_found("scheduled_task", id))
    }

    pub fn scheduled_tasks(
        &self,
        horizon: Option<Horizon>,
        status: Option<TaskStatus>,
        limit: usize,
    ) -> Result<Vec<ScheduledTask>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM scheduled_tasks
             WHERE (?1 IS NULL OR horizon = ?1) AND (?2 IS NULL OR status = ?2)
             ORDER BY id DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![horizon, status, clamp_limit(limit)], task_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// 状态前进；非法边返回 InvalidTransition 且不写任何行
    pub fn advance_scheduled_task(&self, agent: &str, id: i64, to: TaskStatus) -> Result<ScheduledTask> {
        {
            let conn = self.conn();
            let from: TaskStatus = load_status(&conn, "scheduled_tasks", id)?;
            check_advance(id, from, to)?;
            let changed = conn.execute(
                "UPDATE scheduled_tasks SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                params![to, now(), id, from],
            )?;
            ensure_applied(changed, id, from, to)?;
            audit(
                &conn,
                agent,
                "task_status",
                &format!("Scheduled task #{id}: {from} -> {to}"),
            )?;
        }
        self.scheduled_task(id)
    }

    /// 启动计划任务：pending -> in_progress，并记下承接它的 TaskRun
    pub fn start_scheduled_task(&self, agent: &str, id: i64, run_id: i64) -> Result<ScheduledTask> {
        {
            let conn = self.conn();
            let from: TaskStatus = load_status(&conn, "scheduled_tasks", id)?;
            let to = TaskStatus::InProgress;
            check_advance(id, from, to)?;
            let changed = conn.execute(
                "UPDATE scheduled_tasks SET status = ?1, linked_run_id = ?2, updated_at = ?3
                 WHERE id = ?4 AND status = ?5",
                params![to, run_id, now(), id, from],
            )?;
            ensure_applied(changed, id, from, to)?;
            audit(
                &conn,
                agent,
                "task_launched",
                &format!("Scheduled task #{id}: {from} -> {to} (run #{run_id})"),
            )?;
        }
        self.scheduled_task(id)
    }
}
