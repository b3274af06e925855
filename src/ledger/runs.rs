//! 执行记录：已派发到流水线的任务与其执行句柄

use rusqlite::{params, OptionalExtension, Row};

use super::{audit, check_advance, clamp_limit, ensure_applied, load_status, now, Ledger, Lifecycle, RunStatus, TaskRun};
use crate::core::{OfficeError, Result};

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<TaskRun> {
    Ok(TaskRun {
        id: row.get("id")?,
        content: row.get("content")?,
        pipeline: row.get("pipeline")?,
        handle: row.get("handle")?,
        status: row.get("status")?,
        summary: row.get("summary")?,
        created_at: row.get("created_at")?,
        finished_at: row.get("finished_at")?,
    })
}

impl Ledger {
    /// 提交前预留一条执行记录；其 id 随载荷作为 taskId 发给流水线
    pub fn reserve_run(&self, content: &str, pipeline: &str) -> Result<TaskRun> {
        let created_at = now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO task_runs (content, pipeline, status, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![content, pipeline, RunStatus::Queued, created_at],
        )?;
        let id = conn.last_insert_rowid();
        audit(&conn, "dispatcher", "run_reserved", &format!("Run #{id} -> {pipeline}"))?;
        Ok(TaskRun {
            id,
            content: content.to_string(),
            pipeline: pipeline.to_string(),
            handle: None,
            status: RunStatus::Queued,
            summary: None,
            created_at,
            finished_at: None,
        })
    }

    /// 记录派发返回的执行句柄：queued -> submitted
    pub fn attach_handle(&self, id: i64, handle: &str) -> Result<TaskRun> {
        {
            let conn = self.conn();
            let from: RunStatus = load_status(&conn, "task_runs", id)?;
            let to = RunStatus::Submitted;
            check_advance(id, from, to)?;
            let changed = conn.execute(
                "UPDATE task_runs SET handle = ?1, status = ?2 WHERE id = ?3 AND status = ?4",
                params![handle, to, id, from],
            )?;
            ensure_applied(changed, id, from, to)?;
            audit(&conn, "dispatcher", "dispatched", &format!("Run #{id} (handle {handle})"))?;
        }
        self.run(id)
    }

    pub fn run(&self, id: i64) -> Result<TaskRun> {
        self.conn()
            .query_row("SELECT * FROM task_runs WHERE id = ?1", [id], run_from_row)
            .optional()?
            .ok_or_else(|| OfficeError::not_found("task_run", id))
    }

    pub fn run_by_handle(&self, handle: &str) -> Result<Option<TaskRun>> {
        Ok(self
            .conn()
            .query_row("SELECT * FROM task_runs WHERE handle = ?1", [handle], run_from_row)
            .optional()?)
    }

    /// 尚未到达终态的执行
    pub fn open_runs(&self, limit: usize) -> Result<Vec<TaskRun>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM task_runs WHERE status IN ('submitted', 'running') ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([clamp_limit(limit)], run_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// 前进执行状态；到达终态时写入 finished_at
    pub fn advance_run(&self, id: i64, to: RunStatus, summary: Option<&str>) -> Result<TaskRun> {
        {
            let conn = self.conn();
            let from: RunStatus = load_status(&conn, "task_runs", id)?;
            check_advance(id, from, to)?;
            let finished_at = to.is_terminal().then(now);
            let changed = conn.execute(
                "UPDATE task_runs SET status = ?1, summary = COALESCE(?2, summary), finished_at = ?3
                 WHERE id = ?4 AND status = ?5",
                params![to, summary, finished_at, id, from],
            )?;
            ensure_applied(changed, id, from, to)?;
            audit(&conn, "tracker", "run_status", &format!("Run #{id}: {from} -> {to}"))?;
        }
        self.run(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_lifecycle() {
        let ledger = Ledger::open_in_memory().unwrap();
        let run = ledger.reserve_run("Напиши статью про Rust", "manager-pipeline").unwrap();
        assert_eq!(run.status, RunStatus::Queued);
        assert!(ledger.open_runs(10).unwrap().is_empty());

        let run = ledger.attach_handle(run.id, "1001").unwrap();
        assert_eq!(run.status, RunStatus::Submitted);
        assert_eq!(run.handle.as_deref(), Some("1001"));
        assert_eq!(ledger.open_runs(10).unwrap().len(), 1);
        assert!(ledger.attach_handle(run.id, "1002").is_err());

        ledger.advance_run(run.id, RunStatus::Running, None).unwrap();
        let done = ledger.advance_run(run.id, RunStatus::Succeeded, Some("published")).unwrap();
        assert_eq!(done.status, RunStatus::Succeeded);
        assert_eq!(done.summary.as_deref(), Some("published"));
        assert!(done.finished_at.is_some());
        assert!(ledger.open_runs(10).unwrap().is_empty());

        let err = ledger.advance_run(run.id, RunStatus::Errored, None).unwrap_err();
        assert!(matches!(err, OfficeError::InvalidTransition { .. }));
    }

    #[test]
    fn test_lookup_by_handle() {
        let ledger = Ledger::open_in_memory().unwrap();
        let run = ledger.reserve_run("a", "research-pipeline").unwrap();
        ledger.attach_handle(run.id, "h-1").unwrap();
        assert_eq!(ledger.run_by_handle("h-1").unwrap().unwrap().id, run.id);
        assert!(ledger.run_by_handle("h-2").unwrap().is_none());
    }

    #[test]
    fn test_failed_submission_closes_reservation() {
        let ledger = Ledger::open_in_memory().unwrap();
        let run = ledger.reserve_run("a", "research-pipeline").unwrap();
        let run = ledger
            .advance_run(run.id, RunStatus::Errored, Some("executor unreachable"))
            .unwrap();
        assert!(run.handle.is_none());
        assert!(run.finished_at.is_some());
        assert!(ledger.open_runs(10).unwrap().is_empty());
    }
}
