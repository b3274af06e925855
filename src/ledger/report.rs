//! 汇总视图：会话简报与每日报告

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::{AgentError, Horizon, Ledger, Quest, QuestStatus, ScheduledTask, TaskStatus};
use crate::core::Result;

/// 简报：待处理 Quest、按时间桶分组的未完成任务、最近错误
#[derive(Debug, Clone, Serialize)]
pub struct Briefing {
    pub pending_quests: Vec<Quest>,
    pub open_tasks: Vec<(Horizon, Vec<ScheduledTask>)>,
    pub recent_errors: Vec<AgentError>,
    pub xp_available: i64,
}

impl Briefing {
    pub fn render(&self) -> String {
        let mut out = format!(
            "⭐ Pending quests: {} ({} XP available)\n",
            self.pending_quests.len(),
            self.xp_available
        );
        for quest in &self.pending_quests {
            out.push_str(&format!("  #{} [{}] {}\n", quest.id, quest.quest_type, quest.title));
        }
        for (horizon, tasks) in &self.open_tasks {
            out.push_str(&format!("📋 {horizon}: {} open\n", tasks.len()));
            for task in tasks {
                out.push_str(&format!("  #{} ({}, {}) {}\n", task.id, task.priority, task.status, task.title));
            }
        }
        if !self.recent_errors.is_empty() {
            out.push_str(&format!("💥 Recent errors: {}\n", self.recent_errors.len()));
            for err in &self.recent_errors {
                out.push_str(&format!("  #{} {} [{}]\n", err.id, err.agent, err.error_type));
            }
        }
        out
    }
}

/// 最近 24 小时的统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyReport {
    pub done: usize,
    pub errors: usize,
    pub pending_quests: usize,
}

impl DailyReport {
    pub fn render(&self) -> String {
        format!(
            "📊 Daily report\n\n✅ Tasks done: {}\n💥 Errors: {}\n⭐ Pending quests: {}",
            self.done, self.errors, self.pending_quests
        )
    }
}

impl Ledger {
    pub fn briefing(&self, limit: usize) -> Result<Briefing> {
        let pending_quests = self.quests(Some(QuestStatus::Pending), limit)?;
        let xp_available = pending_quests.iter().map(|q| q.xp_reward).sum();

        let mut open_tasks = Vec::new();
        for horizon in Horizon::ALL {
            let mut tasks = self.scheduled_tasks(Some(*horizon), Some(TaskStatus::Pending), limit)?;
            tasks.extend(self.scheduled_tasks(Some(*horizon), Some(TaskStatus::InProgress), limit)?);
            if !tasks.is_empty() {
                tasks.sort_by_key(|t| t.id);
                open_tasks.push((*horizon, tasks));
            }
        }

        Ok(Briefing {
            pending_quests,
            open_tasks,
            recent_errors: self.agent_errors(None, 5)?,
            xp_available,
        })
    }

    /// 截至 `at` 的过去 24 小时报告
    pub fn daily_report(&self, at: DateTime<Utc>) -> Result<DailyReport> {
        let since = at - Duration::hours(24);
        let conn = self.conn();
        let done: i64 = conn.query_row(
            "SELECT COUNT(*) FROM scheduled_tasks WHERE status = ?1 AND updated_at > ?2",
            rusqlite::params![TaskStatus::Done, since],
            |row| row.get(0),
        )?;
        let errors: i64 = conn.query_row(
            "SELECT COUNT(*) FROM agent_errors WHERE created_at > ?1",
            [since],
            |row| row.get(0),
        )?;
        let pending_quests: i64 = conn.query_row(
            "SELECT COUNT(*) FROM quests WHERE status = ?1",
            [QuestStatus::Pending],
            |row| row.get(0),
        )?;
        Ok(DailyReport {
            done: done as usize,
            errors: errors as usize,
            pending_quests: pending_quests as usize,
        })
    }
}
