//! 账本不变量集成测试（磁盘上的 SQLite）

#[cfg(test)]
mod tests {
    use office::core::OfficeError;
    use office::ledger::{
        Horizon, Ledger, MemoryType, NewMemory, NewQuest, Priority, ProfileCategory, ProfileSource, QuestResolution,
        QuestStatus, QuestType, TaskStatus,
    };
    use serde_json::json;

    fn on_disk() -> (tempfile::TempDir, Ledger) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("ledger.db")).unwrap();
        (dir, ledger)
    }

    #[test]
    fn test_profile_upsert_keeps_single_row() {
        let (_dir, ledger) = on_disk();
        ledger
            .upsert_profile(ProfileCategory::Style, "tone", "formal", 0.6, ProfileSource::Inferred)
            .unwrap();
        ledger
            .upsert_profile(ProfileCategory::Style, "tone", "casual", 1.0, ProfileSource::Explicit)
            .unwrap();

        let profile = ledger.profile().unwrap();
        assert_eq!(profile.len(), 1);
        assert_eq!(profile[0].value, "casual");
        assert_eq!(profile[0].source, ProfileSource::Explicit);
    }

    #[test]
    fn test_scheduled_task_edges() {
        let (_dir, ledger) = on_disk();
        let allowed = [
            (TaskStatus::Pending, TaskStatus::InProgress),
            (TaskStatus::Pending, TaskStatus::Cancelled),
            (TaskStatus::InProgress, TaskStatus::Done),
            (TaskStatus::InProgress, TaskStatus::Cancelled),
        ];
        let all = [TaskStatus::Pending, TaskStatus::InProgress, TaskStatus::Done, TaskStatus::Cancelled];

        for from in all {
            for to in all {
                let task = ledger
                    .create_scheduled_task("user", "edge", Horizon::Day, Priority::Normal)
                    .unwrap();
                // 把任务推进到 from
                match from {
                    TaskStatus::Pending => {}
                    TaskStatus::InProgress => {
                        ledger.advance_scheduled_task("user", task.id, TaskStatus::InProgress).unwrap();
                    }
                    TaskStatus::Done => {
                        ledger.advance_scheduled_task("user", task.id, TaskStatus::InProgress).unwrap();
                        ledger.advance_scheduled_task("user", task.id, TaskStatus::Done).unwrap();
                    }
                    TaskStatus::Cancelled => {
                        ledger.advance_scheduled_task("user", task.id, TaskStatus::Cancelled).unwrap();
                    }
                }

                let result = ledger.advance_scheduled_task("user", task.id, to);
                if allowed.contains(&(from, to)) {
                    let moved = result.unwrap();
                    assert_eq!(moved.status, to);
                    assert!(moved.updated_at >= moved.created_at);
                } else {
                    assert!(
                        matches!(result, Err(OfficeError::InvalidTransition { .. })),
                        "{from} -> {to} should be rejected"
                    );
                    assert_eq!(ledger.scheduled_task(task.id).unwrap().status, from);
                }
            }
        }
    }

    #[test]
    fn test_quest_resolved_once_by_human() {
        let (_dir, ledger) = on_disk();
        let quest = ledger
            .create_quest(
                NewQuest::new("deployer", "Provide Vercel token", QuestType::ProvideToken)
                    .with_data(json!({"service": "vercel"}))
                    .with_xp(30),
            )
            .unwrap();
        let resolved = ledger
            .resolve_quest(quest.id, QuestResolution::Completed(json!({"token": "***"})))
            .unwrap();
        assert_eq!(resolved.status, QuestStatus::Completed);
        assert!(resolved.completed_at.is_some());
        assert_eq!(resolved.created_at, quest.created_at);

        assert!(matches!(
            ledger.resolve_quest(quest.id, QuestResolution::Skipped),
            Err(OfficeError::InvalidTransition { .. })
        ));
        assert_eq!(ledger.diary_by_event("quest_resolved", 5).unwrap().len(), 1);
    }

    #[test]
    fn test_every_write_is_audited() {
        let (_dir, ledger) = on_disk();
        let task = ledger
            .create_scheduled_task("planner", "Weekly digest", Horizon::Week, Priority::Later)
            .unwrap();
        ledger.add_feedback(task.id, "writer", 4, "good").unwrap();
        ledger
            .save_memory(NewMemory::new("writer", MemoryType::Preference, "Short intros"))
            .unwrap();
        let err = ledger.record_agent_error("writer", Some(task.id), "timeout", "n8n timeout").unwrap();
        ledger.reflect_on_error(err.id, "webhook too slow", Some("raise timeout")).unwrap();

        let diary = ledger.diary(None, 50).unwrap();
        let events: Vec<&str> = diary.iter().map(|d| d.event_type.as_str()).collect();
        for expected in ["task_created", "feedback", "memory_saved", "error"] {
            assert!(events.contains(&expected), "missing {expected} in {events:?}");
        }
        // 最新的在前
        assert!(diary.windows(2).all(|w| w[0].id > w[1].id));

        let lessons = ledger.memories(Some("writer"), Some(MemoryType::Lesson), 10).unwrap();
        assert_eq!(lessons.len(), 1);
        assert_eq!(lessons[0].source_task_id, Some(task.id));
    }

    #[test]
    fn test_ledger_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        {
            let ledger = Ledger::open(&path).unwrap();
            ledger.append_diary("session", None, "first run").unwrap();
            ledger.checkpoint().unwrap();
        }
        let ledger = Ledger::open(&path).unwrap();
        let diary = ledger.diary(Some("session"), 10).unwrap();
        assert_eq!(diary.len(), 1);
        assert_eq!(diary[0].event_type, "status_change");
    }
}
