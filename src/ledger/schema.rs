//! 账本表结构（打开时幂等创建）

pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS diary (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    agent       TEXT NOT NULL,
    event_type  TEXT NOT NULL DEFAULT 'status_change',
    content     TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_diary_agent ON diary(agent);
CREATE INDEX IF NOT EXISTS idx_diary_event ON diary(event_type);

CREATE TABLE IF NOT EXISTS scheduled_tasks (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    title       TEXT NOT NULL,
    horizon     TEXT NOT NULL,
    priority    TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'pending',
    linked_run_id INTEGER,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_scheduled_status ON scheduled_tasks(status);

CREATE TABLE IF NOT EXISTS quests (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    title        TEXT NOT NULL,
    description  TEXT NOT NULL DEFAULT '',
    quest_type   TEXT NOT NULL,
    agent        TEXT NOT NULL,
    status       TEXT NOT NULL DEFAULT 'pending',
    data         TEXT NOT NULL DEFAULT 'null',
    response     TEXT,
    xp_reward    INTEGER NOT NULL DEFAULT 10,
    created_at   TEXT NOT NULL,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_quests_status ON quests(status);

CREATE TABLE IF NOT EXISTS agent_memory (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    agent          TEXT NOT NULL,
    memory_type    TEXT NOT NULL,
    content        TEXT NOT NULL,
    source_task_id INTEGER,
    importance     INTEGER NOT NULL CHECK (importance BETWEEN 1 AND 10),
    usage_count    INTEGER NOT NULL DEFAULT 0,
    tags           TEXT NOT NULL DEFAULT '[]',
    created_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_memory_agent ON agent_memory(agent);

CREATE TABLE IF NOT EXISTS user_profile (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    category    TEXT NOT NULL,
    key         TEXT NOT NULL,
    value       TEXT NOT NULL,
    confidence  REAL NOT NULL CHECK (confidence BETWEEN 0.0 AND 1.0),
    source      TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    UNIQUE (category, key)
);

CREATE TABLE IF NOT EXISTS task_feedback (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id     INTEGER NOT NULL,
    agent       TEXT NOT NULL,
    rating      INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
    comment     TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_feedback_task ON task_feedback(task_id);

CREATE TABLE IF NOT EXISTS agent_errors (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    agent         TEXT NOT NULL,
    task_id       INTEGER,
    error_type    TEXT NOT NULL,
    error_detail  TEXT NOT NULL,
    reflection    TEXT,
    lesson        TEXT,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS task_runs (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    content      TEXT NOT NULL,
    pipeline     TEXT NOT NULL,
    handle       TEXT UNIQUE,
    status       TEXT NOT NULL DEFAULT 'queued',
    summary      TEXT,
    created_at   TEXT NOT NULL,
    finished_at  TEXT
);

CREATE TABLE IF NOT EXISTS ideas (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    content     TEXT NOT NULL,
    plan        TEXT,
    status      TEXT NOT NULL DEFAULT 'planning',
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS articles (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    title       TEXT NOT NULL,
    content     TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'draft',
    url         TEXT,
    created_at  TEXT NOT NULL
);
";
