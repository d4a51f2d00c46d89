use rusqlite::Connection;

use crate::error::RemoteError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), RemoteError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

// Parent references have no ON DELETE action: children must be removed first.
const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS folders (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL DEFAULT '',
    description TEXT,
    color TEXT,
    order_index INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS courses (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL DEFAULT '',
    description TEXT,
    color TEXT,
    order_index INTEGER NOT NULL DEFAULT 0,
    folder_id TEXT,
    created_at INTEGER
);

CREATE TABLE IF NOT EXISTS stages (
    id TEXT PRIMARY KEY,
    course_id TEXT NOT NULL REFERENCES courses(id),
    title TEXT NOT NULL DEFAULT '',
    order_index INTEGER NOT NULL DEFAULT 0,
    xp_reward INTEGER NOT NULL DEFAULT 0,
    dowd_bucks_reward INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_stages_course ON stages (course_id);

CREATE TABLE IF NOT EXISTS modules (
    id TEXT PRIMARY KEY,
    stage_id TEXT NOT NULL REFERENCES stages(id),
    title TEXT NOT NULL DEFAULT '',
    order_index INTEGER NOT NULL DEFAULT 0,
    xp_reward INTEGER NOT NULL DEFAULT 0,
    dowd_bucks_reward INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_modules_stage ON modules (stage_id);

CREATE TABLE IF NOT EXISTS quizzes (
    id TEXT PRIMARY KEY,
    course_id TEXT NOT NULL REFERENCES courses(id),
    module_id TEXT REFERENCES modules(id),
    order_index INTEGER NOT NULL DEFAULT 0,
    title TEXT NOT NULL DEFAULT '',
    description TEXT,
    xp_reward INTEGER NOT NULL DEFAULT 0,
    dowd_bucks_reward INTEGER NOT NULL DEFAULT 0,
    questions BLOB
);

CREATE TABLE IF NOT EXISTS lessons (
    id TEXT PRIMARY KEY,
    course_id TEXT NOT NULL REFERENCES courses(id),
    module_id TEXT REFERENCES modules(id),
    order_index INTEGER NOT NULL DEFAULT 0,
    title TEXT NOT NULL DEFAULT '',
    description TEXT,
    xp_reward INTEGER NOT NULL DEFAULT 0,
    dowd_bucks_reward INTEGER NOT NULL DEFAULT 0,
    content TEXT
);

CREATE TABLE IF NOT EXISTS walkthroughs (
    id TEXT PRIMARY KEY,
    course_id TEXT NOT NULL REFERENCES courses(id),
    module_id TEXT REFERENCES modules(id),
    order_index INTEGER NOT NULL DEFAULT 0,
    title TEXT NOT NULL DEFAULT '',
    description TEXT,
    xp_reward INTEGER NOT NULL DEFAULT 0,
    dowd_bucks_reward INTEGER NOT NULL DEFAULT 0,
    steps BLOB
);

CREATE TABLE IF NOT EXISTS content_completions (
    user_id TEXT NOT NULL,
    content_id TEXT NOT NULL,
    content_type TEXT NOT NULL,
    completed_at INTEGER,
    PRIMARY KEY (user_id, content_id, content_type)
);
CREATE INDEX IF NOT EXISTS idx_completions_content ON content_completions (content_id);

CREATE TABLE IF NOT EXISTS calendar_events (
    id TEXT PRIMARY KEY,
    user_id TEXT,
    title TEXT NOT NULL DEFAULT '',
    content_id TEXT,
    content_type TEXT,
    scheduled_for INTEGER
);

CREATE TABLE IF NOT EXISTS notifications (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    created_at INTEGER
);

CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL DEFAULT '',
    description TEXT,
    order_index INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER
);

CREATE TABLE IF NOT EXISTS project_tasks (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id),
    title TEXT NOT NULL DEFAULT '',
    order_index INTEGER NOT NULL DEFAULT 0,
    done INTEGER NOT NULL DEFAULT 0
);
";
