//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::StoreError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    ).map_err(|e| StoreError::Internal(format!("Failed to create schema_version table: {}", e)))?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

/// Set schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<(), StoreError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| StoreError::Internal(format!("Failed to clear schema_version: {}", e)))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| StoreError::Internal(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

/// Create all tables
fn create_tables(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(TASKS_SCHEMA)
        .map_err(|e| StoreError::Internal(format!("Failed to create task tables: {}", e)))?;

    conn.execute_batch(SEASONS_SCHEMA)
        .map_err(|e| StoreError::Internal(format!("Failed to create season tables: {}", e)))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| StoreError::Internal(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

/// Migrate schema from older version
fn migrate_schema(conn: &Connection, from_version: i32) -> Result<(), StoreError> {
    // v1 is the first released layout; later versions add their steps here.
    info!(from_version, "No migration steps registered");
    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Daily task tables
const TASKS_SCHEMA: &str = r#"
-- Qualifying player actions (poker_hand, blackjack_win, ...)
CREATE TABLE IF NOT EXISTS task_actions (
    action_id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    tracking_event TEXT NOT NULL,
    tracking_conditions_json TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

CREATE TABLE IF NOT EXISTS daily_tasks (
    task_id TEXT PRIMARY KEY NOT NULL,
    action_id TEXT NOT NULL REFERENCES task_actions(action_id) ON DELETE RESTRICT,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    required_repetitions INTEGER NOT NULL DEFAULT 1 CHECK (required_repetitions >= 1),
    reward_type TEXT NOT NULL DEFAULT 'gems',
    reward_amount INTEGER NOT NULL DEFAULT 0 CHECK (reward_amount >= 0),
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

CREATE TABLE IF NOT EXISTS task_sets (
    set_id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

CREATE TABLE IF NOT EXISTS task_set_tasks (
    set_id TEXT NOT NULL REFERENCES task_sets(set_id) ON DELETE CASCADE,
    task_id TEXT NOT NULL REFERENCES daily_tasks(task_id) ON DELETE CASCADE,
    display_order INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    PRIMARY KEY (set_id, task_id)
);

-- One set per calendar date
CREATE TABLE IF NOT EXISTS task_calendar (
    date TEXT PRIMARY KEY NOT NULL,
    set_id TEXT NOT NULL REFERENCES task_sets(set_id) ON DELETE RESTRICT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

CREATE TABLE IF NOT EXISTS user_task_progress (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    task_id TEXT NOT NULL REFERENCES daily_tasks(task_id) ON DELETE CASCADE,
    tracking_date TEXT NOT NULL,
    current_repetitions INTEGER NOT NULL DEFAULT 0 CHECK (current_repetitions >= 0),
    completed INTEGER NOT NULL DEFAULT 0,
    reward_claimed INTEGER NOT NULL DEFAULT 0,
    reset_at TEXT NOT NULL,
    completed_at TEXT,
    claimed_at TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    UNIQUE (user_id, task_id, tracking_date),
    CHECK (reward_claimed = 0 OR completed = 1)
);

CREATE TABLE IF NOT EXISTS user_daily_resets (
    user_id INTEGER NOT NULL,
    reset_date TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    PRIMARY KEY (user_id, reset_date)
);
"#;

/// Season pass tables
const SEASONS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS season_passes (
    season_id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_by INTEGER,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    CHECK (start_date <= end_date)
);

CREATE TABLE IF NOT EXISTS season_milestones (
    milestone_id TEXT PRIMARY KEY NOT NULL,
    season_id TEXT NOT NULL REFERENCES season_passes(season_id) ON DELETE CASCADE,
    milestone_number INTEGER NOT NULL,
    required_points INTEGER NOT NULL CHECK (required_points >= 0),
    free_reward_type TEXT NOT NULL DEFAULT 'chips',
    free_reward_amount INTEGER NOT NULL DEFAULT 0 CHECK (free_reward_amount >= 0),
    paid_reward_type TEXT NOT NULL DEFAULT 'chips',
    paid_reward_amount INTEGER NOT NULL DEFAULT 0 CHECK (paid_reward_amount >= 0),
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    UNIQUE (season_id, milestone_number)
);

CREATE TABLE IF NOT EXISTS milestone_rewards (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    milestone_id TEXT NOT NULL REFERENCES season_milestones(milestone_id) ON DELETE CASCADE,
    track_type TEXT NOT NULL CHECK (track_type IN ('free', 'paid')),
    reward_type TEXT NOT NULL,
    reward_amount INTEGER NOT NULL DEFAULT 0 CHECK (reward_amount >= 0),
    display_order INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

-- claimed_milestones_json holds a sorted JSON array of milestone ids
CREATE TABLE IF NOT EXISTS user_season_progress (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    season_id TEXT NOT NULL REFERENCES season_passes(season_id) ON DELETE RESTRICT,
    has_inside_track INTEGER NOT NULL DEFAULT 0,
    season_points INTEGER NOT NULL DEFAULT 0 CHECK (season_points >= 0),
    claimed_milestones_json TEXT NOT NULL DEFAULT '[]',
    version INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    UNIQUE (user_id, season_id)
);
"#;

/// Indexes for common queries
const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_daily_tasks_action ON daily_tasks(action_id);
CREATE INDEX IF NOT EXISTS idx_task_actions_event ON task_actions(tracking_event);
CREATE INDEX IF NOT EXISTS idx_task_set_tasks_task ON task_set_tasks(task_id);
CREATE INDEX IF NOT EXISTS idx_task_calendar_set ON task_calendar(set_id);
CREATE INDEX IF NOT EXISTS idx_task_progress_user_date ON user_task_progress(user_id, tracking_date);
CREATE INDEX IF NOT EXISTS idx_milestone_rewards_milestone ON milestone_rewards(milestone_id);
CREATE INDEX IF NOT EXISTS idx_milestone_rewards_track ON milestone_rewards(track_type);
CREATE INDEX IF NOT EXISTS idx_season_progress_season ON user_season_progress(season_id);
"#;
