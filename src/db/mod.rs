//! SQLite database module for progression data
//!
//! ## Architecture
//!
//! - Schema bootstrap and versioning run through rusqlite (`schema.rs`)
//! - Repository functions use Diesel over an r2d2 pool and take
//!   `&mut SqliteConnection`, so callers choose the transaction boundary
//!
//! ## Tables
//!
//! - `task_actions`, `daily_tasks` - task reference data
//! - `task_sets`, `task_set_tasks`, `task_calendar` - daily scheduling
//! - `user_task_progress`, `user_daily_resets` - per-user daily state
//! - `season_passes`, `season_milestones`, `milestone_rewards` - season reference data
//! - `user_season_progress` - per-user season state

pub mod schema;
pub mod diesel_schema;
pub mod models;
pub mod task_actions;
pub mod daily_tasks;
pub mod task_sets;
pub mod task_calendar;
pub mod task_progress;
pub mod seasons;
pub mod season_progress;

use std::path::{Path, PathBuf};

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::StoreError;
use diesel_schema as tables;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Per-connection settings applied when the pool hands out a connection
#[derive(Debug, Clone, Copy)]
struct ConnectionPragmas {
    busy_timeout_ms: u64,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionPragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {}; PRAGMA foreign_keys = ON;",
            self.busy_timeout_ms
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Pooled SQLite database for progression data
pub struct ProgressDb {
    pool: DbPool,
    path: PathBuf,
}

impl ProgressDb {
    /// Open or create the database described by `config`
    pub fn open(config: &Config) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&config.storage_dir)?;
        let db_path = config.database_path();
        info!("Opening SQLite database at {:?}", db_path);

        Self::bootstrap(&db_path)?;

        let manager = ConnectionManager::<SqliteConnection>::new(db_path.to_string_lossy());
        let pool = Pool::builder()
            .max_size(config.pool_size.max(1))
            .connection_customizer(Box::new(ConnectionPragmas {
                busy_timeout_ms: config.busy_timeout_ms,
            }))
            .build(manager)
            .map_err(|e| StoreError::Connection(format!("Failed to build pool: {}", e)))?;

        debug!(pool_size = config.pool_size, "Connection pool ready");

        Ok(Self { pool, path: db_path })
    }

    /// Create schema and switch the file to WAL mode
    fn bootstrap(db_path: &Path) -> Result<(), StoreError> {
        let conn = rusqlite::Connection::open(db_path)
            .map_err(|e| StoreError::Connection(format!("Failed to open SQLite: {}", e)))?;

        // WAL lets readers proceed while a claim holds the write lock
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| StoreError::Internal(format!("Failed to set PRAGMA: {}", e)))?;

        schema::init_schema(&conn)
    }

    /// Database file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check out a pooled connection
    pub fn conn(&self) -> Result<DbConn, StoreError> {
        self.pool
            .get()
            .map_err(|e| StoreError::Connection(format!("Failed to get connection: {}", e)))
    }

    /// Run a closure with a pooled connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, StoreError>,
    {
        let mut conn = self.conn()?;
        f(&mut conn)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, StoreError> {
        self.with_conn(|conn| {
            Ok(DbStats {
                task_actions: tables::task_actions::table.count().get_result::<i64>(conn)? as u64,
                daily_tasks: tables::daily_tasks::table.count().get_result::<i64>(conn)? as u64,
                task_sets: tables::task_sets::table.count().get_result::<i64>(conn)? as u64,
                calendar_days: tables::task_calendar::table.count().get_result::<i64>(conn)? as u64,
                task_progress_rows: tables::user_task_progress::table.count().get_result::<i64>(conn)? as u64,
                season_passes: tables::season_passes::table.count().get_result::<i64>(conn)? as u64,
                season_milestones: tables::season_milestones::table.count().get_result::<i64>(conn)? as u64,
                season_progress_rows: tables::user_season_progress::table.count().get_result::<i64>(conn)? as u64,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, Serialize)]
pub struct DbStats {
    pub task_actions: u64,
    pub daily_tasks: u64,
    pub task_sets: u64,
    pub calendar_days: u64,
    pub task_progress_rows: u64,
    pub season_passes: u64,
    pub season_milestones: u64,
    pub season_progress_rows: u64,
}

/// True when a diesel error is a unique/primary-key conflict
pub(crate) fn is_unique_violation(err: &diesel::result::Error) -> bool {
    matches!(
        err,
        diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _
        )
    )
}

// Re-exports
pub use models::{
    ClaimedMilestones, DailyTask, RewardDescriptor, SeasonMilestone, SeasonPass, TaskAction,
    TaskSet, TaskState, Track, UserSeasonProgress, UserTaskProgress,
};
