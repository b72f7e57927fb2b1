//! Per-user daily task progress
//!
//! Rows move `pending -> completed -> claimed` and never backwards; a new day
//! gets a new row keyed by `tracking_date`. Writes that can credit a reward run
//! inside `BEGIN IMMEDIATE` so two deliveries of the same event serialize on
//! the SQLite write lock instead of both reading the pre-update row.

use chrono::NaiveDate;
use diesel::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use super::daily_tasks::require_task;
use super::diesel_schema::{user_daily_resets, user_task_progress};
use super::models::{
    current_timestamp, date_key, reset_instant, NewUserDailyReset, NewUserTaskProgress,
    RewardDescriptor, UserDailyReset, UserTaskProgress,
};
use super::is_unique_violation;
use crate::error::StoreError;

// ============================================================================
// Result Types
// ============================================================================

/// Outcome of a successful increment
#[derive(Debug, Clone, Serialize)]
pub struct IncrementOutcome {
    pub progress: UserTaskProgress,
    /// True when this increment reached `required_repetitions`
    pub newly_completed: bool,
}

/// Outcome of a successful reward claim
#[derive(Debug, Clone, Serialize)]
pub struct ClaimedTaskReward {
    pub progress: UserTaskProgress,
    pub reward: RewardDescriptor,
}

// ============================================================================
// Read Operations
// ============================================================================

/// Progress row for (user, task, date)
pub fn get_progress(
    conn: &mut SqliteConnection,
    user_id: i64,
    task_id: &str,
    tracking_date: NaiveDate,
) -> Result<Option<UserTaskProgress>, StoreError> {
    user_task_progress::table
        .filter(user_task_progress::user_id.eq(user_id))
        .filter(user_task_progress::task_id.eq(task_id))
        .filter(user_task_progress::tracking_date.eq(date_key(tracking_date)))
        .first(conn)
        .optional()
        .map_err(StoreError::from)
}

/// All of a user's progress rows for a date
pub fn list_progress_for_date(
    conn: &mut SqliteConnection,
    user_id: i64,
    tracking_date: NaiveDate,
) -> Result<Vec<UserTaskProgress>, StoreError> {
    user_task_progress::table
        .filter(user_task_progress::user_id.eq(user_id))
        .filter(user_task_progress::tracking_date.eq(date_key(tracking_date)))
        .order(user_task_progress::task_id.asc())
        .load(conn)
        .map_err(StoreError::from)
}

// ============================================================================
// Write Operations
// ============================================================================

/// Return the row for (user, task, date), creating it if absent
///
/// A concurrent creator that wins the insert race makes ours fail the unique
/// index; the row it created is then fetched and returned.
pub fn get_or_create_progress(
    conn: &mut SqliteConnection,
    user_id: i64,
    task_id: &str,
    tracking_date: NaiveDate,
) -> Result<UserTaskProgress, StoreError> {
    require_task(conn, task_id)?;

    if let Some(existing) = get_progress(conn, user_id, task_id, tracking_date)? {
        return Ok(existing);
    }

    match insert_progress(conn, user_id, task_id, tracking_date) {
        Ok(created) => Ok(created),
        Err(StoreError::Database(e)) if is_unique_violation(&e) => {
            debug!(user_id, task_id, "Progress row created concurrently, re-fetching");
            get_progress(conn, user_id, task_id, tracking_date)?
                .ok_or_else(|| StoreError::Internal("Conflicting progress row vanished".into()))
        }
        Err(e) => Err(e),
    }
}

fn insert_progress(
    conn: &mut SqliteConnection,
    user_id: i64,
    task_id: &str,
    tracking_date: NaiveDate,
) -> Result<UserTaskProgress, StoreError> {
    let date = date_key(tracking_date);
    let reset_at = reset_instant(tracking_date);

    diesel::insert_into(user_task_progress::table)
        .values(&NewUserTaskProgress {
            user_id,
            task_id,
            tracking_date: &date,
            current_repetitions: 0,
            completed: false,
            reward_claimed: false,
            reset_at: &reset_at,
        })
        .execute(conn)?;

    debug!(user_id, task_id, tracking_date = %date, "Progress row created");
    get_progress(conn, user_id, task_id, tracking_date)?
        .ok_or_else(|| StoreError::Internal("Failed to retrieve created progress".into()))
}

/// Add `delta` repetitions, clamped to the task's requirement
///
/// Rejects inactive tasks, dates other than `today`, and rows that are already
/// complete (`AlreadyCompleted`), so redundant deliveries are visible to the
/// caller.
pub fn increment_repetition(
    conn: &mut SqliteConnection,
    user_id: i64,
    task_id: &str,
    tracking_date: NaiveDate,
    delta: i32,
    today: NaiveDate,
) -> Result<IncrementOutcome, StoreError> {
    conn.immediate_transaction(|conn| {
        apply_increment(conn, user_id, task_id, tracking_date, delta, today)
    })
}

/// Body of [`increment_repetition`] for callers that already hold a write
/// transaction and batch several increments into it.
///
/// Every rejection is returned before the row is written.
pub fn apply_increment(
    conn: &mut SqliteConnection,
    user_id: i64,
    task_id: &str,
    tracking_date: NaiveDate,
    delta: i32,
    today: NaiveDate,
) -> Result<IncrementOutcome, StoreError> {
    if delta < 1 {
        return Err(StoreError::Validation(format!("delta must be at least 1, got {}", delta)));
    }

    let task = require_task(conn, task_id)?;
    if !task.is_active {
        return Err(StoreError::Validation(format!("Daily task {} is inactive", task_id)));
    }
    if tracking_date != today {
        return Err(StoreError::Validation(format!(
            "Tracking date {} is not today ({})",
            tracking_date, today
        )));
    }

    let existing = get_progress(conn, user_id, task_id, tracking_date)?;
    if let Some(progress) = existing.as_ref().filter(|p| p.completed) {
        return Err(StoreError::AlreadyCompleted(format!(
            "user {} task {} on {}",
            user_id, task_id, progress.tracking_date
        )));
    }
    let progress = match existing {
        Some(progress) => progress,
        None => insert_progress(conn, user_id, task_id, tracking_date)?,
    };

    let required = task.required_repetitions;
    let next = progress.current_repetitions.saturating_add(delta).min(required);
    let completed = next >= required;
    let now = current_timestamp();

    diesel::update(user_task_progress::table.find(progress.id))
        .set((
            user_task_progress::current_repetitions.eq(next),
            user_task_progress::completed.eq(completed),
            user_task_progress::completed_at.eq(completed.then(|| now.clone())),
            user_task_progress::updated_at.eq(&now),
        ))
        .execute(conn)?;

    if completed {
        info!(user_id, task_id, repetitions = next, "Daily task completed");
    } else {
        debug!(user_id, task_id, repetitions = next, required, "Daily task progressed");
    }

    let progress = get_progress(conn, user_id, task_id, tracking_date)?
        .ok_or_else(|| StoreError::Internal("Failed to retrieve updated progress".into()))?;

    Ok(IncrementOutcome {
        progress,
        newly_completed: completed,
    })
}

/// Mark a completed row's reward as claimed and return what to credit
pub fn claim_reward(
    conn: &mut SqliteConnection,
    user_id: i64,
    task_id: &str,
    tracking_date: NaiveDate,
) -> Result<ClaimedTaskReward, StoreError> {
    conn.immediate_transaction(|conn| {
        let task = require_task(conn, task_id)?;
        let label = format!("user {} task {} on {}", user_id, task_id, tracking_date);

        let progress = get_progress(conn, user_id, task_id, tracking_date)?
            .ok_or_else(|| StoreError::NotCompleted(label.clone()))?;

        if progress.reward_claimed {
            return Err(StoreError::AlreadyClaimed(label));
        }
        if !progress.completed {
            return Err(StoreError::NotCompleted(label));
        }

        let now = current_timestamp();
        let updated = diesel::update(
            user_task_progress::table
                .find(progress.id)
                .filter(user_task_progress::completed.eq(true))
                .filter(user_task_progress::reward_claimed.eq(false)),
        )
        .set((
            user_task_progress::reward_claimed.eq(true),
            user_task_progress::claimed_at.eq(&now),
            user_task_progress::updated_at.eq(&now),
        ))
        .execute(conn)?;

        if updated != 1 {
            return Err(StoreError::AlreadyClaimed(label));
        }

        let reward = task.reward();
        info!(
            user_id,
            task_id,
            reward_type = %reward.reward_type,
            amount = reward.amount,
            "Daily task reward claimed"
        );

        let progress = get_progress(conn, user_id, task_id, tracking_date)?
            .ok_or_else(|| StoreError::Internal("Failed to retrieve claimed progress".into()))?;

        Ok(ClaimedTaskReward { progress, reward })
    })
}

// ============================================================================
// Daily Resets
// ============================================================================

/// Record that a user's day was reset; false if already recorded
pub fn record_daily_reset(
    conn: &mut SqliteConnection,
    user_id: i64,
    reset_date: NaiveDate,
) -> Result<bool, StoreError> {
    let key = date_key(reset_date);
    let result = diesel::insert_into(user_daily_resets::table)
        .values(&NewUserDailyReset {
            user_id,
            reset_date: &key,
        })
        .execute(conn);

    match result {
        Ok(_) => Ok(true),
        Err(e) if is_unique_violation(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Most recent recorded reset for a user
pub fn last_daily_reset(
    conn: &mut SqliteConnection,
    user_id: i64,
) -> Result<Option<UserDailyReset>, StoreError> {
    user_daily_resets::table
        .filter(user_daily_resets::user_id.eq(user_id))
        .order(user_daily_resets::reset_date.desc())
        .first(conn)
        .optional()
        .map_err(StoreError::from)
}
