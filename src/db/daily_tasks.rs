//! Daily task CRUD operations using Diesel

use diesel::prelude::*;
use serde::Deserialize;
use tracing::info;

use super::diesel_schema::{daily_tasks, user_task_progress};
use super::models::{current_timestamp, reward_types, DailyTask, NewDailyTask};
use super::task_actions::{require_action, validate_key};
use crate::error::StoreError;

// ============================================================================
// Query Types
// ============================================================================

/// Input for creating a daily task
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskInput {
    pub task_id: String,
    pub action_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_required_repetitions")]
    pub required_repetitions: i32,
    #[serde(default = "default_reward_type")]
    pub reward_type: String,
    #[serde(default)]
    pub reward_amount: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_required_repetitions() -> i32 { 1 }
fn default_reward_type() -> String { reward_types::TASK_DEFAULT.to_string() }
fn default_true() -> bool { true }

/// Partial update; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTaskInput {
    pub action_id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub required_repetitions: Option<i32>,
    pub reward_type: Option<String>,
    pub reward_amount: Option<i64>,
    pub is_active: Option<bool>,
}

#[derive(AsChangeset)]
#[diesel(table_name = daily_tasks)]
struct TaskChanges<'a> {
    action_id: Option<&'a str>,
    name: Option<&'a str>,
    description: Option<&'a str>,
    required_repetitions: Option<i32>,
    reward_type: Option<&'a str>,
    reward_amount: Option<i64>,
    is_active: Option<bool>,
    updated_at: &'a str,
}

// ============================================================================
// Read Operations
// ============================================================================

/// Get task by ID
pub fn get_task(
    conn: &mut SqliteConnection,
    task_id: &str,
) -> Result<Option<DailyTask>, StoreError> {
    daily_tasks::table
        .filter(daily_tasks::task_id.eq(task_id))
        .first(conn)
        .optional()
        .map_err(StoreError::from)
}

/// Get task by ID or fail with NotFound
pub fn require_task(conn: &mut SqliteConnection, task_id: &str) -> Result<DailyTask, StoreError> {
    get_task(conn, task_id)?
        .ok_or_else(|| StoreError::NotFound(format!("Daily task {}", task_id)))
}

/// List tasks, optionally only active ones
pub fn list_tasks(
    conn: &mut SqliteConnection,
    active_only: bool,
) -> Result<Vec<DailyTask>, StoreError> {
    let mut query = daily_tasks::table.into_boxed();
    if active_only {
        query = query.filter(daily_tasks::is_active.eq(true));
    }

    query
        .order(daily_tasks::task_id.asc())
        .load(conn)
        .map_err(StoreError::from)
}

// ============================================================================
// Write Operations
// ============================================================================

/// Create a daily task bound to an existing action
pub fn create_task(
    conn: &mut SqliteConnection,
    input: &CreateTaskInput,
) -> Result<DailyTask, StoreError> {
    validate_key("task_id", &input.task_id)?;
    validate_rules(input.required_repetitions, input.reward_amount, &input.reward_type)?;

    if get_task(conn, &input.task_id)?.is_some() {
        return Err(StoreError::Validation(format!(
            "Daily task {} already exists",
            input.task_id
        )));
    }
    require_action(conn, &input.action_id)?;

    diesel::insert_into(daily_tasks::table)
        .values(&NewDailyTask {
            task_id: &input.task_id,
            action_id: &input.action_id,
            name: &input.name,
            description: &input.description,
            required_repetitions: input.required_repetitions,
            reward_type: &input.reward_type,
            reward_amount: input.reward_amount,
            is_active: input.is_active,
        })
        .execute(conn)?;

    info!(
        task_id = %input.task_id,
        action_id = %input.action_id,
        required_repetitions = input.required_repetitions,
        "Daily task created"
    );
    require_task(conn, &input.task_id)
}

/// Apply a partial update to a task
pub fn update_task(
    conn: &mut SqliteConnection,
    task_id: &str,
    input: &UpdateTaskInput,
) -> Result<DailyTask, StoreError> {
    let existing = require_task(conn, task_id)?;

    validate_rules(
        input.required_repetitions.unwrap_or(existing.required_repetitions),
        input.reward_amount.unwrap_or(existing.reward_amount),
        input.reward_type.as_deref().unwrap_or(&existing.reward_type),
    )?;

    if let Some(ref action_id) = input.action_id {
        require_action(conn, action_id)?;
    }

    let now = current_timestamp();
    diesel::update(daily_tasks::table.filter(daily_tasks::task_id.eq(task_id)))
        .set(&TaskChanges {
            action_id: input.action_id.as_deref(),
            name: input.name.as_deref(),
            description: input.description.as_deref(),
            required_repetitions: input.required_repetitions,
            reward_type: input.reward_type.as_deref(),
            reward_amount: input.reward_amount,
            is_active: input.is_active,
            updated_at: &now,
        })
        .execute(conn)?;

    require_task(conn, task_id)
}

/// Delete a task that has no recorded player progress
pub fn delete_task(conn: &mut SqliteConnection, task_id: &str) -> Result<(), StoreError> {
    require_task(conn, task_id)?;

    let progress_rows: i64 = user_task_progress::table
        .filter(user_task_progress::task_id.eq(task_id))
        .count()
        .get_result(conn)?;

    if progress_rows > 0 {
        return Err(StoreError::Validation(format!(
            "Daily task {} has player progress; deactivate it instead",
            task_id
        )));
    }

    diesel::delete(daily_tasks::table.filter(daily_tasks::task_id.eq(task_id))).execute(conn)?;

    info!(task_id, "Daily task deleted");
    Ok(())
}

fn validate_rules(
    required_repetitions: i32,
    reward_amount: i64,
    reward_type: &str,
) -> Result<(), StoreError> {
    if required_repetitions < 1 {
        return Err(StoreError::Validation(format!(
            "required_repetitions must be at least 1, got {}",
            required_repetitions
        )));
    }
    if reward_amount < 0 {
        return Err(StoreError::Validation(format!(
            "reward_amount must not be negative, got {}",
            reward_amount
        )));
    }
    validate_key("reward_type", reward_type)
}
