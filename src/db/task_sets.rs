//! Task set operations using Diesel
//!
//! Sets bundle daily tasks for a calendar date through the `task_set_tasks`
//! join table. A set is schedulable only while it is active and contains at
//! least one active task.

use diesel::prelude::*;
use serde::Deserialize;
use tracing::{debug, info};

use super::daily_tasks::require_task;
use super::diesel_schema::{daily_tasks, task_set_tasks, task_sets};
use super::models::{
    current_timestamp, DailyTask, NewTaskSet, NewTaskSetTask, OrderedTask, TaskSet,
    TaskSetWithTasks,
};
use super::task_actions::validate_key;
use crate::error::StoreError;

/// Input for creating a task set
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSetInput {
    pub set_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool { true }

// ============================================================================
// Read Operations
// ============================================================================

pub fn get_set(conn: &mut SqliteConnection, set_id: &str) -> Result<Option<TaskSet>, StoreError> {
    task_sets::table
        .filter(task_sets::set_id.eq(set_id))
        .first(conn)
        .optional()
        .map_err(StoreError::from)
}

pub fn require_set(conn: &mut SqliteConnection, set_id: &str) -> Result<TaskSet, StoreError> {
    get_set(conn, set_id)?.ok_or_else(|| StoreError::NotFound(format!("Task set {}", set_id)))
}

/// List sets ordered by name
pub fn list_sets(conn: &mut SqliteConnection) -> Result<Vec<TaskSet>, StoreError> {
    task_sets::table
        .order((task_sets::name.asc(), task_sets::set_id.asc()))
        .load(conn)
        .map_err(StoreError::from)
}

/// Tasks of a set ordered by display order
pub fn tasks_in_set(
    conn: &mut SqliteConnection,
    set_id: &str,
    active_only: bool,
) -> Result<Vec<OrderedTask>, StoreError> {
    let mut query = task_set_tasks::table
        .inner_join(daily_tasks::table)
        .filter(task_set_tasks::set_id.eq(set_id))
        .select((DailyTask::as_select(), task_set_tasks::display_order))
        .into_boxed();

    if active_only {
        query = query.filter(daily_tasks::is_active.eq(true));
    }

    let rows: Vec<(DailyTask, i32)> = query
        .order((task_set_tasks::display_order.asc(), daily_tasks::task_id.asc()))
        .load(conn)?;

    debug!(set_id, count = rows.len(), "Loaded set tasks");

    Ok(rows
        .into_iter()
        .map(|(task, display_order)| OrderedTask { task, display_order })
        .collect())
}

/// All sets with every member task (inactive tasks included)
pub fn list_sets_with_tasks(
    conn: &mut SqliteConnection,
) -> Result<Vec<TaskSetWithTasks>, StoreError> {
    let sets = list_sets(conn)?;
    let mut result = Vec::with_capacity(sets.len());
    for set in sets {
        let tasks = tasks_in_set(conn, &set.set_id, false)?;
        result.push(TaskSetWithTasks { set, tasks });
    }
    Ok(result)
}

/// Whether a set may be assigned to a calendar date
pub fn is_schedulable(conn: &mut SqliteConnection, set_id: &str) -> Result<bool, StoreError> {
    let set = require_set(conn, set_id)?;
    if !set.is_active {
        return Ok(false);
    }

    let active_tasks: i64 = task_set_tasks::table
        .inner_join(daily_tasks::table)
        .filter(task_set_tasks::set_id.eq(set_id))
        .filter(daily_tasks::is_active.eq(true))
        .count()
        .get_result(conn)?;

    Ok(active_tasks > 0)
}

// ============================================================================
// Write Operations
// ============================================================================

pub fn create_set(
    conn: &mut SqliteConnection,
    input: &CreateSetInput,
) -> Result<TaskSet, StoreError> {
    validate_key("set_id", &input.set_id)?;

    if get_set(conn, &input.set_id)?.is_some() {
        return Err(StoreError::Validation(format!("Task set {} already exists", input.set_id)));
    }

    diesel::insert_into(task_sets::table)
        .values(&NewTaskSet {
            set_id: &input.set_id,
            name: &input.name,
            description: input.description.as_deref(),
            is_active: input.is_active,
        })
        .execute(conn)?;

    info!(set_id = %input.set_id, "Task set created");
    require_set(conn, &input.set_id)
}

pub fn set_active(
    conn: &mut SqliteConnection,
    set_id: &str,
    is_active: bool,
) -> Result<TaskSet, StoreError> {
    require_set(conn, set_id)?;

    diesel::update(task_sets::table.filter(task_sets::set_id.eq(set_id)))
        .set((
            task_sets::is_active.eq(is_active),
            task_sets::updated_at.eq(current_timestamp()),
        ))
        .execute(conn)?;

    require_set(conn, set_id)
}

/// Add a task to a set; each (set, task) pair may appear once
pub fn add_task_to_set(
    conn: &mut SqliteConnection,
    set_id: &str,
    task_id: &str,
    display_order: i32,
) -> Result<(), StoreError> {
    require_set(conn, set_id)?;
    require_task(conn, task_id)?;

    let result = diesel::insert_into(task_set_tasks::table)
        .values(&NewTaskSetTask { set_id, task_id, display_order })
        .execute(conn);

    match result {
        Ok(_) => {
            debug!(set_id, task_id, display_order, "Task added to set");
            Ok(())
        }
        Err(e) if super::is_unique_violation(&e) => Err(StoreError::Validation(format!(
            "Task {} is already in set {}",
            task_id, set_id
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Remove a task from a set; returns false if it was not a member
pub fn remove_task_from_set(
    conn: &mut SqliteConnection,
    set_id: &str,
    task_id: &str,
) -> Result<bool, StoreError> {
    let deleted = diesel::delete(
        task_set_tasks::table
            .filter(task_set_tasks::set_id.eq(set_id))
            .filter(task_set_tasks::task_id.eq(task_id)),
    )
    .execute(conn)?;

    Ok(deleted > 0)
}
