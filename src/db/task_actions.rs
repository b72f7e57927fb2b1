//! Task action CRUD operations using Diesel
//!
//! An action is the qualifying player event a daily task counts. Its key is
//! immutable: updates never touch `action_id`, and an action referenced by a
//! daily task cannot be deleted.

use diesel::prelude::*;
use serde::Deserialize;
use tracing::info;

use super::diesel_schema::{daily_tasks, task_actions};
use super::models::{current_timestamp, NewTaskAction, TaskAction};
use crate::error::StoreError;

// ============================================================================
// Query Types
// ============================================================================

/// Input for creating a task action
#[derive(Debug, Clone, Deserialize)]
pub struct CreateActionInput {
    pub action_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub tracking_event: String,
    #[serde(default)]
    pub tracking_conditions: Option<serde_json::Value>,
}

/// Partial update; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateActionInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tracking_event: Option<String>,
    #[serde(default)]
    pub tracking_conditions: Option<serde_json::Value>,
    /// Remove any tracking conditions
    #[serde(default)]
    pub clear_conditions: bool,
}

#[derive(AsChangeset)]
#[diesel(table_name = task_actions)]
struct ActionChanges<'a> {
    name: Option<&'a str>,
    description: Option<&'a str>,
    tracking_event: Option<&'a str>,
    tracking_conditions_json: Option<Option<&'a str>>,
    updated_at: &'a str,
}

// ============================================================================
// Read Operations
// ============================================================================

/// Get action by ID
pub fn get_action(
    conn: &mut SqliteConnection,
    action_id: &str,
) -> Result<Option<TaskAction>, StoreError> {
    task_actions::table
        .filter(task_actions::action_id.eq(action_id))
        .first(conn)
        .optional()
        .map_err(StoreError::from)
}

/// Get action by ID or fail with NotFound
pub fn require_action(
    conn: &mut SqliteConnection,
    action_id: &str,
) -> Result<TaskAction, StoreError> {
    get_action(conn, action_id)?
        .ok_or_else(|| StoreError::NotFound(format!("Task action {}", action_id)))
}

/// List all actions ordered by ID
pub fn list_actions(conn: &mut SqliteConnection) -> Result<Vec<TaskAction>, StoreError> {
    task_actions::table
        .order(task_actions::action_id.asc())
        .load(conn)
        .map_err(StoreError::from)
}

/// Actions tracking a given gameplay event type
pub fn list_actions_for_event(
    conn: &mut SqliteConnection,
    tracking_event: &str,
) -> Result<Vec<TaskAction>, StoreError> {
    task_actions::table
        .filter(task_actions::tracking_event.eq(tracking_event))
        .order(task_actions::action_id.asc())
        .load(conn)
        .map_err(StoreError::from)
}

/// Number of daily tasks bound to an action
pub fn reference_count(conn: &mut SqliteConnection, action_id: &str) -> Result<i64, StoreError> {
    daily_tasks::table
        .filter(daily_tasks::action_id.eq(action_id))
        .count()
        .get_result(conn)
        .map_err(StoreError::from)
}

// ============================================================================
// Write Operations
// ============================================================================

/// Create a task action
pub fn create_action(
    conn: &mut SqliteConnection,
    input: &CreateActionInput,
) -> Result<TaskAction, StoreError> {
    validate_key("action_id", &input.action_id)?;
    validate_key("tracking_event", &input.tracking_event)?;

    if get_action(conn, &input.action_id)?.is_some() {
        return Err(StoreError::Validation(format!(
            "Task action {} already exists",
            input.action_id
        )));
    }

    let conditions_json = encode_conditions(input.tracking_conditions.as_ref())?;

    diesel::insert_into(task_actions::table)
        .values(&NewTaskAction {
            action_id: &input.action_id,
            name: &input.name,
            description: &input.description,
            tracking_event: &input.tracking_event,
            tracking_conditions_json: conditions_json.as_deref(),
        })
        .execute(conn)?;

    info!(action_id = %input.action_id, tracking_event = %input.tracking_event, "Task action created");
    require_action(conn, &input.action_id)
}

/// Update the descriptive fields of an action
pub fn update_action(
    conn: &mut SqliteConnection,
    action_id: &str,
    input: &UpdateActionInput,
) -> Result<TaskAction, StoreError> {
    require_action(conn, action_id)?;

    if let Some(ref event) = input.tracking_event {
        validate_key("tracking_event", event)?;
    }

    let conditions_json = encode_conditions(input.tracking_conditions.as_ref())?;
    let conditions_change = if input.clear_conditions {
        Some(None)
    } else {
        conditions_json.as_deref().map(Some)
    };

    let now = current_timestamp();
    diesel::update(task_actions::table.filter(task_actions::action_id.eq(action_id)))
        .set(&ActionChanges {
            name: input.name.as_deref(),
            description: input.description.as_deref(),
            tracking_event: input.tracking_event.as_deref(),
            tracking_conditions_json: conditions_change,
            updated_at: &now,
        })
        .execute(conn)?;

    require_action(conn, action_id)
}

/// Delete an action that no daily task references
pub fn delete_action(conn: &mut SqliteConnection, action_id: &str) -> Result<(), StoreError> {
    require_action(conn, action_id)?;

    let references = reference_count(conn, action_id)?;
    if references > 0 {
        return Err(StoreError::Validation(format!(
            "Task action {} is referenced by {} daily task(s)",
            action_id, references
        )));
    }

    diesel::delete(task_actions::table.filter(task_actions::action_id.eq(action_id)))
        .execute(conn)?;

    info!(action_id, "Task action deleted");
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Reject empty or whitespace-only keys
pub(crate) fn validate_key(field: &str, value: &str) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        return Err(StoreError::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn encode_conditions(conditions: Option<&serde_json::Value>) -> Result<Option<String>, StoreError> {
    match conditions {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value @ serde_json::Value::Object(_)) => Ok(Some(serde_json::to_string(value)?)),
        Some(other) => Err(StoreError::Validation(format!(
            "tracking_conditions must be an object, got {}",
            other
        ))),
    }
}
