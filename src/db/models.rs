//! Diesel model definitions for database tables
//!
//! - Queryable structs: for SELECT queries (reading data)
//! - Insertable structs: for INSERT queries (writing data)
//!
//! Foreign keys are plain identifiers; related rows are loaded with explicit
//! queries in the repository modules.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDate};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use super::diesel_schema::*;
use crate::error::StoreError;

// ============================================================================
// Timestamp Helpers (SQLite stores timestamps as TEXT)
// ============================================================================

/// Get current UTC timestamp as ISO 8601 string for SQLite TEXT columns
pub fn current_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Calendar date as stored in DATE-like TEXT columns
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Parse a stored `YYYY-MM-DD` column
pub fn parse_date(value: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| StoreError::Validation(format!("Invalid date '{}': {}", value, e)))
}

/// Next reset instant for a tracking date: its midnight plus 24h
pub fn reset_instant(tracking_date: NaiveDate) -> String {
    let midnight = tracking_date.and_hms_opt(0, 0, 0).unwrap_or_default();
    (midnight + Duration::hours(24))
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}

// ============================================================================
// Rewards
// ============================================================================

/// Known reward currencies
pub mod reward_types {
    pub const GEMS: &str = "gems";
    pub const CHIPS: &str = "chips";

    /// Default for daily tasks
    pub const TASK_DEFAULT: &str = GEMS;

    /// Default for season milestones
    pub const MILESTONE_DEFAULT: &str = CHIPS;
}

/// What the external ledger should credit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardDescriptor {
    pub reward_type: String,
    pub amount: i64,
}

impl RewardDescriptor {
    pub fn new(reward_type: impl Into<String>, amount: i64) -> Self {
        Self {
            reward_type: reward_type.into(),
            amount,
        }
    }
}

/// Season pass reward track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    Free,
    Paid,
}

impl Track {
    pub fn as_str(&self) -> &'static str {
        match self {
            Track::Free => "free",
            Track::Paid => "paid",
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Track {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Track::Free),
            "paid" => Ok(Track::Paid),
            other => Err(StoreError::Validation(format!(
                "Invalid track: {}. Valid tracks: free, paid",
                other
            ))),
        }
    }
}

// ============================================================================
// Task Action Models
// ============================================================================

/// Qualifying action a daily task counts
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = task_actions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TaskAction {
    pub action_id: String,
    pub name: String,
    pub description: String,
    pub tracking_event: String,
    pub tracking_conditions_json: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TaskAction {
    /// Decoded tracking conditions, if any
    pub fn tracking_conditions(&self) -> Result<Option<serde_json::Value>, StoreError> {
        self.tracking_conditions_json
            .as_deref()
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()
            .map_err(StoreError::from)
    }
}

/// New task action for INSERT
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = task_actions)]
pub struct NewTaskAction<'a> {
    pub action_id: &'a str,
    pub name: &'a str,
    pub description: &'a str,
    pub tracking_event: &'a str,
    pub tracking_conditions_json: Option<&'a str>,
}

// ============================================================================
// Daily Task Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = daily_tasks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DailyTask {
    pub task_id: String,
    pub action_id: String,
    pub name: String,
    pub description: String,
    pub required_repetitions: i32,
    pub reward_type: String,
    pub reward_amount: i64,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl DailyTask {
    pub fn reward(&self) -> RewardDescriptor {
        RewardDescriptor::new(&self.reward_type, self.reward_amount)
    }
}

/// New daily task for INSERT
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = daily_tasks)]
pub struct NewDailyTask<'a> {
    pub task_id: &'a str,
    pub action_id: &'a str,
    pub name: &'a str,
    pub description: &'a str,
    pub required_repetitions: i32,
    pub reward_type: &'a str,
    pub reward_amount: i64,
    pub is_active: bool,
}

// ============================================================================
// Task Set Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = task_sets)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TaskSet {
    pub set_id: String,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = task_sets)]
pub struct NewTaskSet<'a> {
    pub set_id: &'a str,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub is_active: bool,
}

/// Membership row of the set/task join table
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = task_set_tasks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TaskSetTask {
    pub set_id: String,
    pub task_id: String,
    pub display_order: i32,
    pub created_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = task_set_tasks)]
pub struct NewTaskSetTask<'a> {
    pub set_id: &'a str,
    pub task_id: &'a str,
    pub display_order: i32,
}

/// Task with its position inside a set
#[derive(Debug, Clone, Serialize)]
pub struct OrderedTask {
    #[serde(flatten)]
    pub task: DailyTask,
    pub display_order: i32,
}

/// Set with its member tasks (API response)
#[derive(Debug, Clone, Serialize)]
pub struct TaskSetWithTasks {
    #[serde(flatten)]
    pub set: TaskSet,
    pub tasks: Vec<OrderedTask>,
}

// ============================================================================
// Calendar Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = task_calendar)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CalendarEntry {
    pub date: String,
    pub set_id: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = task_calendar)]
pub struct NewCalendarEntry<'a> {
    pub date: &'a str,
    pub set_id: &'a str,
}

// ============================================================================
// Task Progress Models
// ============================================================================

/// Lifecycle of a progress row; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Completed,
    Claimed,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = user_task_progress)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UserTaskProgress {
    pub id: i32,
    pub user_id: i64,
    pub task_id: String,
    pub tracking_date: String,
    pub current_repetitions: i32,
    pub completed: bool,
    pub reward_claimed: bool,
    pub reset_at: String,
    pub completed_at: Option<String>,
    pub claimed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl UserTaskProgress {
    pub fn state(&self) -> TaskState {
        match (self.completed, self.reward_claimed) {
            (_, true) => TaskState::Claimed,
            (true, false) => TaskState::Completed,
            (false, false) => TaskState::Pending,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = user_task_progress)]
pub struct NewUserTaskProgress<'a> {
    pub user_id: i64,
    pub task_id: &'a str,
    pub tracking_date: &'a str,
    pub current_repetitions: i32,
    pub completed: bool,
    pub reward_claimed: bool,
    pub reset_at: &'a str,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = user_daily_resets)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UserDailyReset {
    pub user_id: i64,
    pub reset_date: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = user_daily_resets)]
pub struct NewUserDailyReset<'a> {
    pub user_id: i64,
    pub reset_date: &'a str,
}

// ============================================================================
// Season Pass Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = season_passes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SeasonPass {
    pub season_id: String,
    pub name: String,
    pub description: Option<String>,
    pub start_date: String,
    pub end_date: String,
    pub is_active: bool,
    pub created_by: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl SeasonPass {
    /// Inclusive date range of the season
    pub fn date_range(&self) -> Result<(NaiveDate, NaiveDate), StoreError> {
        Ok((parse_date(&self.start_date)?, parse_date(&self.end_date)?))
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = season_passes)]
pub struct NewSeasonPass<'a> {
    pub season_id: &'a str,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub start_date: &'a str,
    pub end_date: &'a str,
    pub is_active: bool,
    pub created_by: Option<i64>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = season_milestones)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SeasonMilestone {
    pub milestone_id: String,
    pub season_id: String,
    pub milestone_number: i32,
    pub required_points: i64,
    pub free_reward_type: String,
    pub free_reward_amount: i64,
    pub paid_reward_type: String,
    pub paid_reward_amount: i64,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl SeasonMilestone {
    /// Reward stored inline on the milestone row for a track
    pub fn inline_reward(&self, track: Track) -> RewardDescriptor {
        match track {
            Track::Free => RewardDescriptor::new(&self.free_reward_type, self.free_reward_amount),
            Track::Paid => RewardDescriptor::new(&self.paid_reward_type, self.paid_reward_amount),
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = season_milestones)]
pub struct NewSeasonMilestone<'a> {
    pub milestone_id: &'a str,
    pub season_id: &'a str,
    pub milestone_number: i32,
    pub required_points: i64,
    pub free_reward_type: &'a str,
    pub free_reward_amount: i64,
    pub paid_reward_type: &'a str,
    pub paid_reward_amount: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = milestone_rewards)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MilestoneReward {
    pub id: i32,
    pub milestone_id: String,
    pub track_type: String,
    pub reward_type: String,
    pub reward_amount: i64,
    pub display_order: i32,
    pub created_at: String,
}

impl MilestoneReward {
    pub fn descriptor(&self) -> RewardDescriptor {
        RewardDescriptor::new(&self.reward_type, self.reward_amount)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = milestone_rewards)]
pub struct NewMilestoneReward<'a> {
    pub milestone_id: &'a str,
    pub track_type: &'a str,
    pub reward_type: &'a str,
    pub reward_amount: i64,
    pub display_order: i32,
}

// ============================================================================
// Season Progress Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = user_season_progress)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UserSeasonProgress {
    pub id: i32,
    pub user_id: i64,
    pub season_id: String,
    pub has_inside_track: bool,
    pub season_points: i64,
    pub claimed_milestones_json: String,
    pub version: i32,
    pub created_at: String,
    pub updated_at: String,
}

impl UserSeasonProgress {
    pub fn claimed_milestones(&self) -> Result<ClaimedMilestones, StoreError> {
        ClaimedMilestones::from_json(&self.claimed_milestones_json)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = user_season_progress)]
pub struct NewUserSeasonProgress<'a> {
    pub user_id: i64,
    pub season_id: &'a str,
    pub has_inside_track: bool,
    pub season_points: i64,
    pub claimed_milestones_json: &'a str,
}

/// Set of milestone ids a user has claimed in one season
///
/// Persisted as a sorted JSON array; only converted at the store boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimedMilestones(BTreeSet<String>);

impl ClaimedMilestones {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        // Legacy rows stored the array inside a JSON string.
        let value: serde_json::Value = serde_json::from_str(json)?;
        match value {
            serde_json::Value::String(inner) => Ok(serde_json::from_str(&inner)?),
            other => Ok(serde_json::from_value(other)?),
        }
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string(&self.0)?)
    }

    pub fn contains(&self, milestone_id: &str) -> bool {
        self.0.contains(milestone_id)
    }

    /// Returns false if the id was already present
    pub fn insert(&mut self, milestone_id: impl Into<String>) -> bool {
        self.0.insert(milestone_id.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}
