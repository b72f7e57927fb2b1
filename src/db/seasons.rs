//! Season pass, milestone and milestone reward operations using Diesel
//!
//! Milestones within a season are numbered from 1 and their required points
//! must strictly increase with the number. Milestone ids are derived as
//! `{season_id}_{milestone_number}`.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use diesel::prelude::*;
use serde::Deserialize;
use tracing::{debug, info};

use super::diesel_schema::{milestone_rewards, season_milestones, season_passes, user_season_progress};
use super::models::{
    current_timestamp, date_key, reward_types, MilestoneReward, NewMilestoneReward,
    NewSeasonMilestone, NewSeasonPass, RewardDescriptor, SeasonMilestone, SeasonPass, Track,
};
use super::task_actions::validate_key;
use crate::error::StoreError;

// ============================================================================
// Query Types
// ============================================================================

/// Input for creating a season pass
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSeasonInput {
    pub season_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub created_by: Option<i64>,
}

fn default_true() -> bool { true }

/// Milestone definition for bulk upsert; absent reward fields keep their
/// current value (or the default for new milestones)
#[derive(Debug, Clone, Deserialize)]
pub struct MilestoneInput {
    pub milestone_number: i32,
    pub required_points: i64,
    #[serde(default)]
    pub free_reward_type: Option<String>,
    #[serde(default)]
    pub free_reward_amount: Option<i64>,
    #[serde(default)]
    pub paid_reward_type: Option<String>,
    #[serde(default)]
    pub paid_reward_amount: Option<i64>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Input for attaching an extra reward row to a milestone
#[derive(Debug, Clone, Deserialize)]
pub struct MilestoneRewardInput {
    pub track: Track,
    pub reward_type: String,
    #[serde(default)]
    pub reward_amount: i64,
    #[serde(default)]
    pub display_order: i32,
}

#[derive(AsChangeset)]
#[diesel(table_name = season_milestones)]
struct MilestoneChanges<'a> {
    required_points: i64,
    free_reward_type: Option<&'a str>,
    free_reward_amount: Option<i64>,
    paid_reward_type: Option<&'a str>,
    paid_reward_amount: Option<i64>,
    is_active: Option<bool>,
    updated_at: &'a str,
}

/// Milestone id for a season and number
pub fn milestone_id_for(season_id: &str, milestone_number: i32) -> String {
    format!("{}_{}", season_id, milestone_number)
}

// ============================================================================
// Season Passes
// ============================================================================

pub fn get_season(
    conn: &mut SqliteConnection,
    season_id: &str,
) -> Result<Option<SeasonPass>, StoreError> {
    season_passes::table
        .filter(season_passes::season_id.eq(season_id))
        .first(conn)
        .optional()
        .map_err(StoreError::from)
}

pub fn require_season(conn: &mut SqliteConnection, season_id: &str) -> Result<SeasonPass, StoreError> {
    get_season(conn, season_id)?
        .ok_or_else(|| StoreError::NotFound(format!("Season {}", season_id)))
}

/// List seasons, most recent start first
pub fn list_seasons(conn: &mut SqliteConnection) -> Result<Vec<SeasonPass>, StoreError> {
    season_passes::table
        .order((season_passes::start_date.desc(), season_passes::season_id.asc()))
        .load(conn)
        .map_err(StoreError::from)
}

/// Active seasons whose range contains `date`
pub fn active_seasons_on(
    conn: &mut SqliteConnection,
    date: NaiveDate,
) -> Result<Vec<SeasonPass>, StoreError> {
    let key = date_key(date);
    season_passes::table
        .filter(season_passes::is_active.eq(true))
        .filter(season_passes::start_date.le(&key))
        .filter(season_passes::end_date.ge(&key))
        .order(season_passes::season_id.asc())
        .load(conn)
        .map_err(StoreError::from)
}

/// Active seasons other than `season_id` overlapping [start, end]
fn overlapping_active(
    conn: &mut SqliteConnection,
    season_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<SeasonPass>, StoreError> {
    season_passes::table
        .filter(season_passes::is_active.eq(true))
        .filter(season_passes::season_id.ne(season_id))
        .filter(season_passes::start_date.le(date_key(end)))
        .filter(season_passes::end_date.ge(date_key(start)))
        .load(conn)
        .map_err(StoreError::from)
}

pub fn create_season(
    conn: &mut SqliteConnection,
    input: &CreateSeasonInput,
) -> Result<SeasonPass, StoreError> {
    validate_key("season_id", &input.season_id)?;

    if input.start_date > input.end_date {
        return Err(StoreError::Validation(format!(
            "Season {} starts {} after it ends {}",
            input.season_id, input.start_date, input.end_date
        )));
    }
    if get_season(conn, &input.season_id)?.is_some() {
        return Err(StoreError::Validation(format!("Season {} already exists", input.season_id)));
    }

    if input.is_active {
        let overlapping = overlapping_active(conn, &input.season_id, input.start_date, input.end_date)?;
        if let Some(other) = overlapping.first() {
            return Err(StoreError::Validation(format!(
                "Season {} overlaps active season {}",
                input.season_id, other.season_id
            )));
        }
    }

    let start = date_key(input.start_date);
    let end = date_key(input.end_date);
    diesel::insert_into(season_passes::table)
        .values(&NewSeasonPass {
            season_id: &input.season_id,
            name: &input.name,
            description: input.description.as_deref(),
            start_date: &start,
            end_date: &end,
            is_active: input.is_active,
            created_by: input.created_by,
        })
        .execute(conn)?;

    info!(season_id = %input.season_id, start = %start, end = %end, "Season created");
    require_season(conn, &input.season_id)
}

/// Set a season's active flag; activating deactivates every other season
pub fn set_season_active(
    conn: &mut SqliteConnection,
    season_id: &str,
    is_active: bool,
) -> Result<SeasonPass, StoreError> {
    conn.immediate_transaction(|conn| {
        require_season(conn, season_id)?;
        let now = current_timestamp();

        if is_active {
            let deactivated = diesel::update(
                season_passes::table
                    .filter(season_passes::season_id.ne(season_id))
                    .filter(season_passes::is_active.eq(true)),
            )
            .set((
                season_passes::is_active.eq(false),
                season_passes::updated_at.eq(&now),
            ))
            .execute(conn)?;

            if deactivated > 0 {
                info!(season_id, deactivated, "Deactivated other seasons");
            }
        }

        diesel::update(season_passes::table.filter(season_passes::season_id.eq(season_id)))
            .set((
                season_passes::is_active.eq(is_active),
                season_passes::updated_at.eq(&now),
            ))
            .execute(conn)?;

        info!(season_id, is_active, "Season active status updated");
        require_season(conn, season_id)
    })
}

/// Delete a season nobody has progress in, with its milestones and rewards
pub fn delete_season(conn: &mut SqliteConnection, season_id: &str) -> Result<(), StoreError> {
    conn.immediate_transaction(|conn| {
        require_season(conn, season_id)?;

        let progress_rows: i64 = user_season_progress::table
            .filter(user_season_progress::season_id.eq(season_id))
            .count()
            .get_result(conn)?;
        if progress_rows > 0 {
            return Err(StoreError::Validation(format!(
                "Season {} has user progress; deactivate it instead",
                season_id
            )));
        }

        let milestone_ids: Vec<String> = season_milestones::table
            .filter(season_milestones::season_id.eq(season_id))
            .select(season_milestones::milestone_id)
            .load(conn)?;

        diesel::delete(milestone_rewards::table.filter(milestone_rewards::milestone_id.eq_any(&milestone_ids)))
            .execute(conn)?;
        diesel::delete(season_milestones::table.filter(season_milestones::season_id.eq(season_id)))
            .execute(conn)?;
        diesel::delete(season_passes::table.filter(season_passes::season_id.eq(season_id)))
            .execute(conn)?;

        info!(season_id, milestones = milestone_ids.len(), "Season deleted");
        Ok(())
    })
}

// ============================================================================
// Milestones
// ============================================================================

/// Milestones of a season ordered by number
pub fn list_milestones(
    conn: &mut SqliteConnection,
    season_id: &str,
) -> Result<Vec<SeasonMilestone>, StoreError> {
    season_milestones::table
        .filter(season_milestones::season_id.eq(season_id))
        .order(season_milestones::milestone_number.asc())
        .load(conn)
        .map_err(StoreError::from)
}

pub fn get_milestone_by_number(
    conn: &mut SqliteConnection,
    season_id: &str,
    milestone_number: i32,
) -> Result<Option<SeasonMilestone>, StoreError> {
    season_milestones::table
        .filter(season_milestones::season_id.eq(season_id))
        .filter(season_milestones::milestone_number.eq(milestone_number))
        .first(conn)
        .optional()
        .map_err(StoreError::from)
}

pub fn require_milestone_by_number(
    conn: &mut SqliteConnection,
    season_id: &str,
    milestone_number: i32,
) -> Result<SeasonMilestone, StoreError> {
    get_milestone_by_number(conn, season_id, milestone_number)?.ok_or_else(|| {
        StoreError::NotFound(format!("Milestone {} of season {}", milestone_number, season_id))
    })
}

/// Create or update milestones of a season in one transaction
pub fn upsert_milestones(
    conn: &mut SqliteConnection,
    season_id: &str,
    inputs: &[MilestoneInput],
) -> Result<Vec<SeasonMilestone>, StoreError> {
    conn.immediate_transaction(|conn| apply_milestones(conn, season_id, inputs))
}

/// Body of [`upsert_milestones`]; the caller owns the transaction
pub fn apply_milestones(
    conn: &mut SqliteConnection,
    season_id: &str,
    inputs: &[MilestoneInput],
) -> Result<Vec<SeasonMilestone>, StoreError> {
    if inputs.is_empty() {
        return Err(StoreError::Validation("At least one milestone is required".into()));
    }
    for input in inputs {
        validate_milestone(input)?;
    }

    require_season(conn, season_id)?;

    // Check ordering over the season as it will look after the upsert
    let mut points_by_number: BTreeMap<i32, i64> = list_milestones(conn, season_id)?
        .into_iter()
        .map(|m| (m.milestone_number, m.required_points))
        .collect();
    for input in inputs {
        points_by_number.insert(input.milestone_number, input.required_points);
    }
    validate_point_ladder(season_id, &points_by_number)?;

    let now = current_timestamp();
    for input in inputs {
        let existing = get_milestone_by_number(conn, season_id, input.milestone_number)?;
        match existing {
            Some(milestone) => {
                diesel::update(season_milestones::table.find(&milestone.milestone_id))
                    .set(&MilestoneChanges {
                        required_points: input.required_points,
                        free_reward_type: input.free_reward_type.as_deref(),
                        free_reward_amount: input.free_reward_amount,
                        paid_reward_type: input.paid_reward_type.as_deref(),
                        paid_reward_amount: input.paid_reward_amount,
                        is_active: input.is_active,
                        updated_at: &now,
                    })
                    .execute(conn)?;
            }
            None => {
                let milestone_id = milestone_id_for(season_id, input.milestone_number);
                diesel::insert_into(season_milestones::table)
                    .values(&NewSeasonMilestone {
                        milestone_id: &milestone_id,
                        season_id,
                        milestone_number: input.milestone_number,
                        required_points: input.required_points,
                        free_reward_type: input
                            .free_reward_type
                            .as_deref()
                            .unwrap_or(reward_types::MILESTONE_DEFAULT),
                        free_reward_amount: input.free_reward_amount.unwrap_or(0),
                        paid_reward_type: input
                            .paid_reward_type
                            .as_deref()
                            .unwrap_or(reward_types::MILESTONE_DEFAULT),
                        paid_reward_amount: input.paid_reward_amount.unwrap_or(0),
                        is_active: input.is_active.unwrap_or(true),
                    })
                    .execute(conn)?;
            }
        }
    }

    info!(season_id, count = inputs.len(), "Milestones created/updated");
    list_milestones(conn, season_id)
}

fn validate_milestone(input: &MilestoneInput) -> Result<(), StoreError> {
    if input.milestone_number < 1 {
        return Err(StoreError::Validation(format!(
            "milestone_number must be at least 1, got {}",
            input.milestone_number
        )));
    }
    if input.required_points < 0 {
        return Err(StoreError::Validation(format!(
            "Milestone {} required_points must not be negative",
            input.milestone_number
        )));
    }
    let amounts = [input.free_reward_amount, input.paid_reward_amount];
    if amounts.iter().flatten().any(|amount| *amount < 0) {
        return Err(StoreError::Validation(format!(
            "Milestone {} reward amounts must not be negative",
            input.milestone_number
        )));
    }
    Ok(())
}

fn validate_point_ladder(
    season_id: &str,
    points_by_number: &BTreeMap<i32, i64>,
) -> Result<(), StoreError> {
    let mut previous: Option<(i32, i64)> = None;
    for (&number, &points) in points_by_number {
        if let Some((prev_number, prev_points)) = previous {
            if points <= prev_points {
                return Err(StoreError::Validation(format!(
                    "Season {} milestone {} needs more than {} points (milestone {}), got {}",
                    season_id, number, prev_points, prev_number, points
                )));
            }
        }
        previous = Some((number, points));
    }
    Ok(())
}

// ============================================================================
// Milestone Rewards
// ============================================================================

pub fn add_milestone_reward(
    conn: &mut SqliteConnection,
    milestone_id: &str,
    input: &MilestoneRewardInput,
) -> Result<MilestoneReward, StoreError> {
    conn.immediate_transaction(|conn| insert_milestone_reward(conn, milestone_id, input))
}

/// Body of [`add_milestone_reward`]; the caller owns the transaction
pub fn insert_milestone_reward(
    conn: &mut SqliteConnection,
    milestone_id: &str,
    input: &MilestoneRewardInput,
) -> Result<MilestoneReward, StoreError> {
    validate_key("reward_type", &input.reward_type)?;
    if input.reward_amount < 0 {
        return Err(StoreError::Validation(format!(
            "reward_amount must not be negative, got {}",
            input.reward_amount
        )));
    }

    let exists: i64 = season_milestones::table
        .filter(season_milestones::milestone_id.eq(milestone_id))
        .count()
        .get_result(conn)?;
    if exists == 0 {
        return Err(StoreError::NotFound(format!("Milestone {}", milestone_id)));
    }

    diesel::insert_into(milestone_rewards::table)
        .values(&NewMilestoneReward {
            milestone_id,
            track_type: input.track.as_str(),
            reward_type: &input.reward_type,
            reward_amount: input.reward_amount,
            display_order: input.display_order,
        })
        .execute(conn)?;

    milestone_rewards::table
        .filter(milestone_rewards::milestone_id.eq(milestone_id))
        .order(milestone_rewards::id.desc())
        .first(conn)
        .map_err(StoreError::from)
}

/// Reward rows of a milestone, optionally for one track
pub fn list_milestone_rewards(
    conn: &mut SqliteConnection,
    milestone_id: &str,
    track: Option<Track>,
) -> Result<Vec<MilestoneReward>, StoreError> {
    let mut query = milestone_rewards::table
        .filter(milestone_rewards::milestone_id.eq(milestone_id))
        .into_boxed();

    if let Some(track) = track {
        query = query.filter(milestone_rewards::track_type.eq(track.as_str()));
    }

    query
        .order((milestone_rewards::display_order.asc(), milestone_rewards::id.asc()))
        .load(conn)
        .map_err(StoreError::from)
}

/// What a milestone grants on one track
///
/// Dedicated reward rows win; otherwise the inline free/paid columns are used
/// when they carry a non-zero amount.
pub fn rewards_for_track(
    conn: &mut SqliteConnection,
    milestone: &SeasonMilestone,
    track: Track,
) -> Result<Vec<RewardDescriptor>, StoreError> {
    let rows = list_milestone_rewards(conn, &milestone.milestone_id, Some(track))?;
    if !rows.is_empty() {
        return Ok(rows.iter().map(MilestoneReward::descriptor).collect());
    }

    let inline = milestone.inline_reward(track);
    debug!(milestone_id = %milestone.milestone_id, %track, amount = inline.amount, "Using inline milestone reward");
    Ok(if inline.amount > 0 { vec![inline] } else { Vec::new() })
}
