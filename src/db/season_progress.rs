//! Per-user season pass progress
//!
//! Claims use optimistic versioning: the row is read with its `version`, the
//! claim is validated in memory, and the write only lands if the version is
//! unchanged. A lost race re-reads and re-validates, so a milestone id enters
//! `claimed_milestones` at most once.

use std::collections::BTreeMap;

use diesel::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::diesel_schema::user_season_progress;
use super::models::{
    current_timestamp, ClaimedMilestones, NewUserSeasonProgress, RewardDescriptor,
    SeasonMilestone, Track, UserSeasonProgress,
};
use super::seasons::{require_milestone_by_number, require_season, rewards_for_track};
use super::is_unique_violation;
use crate::error::StoreError;

// ============================================================================
// Result Types
// ============================================================================

/// Outcome of a successful milestone claim
#[derive(Debug, Clone, Serialize)]
pub struct ClaimedMilestone {
    pub progress: UserSeasonProgress,
    pub milestone: SeasonMilestone,
    pub track: Track,
    pub rewards: Vec<RewardDescriptor>,
}

/// One page of season progress rows
#[derive(Debug, Clone, Serialize)]
pub struct ProgressPage {
    pub total: i64,
    pub page: i64,
    pub total_pages: i64,
    pub data: Vec<UserSeasonProgress>,
}

/// Claim count for one milestone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MilestoneClaimCount {
    pub milestone_id: String,
    pub count: u64,
}

/// Season-wide engagement summary
#[derive(Debug, Clone, Serialize)]
pub struct SeasonAnalytics {
    pub season_id: String,
    pub users_with_progress: u64,
    pub users_with_inside_track: u64,
    /// Percentage of participating users holding the inside track
    pub conversion_rate: f64,
    pub avg_milestones_claimed: f64,
    pub milestone_completion: Vec<MilestoneClaimCount>,
}

// ============================================================================
// Read Operations
// ============================================================================

pub fn get_season_progress(
    conn: &mut SqliteConnection,
    user_id: i64,
    season_id: &str,
) -> Result<Option<UserSeasonProgress>, StoreError> {
    user_season_progress::table
        .filter(user_season_progress::user_id.eq(user_id))
        .filter(user_season_progress::season_id.eq(season_id))
        .first(conn)
        .optional()
        .map_err(StoreError::from)
}

/// Paginated progress rows of a season, most recently updated first
pub fn list_season_progress(
    conn: &mut SqliteConnection,
    season_id: &str,
    page: i64,
    limit: i64,
) -> Result<ProgressPage, StoreError> {
    let page = page.max(1);
    let limit = limit.clamp(1, 500);

    let total: i64 = user_season_progress::table
        .filter(user_season_progress::season_id.eq(season_id))
        .count()
        .get_result(conn)?;

    let data = user_season_progress::table
        .filter(user_season_progress::season_id.eq(season_id))
        .order((user_season_progress::updated_at.desc(), user_season_progress::id.desc()))
        .limit(limit)
        .offset((page - 1) * limit)
        .load(conn)?;

    Ok(ProgressPage {
        total,
        page,
        total_pages: (total + limit - 1) / limit,
        data,
    })
}

/// Participation and claim statistics for a season
pub fn season_analytics(
    conn: &mut SqliteConnection,
    season_id: &str,
) -> Result<SeasonAnalytics, StoreError> {
    require_season(conn, season_id)?;

    let rows: Vec<UserSeasonProgress> = user_season_progress::table
        .filter(user_season_progress::season_id.eq(season_id))
        .load(conn)?;

    let users_with_progress = rows.len() as u64;
    let users_with_inside_track = rows.iter().filter(|r| r.has_inside_track).count() as u64;

    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut total_claimed = 0u64;
    for row in &rows {
        let claimed = row.claimed_milestones()?;
        total_claimed += claimed.len() as u64;
        for milestone_id in claimed.iter() {
            *counts.entry(milestone_id.clone()).or_insert(0) += 1;
        }
    }

    let (conversion_rate, avg_milestones_claimed) = if users_with_progress > 0 {
        (
            users_with_inside_track as f64 / users_with_progress as f64 * 100.0,
            total_claimed as f64 / users_with_progress as f64,
        )
    } else {
        (0.0, 0.0)
    };

    Ok(SeasonAnalytics {
        season_id: season_id.to_string(),
        users_with_progress,
        users_with_inside_track,
        conversion_rate,
        avg_milestones_claimed,
        milestone_completion: counts
            .into_iter()
            .map(|(milestone_id, count)| MilestoneClaimCount { milestone_id, count })
            .collect(),
    })
}

// ============================================================================
// Write Operations
// ============================================================================

/// Return the user's row for a season, creating an empty one if absent
pub fn get_or_create_season_progress(
    conn: &mut SqliteConnection,
    user_id: i64,
    season_id: &str,
) -> Result<UserSeasonProgress, StoreError> {
    require_season(conn, season_id)?;

    if let Some(existing) = get_season_progress(conn, user_id, season_id)? {
        return Ok(existing);
    }

    let empty = ClaimedMilestones::new().to_json()?;
    let result = diesel::insert_into(user_season_progress::table)
        .values(&NewUserSeasonProgress {
            user_id,
            season_id,
            has_inside_track: false,
            season_points: 0,
            claimed_milestones_json: &empty,
        })
        .execute(conn);

    match result {
        Ok(_) => debug!(user_id, season_id, "Season progress row created"),
        Err(e) if is_unique_violation(&e) => {
            debug!(user_id, season_id, "Season progress created concurrently, re-fetching")
        }
        Err(e) => return Err(e.into()),
    }

    get_season_progress(conn, user_id, season_id)?
        .ok_or_else(|| StoreError::Internal("Failed to retrieve season progress".into()))
}

/// Add season points to a user's running total
pub fn add_season_points(
    conn: &mut SqliteConnection,
    user_id: i64,
    season_id: &str,
    points: i64,
) -> Result<UserSeasonProgress, StoreError> {
    if points < 1 {
        return Err(StoreError::Validation(format!("points must be positive, got {}", points)));
    }

    let progress = get_or_create_season_progress(conn, user_id, season_id)?;

    diesel::update(user_season_progress::table.find(progress.id))
        .set((
            user_season_progress::season_points.eq(user_season_progress::season_points + points),
            user_season_progress::version.eq(user_season_progress::version + 1),
            user_season_progress::updated_at.eq(current_timestamp()),
        ))
        .execute(conn)?;

    debug!(user_id, season_id, points, "Season points added");
    get_season_progress(conn, user_id, season_id)?
        .ok_or_else(|| StoreError::Internal("Failed to retrieve season progress".into()))
}

/// Unlock the paid track for a user
///
/// The flag only flips when it was unset, so of several concurrent grants
/// exactly one reports `true`.
pub fn grant_inside_track(
    conn: &mut SqliteConnection,
    user_id: i64,
    season_id: &str,
) -> Result<(UserSeasonProgress, bool), StoreError> {
    let progress = get_or_create_season_progress(conn, user_id, season_id)?;

    let flipped = diesel::update(
        user_season_progress::table
            .find(progress.id)
            .filter(user_season_progress::has_inside_track.eq(false)),
    )
    .set((
        user_season_progress::has_inside_track.eq(true),
        user_season_progress::version.eq(user_season_progress::version + 1),
        user_season_progress::updated_at.eq(current_timestamp()),
    ))
    .execute(conn)?
        == 1;

    if flipped {
        info!(user_id, season_id, "Inside track granted");
    }

    let progress = get_season_progress(conn, user_id, season_id)?
        .ok_or_else(|| StoreError::Internal("Failed to retrieve season progress".into()))?;
    Ok((progress, flipped))
}

/// Claim a milestone on a track
///
/// Free-track claims return the free rewards. Paid-track claims require the
/// inside track and return the paid rewards in place of the free ones. Each
/// milestone can be claimed once per user, on one track.
pub fn claim_milestone(
    conn: &mut SqliteConnection,
    user_id: i64,
    season_id: &str,
    milestone_number: i32,
    track: Track,
    max_attempts: u32,
) -> Result<ClaimedMilestone, StoreError> {
    require_season(conn, season_id)?;
    let milestone = require_milestone_by_number(conn, season_id, milestone_number)?;
    if !milestone.is_active {
        return Err(StoreError::Validation(format!(
            "Milestone {} is inactive",
            milestone.milestone_id
        )));
    }

    for attempt in 1..=max_attempts.max(1) {
        let progress = get_or_create_season_progress(conn, user_id, season_id)?;
        if let Some(claim) = try_claim(conn, &progress, &milestone, track)? {
            return Ok(claim);
        }
        warn!(user_id, season_id, attempt, "Season progress version changed during claim, retrying");
    }

    Err(StoreError::ConcurrentModification(format!(
        "user {} milestone {}",
        user_id, milestone.milestone_id
    )))
}

/// One optimistic claim attempt against a snapshot of the progress row
///
/// Returns `None` when the row's version moved past the snapshot.
fn try_claim(
    conn: &mut SqliteConnection,
    progress: &UserSeasonProgress,
    milestone: &SeasonMilestone,
    track: Track,
) -> Result<Option<ClaimedMilestone>, StoreError> {
    let user_id = progress.user_id;
    let season_id = progress.season_id.as_str();
    let mut claimed = progress.claimed_milestones()?;

    if claimed.contains(&milestone.milestone_id) {
        return Err(StoreError::AlreadyClaimed(format!(
            "user {} milestone {}",
            user_id, milestone.milestone_id
        )));
    }
    if track == Track::Paid && !progress.has_inside_track {
        return Err(StoreError::TrackLocked {
            user_id,
            season_id: season_id.to_string(),
        });
    }
    if progress.season_points < milestone.required_points {
        return Err(StoreError::InsufficientPoints {
            required: milestone.required_points,
            current: progress.season_points,
        });
    }

    claimed.insert(milestone.milestone_id.clone());
    let claimed_json = claimed.to_json()?;

    let updated = diesel::update(
        user_season_progress::table
            .find(progress.id)
            .filter(user_season_progress::version.eq(progress.version)),
    )
    .set((
        user_season_progress::claimed_milestones_json.eq(&claimed_json),
        user_season_progress::version.eq(progress.version + 1),
        user_season_progress::updated_at.eq(current_timestamp()),
    ))
    .execute(conn)?;

    if updated != 1 {
        return Ok(None);
    }

    let rewards = rewards_for_track(conn, milestone, track)?;
    info!(
        user_id,
        season_id,
        milestone_id = %milestone.milestone_id,
        %track,
        rewards = rewards.len(),
        "Milestone claimed"
    );

    let progress = get_season_progress(conn, user_id, season_id)?
        .ok_or_else(|| StoreError::Internal("Failed to retrieve season progress".into()))?;

    Ok(Some(ClaimedMilestone {
        progress,
        milestone: milestone.clone(),
        track,
        rewards,
    }))
}
