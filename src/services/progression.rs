//! Progression service - per-user task and season progress
//!
//! Wraps the progress repositories with the injected clock (what "today" is),
//! the claim retry budget from config, and event emission. Reference data is
//! managed through `CatalogService`.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use diesel::SqliteConnection;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::db::models::{date_key, UserDailyReset};
use crate::db::season_progress::{self, ClaimedMilestone, ProgressPage, SeasonAnalytics};
use crate::db::task_progress::{self, ClaimedTaskReward, IncrementOutcome};
use crate::db::{
    seasons, task_actions, task_calendar, task_sets, DailyTask, DbStats, ProgressDb,
    RewardDescriptor, SeasonMilestone, SeasonPass, TaskState, Track, UserSeasonProgress,
    UserTaskProgress,
};
use crate::error::StoreError;

use super::events::{EventBus, ProgressionEvent};
use super::matching::conditions_match;

// ============================================================================
// Result Types
// ============================================================================

/// One task on a user's daily board
#[derive(Debug, Clone, Serialize)]
pub struct BoardEntry {
    pub task: DailyTask,
    pub display_order: i32,
    pub state: TaskState,
    pub progress: UserTaskProgress,
}

/// A user's tasks for one date
#[derive(Debug, Clone, Serialize)]
pub struct DailyBoard {
    pub user_id: i64,
    pub date: String,
    /// None when the date has no calendar entry and no default set
    pub set_id: Option<String>,
    pub tasks: Vec<BoardEntry>,
}

/// Result of a daily reset
#[derive(Debug, Clone, Serialize)]
pub struct DailyResetOutcome {
    /// False when the reset for this date was already recorded
    pub newly_recorded: bool,
    pub board: DailyBoard,
}

/// Effect of one qualifying action on one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    Advanced {
        task_id: String,
        current_repetitions: i32,
        completed: bool,
    },
    AlreadyCompleted {
        task_id: String,
    },
}

/// One milestone of a season with the user's standing on it
#[derive(Debug, Clone, Serialize)]
pub struct MilestoneStatus {
    pub milestone: SeasonMilestone,
    pub claimed: bool,
    /// Enough points and not yet claimed
    pub claimable: bool,
    pub free_rewards: Vec<RewardDescriptor>,
    pub paid_rewards: Vec<RewardDescriptor>,
}

/// A season's active milestones as seen by one user
#[derive(Debug, Clone, Serialize)]
pub struct SeasonOverview {
    pub season: SeasonPass,
    /// Days left including `date`; 0 once the season has ended
    pub days_remaining: i64,
    pub season_points: i64,
    pub has_inside_track: bool,
    pub milestones: Vec<MilestoneStatus>,
}

impl ActionOutcome {
    pub fn task_id(&self) -> &str {
        match self {
            ActionOutcome::Advanced { task_id, .. } | ActionOutcome::AlreadyCompleted { task_id } => {
                task_id
            }
        }
    }
}

// ============================================================================
// Service
// ============================================================================

/// Progression service for per-user state
pub struct ProgressionStore {
    db: Arc<ProgressDb>,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
    max_claim_attempts: u32,
    default_set_id: Option<String>,
}

impl ProgressionStore {
    pub fn new(
        db: Arc<ProgressDb>,
        clock: Arc<dyn Clock>,
        events: Arc<EventBus>,
        config: &Config,
    ) -> Self {
        Self {
            db,
            clock,
            events,
            max_claim_attempts: config.max_claim_retries.max(1),
            default_set_id: config.default_set_id.clone(),
        }
    }

    /// Current UTC date according to the injected clock
    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn stats(&self) -> Result<DbStats, StoreError> {
        self.db.stats()
    }

    // =========================================================================
    // Daily Tasks
    // =========================================================================

    pub fn get_task_progress(
        &self,
        user_id: i64,
        task_id: &str,
        tracking_date: NaiveDate,
    ) -> Result<Option<UserTaskProgress>, StoreError> {
        self.db
            .with_conn(|conn| task_progress::get_progress(conn, user_id, task_id, tracking_date))
    }

    /// Existing row for (user, task, date) or a fresh pending one
    pub fn get_or_create_task_progress(
        &self,
        user_id: i64,
        task_id: &str,
        tracking_date: NaiveDate,
    ) -> Result<UserTaskProgress, StoreError> {
        self.db.with_conn(|conn| {
            task_progress::get_or_create_progress(conn, user_id, task_id, tracking_date)
        })
    }

    /// Add repetitions to today's row for a task
    pub fn increment_repetition(
        &self,
        user_id: i64,
        task_id: &str,
        tracking_date: NaiveDate,
        delta: i32,
    ) -> Result<IncrementOutcome, StoreError> {
        let today = self.today();
        let outcome = self.db.with_conn(|conn| {
            task_progress::increment_repetition(conn, user_id, task_id, tracking_date, delta, today)
        })?;

        self.emit_progress(user_id, &outcome);
        Ok(outcome)
    }

    /// Claim a completed task's reward; returns what the ledger should credit
    pub fn claim_reward(
        &self,
        user_id: i64,
        task_id: &str,
        tracking_date: NaiveDate,
    ) -> Result<ClaimedTaskReward, StoreError> {
        let claimed = self
            .db
            .with_conn(|conn| task_progress::claim_reward(conn, user_id, task_id, tracking_date))?;

        self.events.emit(ProgressionEvent::TaskRewardClaimed {
            user_id,
            task_id: task_id.to_string(),
            tracking_date: claimed.progress.tracking_date.clone(),
            reward: claimed.reward.clone(),
        });

        Ok(claimed)
    }

    /// Set scheduled for a date, honouring the configured default
    pub fn set_for_date(&self, date: NaiveDate) -> Result<Option<String>, StoreError> {
        self.db
            .with_conn(|conn| task_calendar::set_for_date(conn, date, self.default_set_id.as_deref()))
    }

    /// Scheduled set for a date, or None when there is none or it is inactive
    fn active_set_for_date(
        conn: &mut SqliteConnection,
        date: NaiveDate,
        default_set_id: Option<&str>,
    ) -> Result<Option<String>, StoreError> {
        let Some(set_id) = task_calendar::set_for_date(conn, date, default_set_id)? else {
            debug!(%date, "No task set scheduled");
            return Ok(None);
        };

        let set = task_sets::require_set(conn, &set_id)?;
        if !set.is_active {
            debug!(set_id, %date, "Scheduled set is inactive");
            return Ok(None);
        }
        Ok(Some(set_id))
    }

    /// Active tasks scheduled for a date with the user's progress on each
    ///
    /// Progress rows are created on first view. An inactive scheduled set
    /// yields an empty board.
    pub fn daily_board(&self, user_id: i64, date: NaiveDate) -> Result<DailyBoard, StoreError> {
        let set_id = self.set_for_date(date)?;

        let tasks = self.db.with_conn(|conn| {
            let Some(active) = Self::active_set_for_date(conn, date, self.default_set_id.as_deref())?
            else {
                return Ok(Vec::new());
            };

            let mut entries = Vec::new();
            for ordered in task_sets::tasks_in_set(conn, &active, true)? {
                let progress = task_progress::get_or_create_progress(
                    conn,
                    user_id,
                    &ordered.task.task_id,
                    date,
                )?;
                entries.push(BoardEntry {
                    state: progress.state(),
                    task: ordered.task,
                    display_order: ordered.display_order,
                    progress,
                });
            }
            Ok(entries)
        })?;

        Ok(DailyBoard {
            user_id,
            date: date_key(date),
            set_id,
            tasks,
        })
    }

    /// Start a user's day: record the reset and materialise the board
    pub fn daily_reset(&self, user_id: i64, date: NaiveDate) -> Result<DailyResetOutcome, StoreError> {
        let newly_recorded = self
            .db
            .with_conn(|conn| task_progress::record_daily_reset(conn, user_id, date))?;
        let board = self.daily_board(user_id, date)?;

        if newly_recorded {
            info!(user_id, date = %board.date, tasks = board.tasks.len(), "Daily reset");
            self.events.emit(ProgressionEvent::DailyReset {
                user_id,
                reset_date: board.date.clone(),
                tasks: board.tasks.len(),
            });
        } else {
            debug!(user_id, date = %board.date, "Daily reset already recorded");
        }

        Ok(DailyResetOutcome { newly_recorded, board })
    }

    /// Most recent daily reset recorded for a user
    pub fn last_daily_reset(&self, user_id: i64) -> Result<Option<UserDailyReset>, StoreError> {
        self.db
            .with_conn(|conn| task_progress::last_daily_reset(conn, user_id))
    }

    /// Every progress row a user has for a date, including tasks no longer
    /// scheduled
    pub fn progress_for_date(
        &self,
        user_id: i64,
        date: NaiveDate,
    ) -> Result<Vec<UserTaskProgress>, StoreError> {
        self.db
            .with_conn(|conn| task_progress::list_progress_for_date(conn, user_id, date))
    }

    /// Apply one qualifying action to every active task bound to it on the
    /// action's date
    pub fn record_action(
        &self,
        user_id: i64,
        action_id: &str,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<ActionOutcome>, StoreError> {
        self.db.with_conn(|conn| task_actions::require_action(conn, action_id))?;
        let outcomes = self.apply_actions(user_id, &[action_id.to_string()], occurred_at)?;
        debug!(user_id, action_id, tasks = outcomes.len(), "Action recorded");
        Ok(outcomes)
    }

    /// Resolve a gameplay event to matching actions and record each
    ///
    /// All matched tasks advance together or not at all, so a failed event can
    /// be redelivered without double counting.
    pub fn record_event(
        &self,
        user_id: i64,
        tracking_event: &str,
        attributes: &Map<String, Value>,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<ActionOutcome>, StoreError> {
        let actions = self
            .db
            .with_conn(|conn| task_actions::list_actions_for_event(conn, tracking_event))?;

        let mut matched = Vec::new();
        for action in actions {
            let conditions = action.tracking_conditions()?;
            if conditions_match(conditions.as_ref(), attributes) {
                matched.push(action.action_id);
            }
        }
        if matched.is_empty() {
            debug!(user_id, tracking_event, "No action matches event");
            return Ok(Vec::new());
        }

        self.apply_actions(user_id, &matched, occurred_at)
    }

    /// Increment every scheduled task bound to one of `action_ids` in a single
    /// write transaction; events are published once it commits
    fn apply_actions(
        &self,
        user_id: i64,
        action_ids: &[String],
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<ActionOutcome>, StoreError> {
        let date = occurred_at.date_naive();
        let today = self.today();

        let (outcomes, advanced) = self.db.with_conn(|conn| {
            conn.immediate_transaction(|conn| {
                let Some(set_id) =
                    Self::active_set_for_date(conn, date, self.default_set_id.as_deref())?
                else {
                    return Ok((Vec::new(), Vec::new()));
                };

                let mut outcomes = Vec::new();
                let mut advanced = Vec::new();
                for ordered in task_sets::tasks_in_set(conn, &set_id, true)? {
                    let task_id = ordered.task.task_id;
                    if !action_ids.contains(&ordered.task.action_id) {
                        continue;
                    }
                    match task_progress::apply_increment(conn, user_id, &task_id, date, 1, today) {
                        Ok(outcome) => {
                            outcomes.push(ActionOutcome::Advanced {
                                task_id,
                                current_repetitions: outcome.progress.current_repetitions,
                                completed: outcome.progress.completed,
                            });
                            advanced.push(outcome);
                        }
                        Err(StoreError::AlreadyCompleted(_)) => {
                            outcomes.push(ActionOutcome::AlreadyCompleted { task_id })
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok((outcomes, advanced))
            })
        })?;

        for outcome in &advanced {
            self.emit_progress(user_id, outcome);
        }
        Ok(outcomes)
    }

    fn emit_progress(&self, user_id: i64, outcome: &IncrementOutcome) {
        self.events.emit(ProgressionEvent::TaskProgressed {
            user_id,
            task_id: outcome.progress.task_id.clone(),
            tracking_date: outcome.progress.tracking_date.clone(),
            current_repetitions: outcome.progress.current_repetitions,
        });
        if outcome.newly_completed {
            self.events.emit(ProgressionEvent::TaskCompleted {
                user_id,
                task_id: outcome.progress.task_id.clone(),
                tracking_date: outcome.progress.tracking_date.clone(),
            });
        }
    }

    // =========================================================================
    // Season Pass
    // =========================================================================

    pub fn get_season_progress(
        &self,
        user_id: i64,
        season_id: &str,
    ) -> Result<Option<UserSeasonProgress>, StoreError> {
        self.db
            .with_conn(|conn| season_progress::get_season_progress(conn, user_id, season_id))
    }

    pub fn get_or_create_season_progress(
        &self,
        user_id: i64,
        season_id: &str,
    ) -> Result<UserSeasonProgress, StoreError> {
        self.db.with_conn(|conn| {
            season_progress::get_or_create_season_progress(conn, user_id, season_id)
        })
    }

    pub fn add_season_points(
        &self,
        user_id: i64,
        season_id: &str,
        points: i64,
    ) -> Result<UserSeasonProgress, StoreError> {
        let progress = self.db.with_conn(|conn| {
            season_progress::add_season_points(conn, user_id, season_id, points)
        })?;

        self.events.emit(ProgressionEvent::SeasonPointsAdded {
            user_id,
            season_id: season_id.to_string(),
            points,
            total: progress.season_points,
        });

        Ok(progress)
    }

    /// Unlock the paid track; the event is published only by the grant that
    /// flipped the flag
    pub fn grant_inside_track(
        &self,
        user_id: i64,
        season_id: &str,
    ) -> Result<UserSeasonProgress, StoreError> {
        let (progress, flipped) = self
            .db
            .with_conn(|conn| season_progress::grant_inside_track(conn, user_id, season_id))?;

        if flipped {
            self.events.emit(ProgressionEvent::InsideTrackGranted {
                user_id,
                season_id: season_id.to_string(),
            });
        }

        Ok(progress)
    }

    /// Claim a milestone on a track; returns the rewards to credit
    pub fn claim_milestone(
        &self,
        user_id: i64,
        season_id: &str,
        milestone_number: i32,
        track: Track,
    ) -> Result<ClaimedMilestone, StoreError> {
        let claim = self.db.with_conn(|conn| {
            season_progress::claim_milestone(
                conn,
                user_id,
                season_id,
                milestone_number,
                track,
                self.max_claim_attempts,
            )
        })?;

        self.emit_claim(&claim);
        Ok(claim)
    }

    fn emit_claim(&self, claim: &ClaimedMilestone) {
        self.events.emit(ProgressionEvent::MilestoneClaimed {
            user_id: claim.progress.user_id,
            season_id: claim.progress.season_id.clone(),
            milestone_id: claim.milestone.milestone_id.clone(),
            track: claim.track,
            rewards: claim.rewards.clone(),
        });
    }

    /// Claim every active milestone the user has the points for and has not
    /// claimed yet, lowest number first
    ///
    /// Each claim goes through the same optimistic path as
    /// [`claim_milestone`](Self::claim_milestone); a milestone claimed
    /// concurrently in between is skipped.
    pub fn claim_eligible_milestones(
        &self,
        user_id: i64,
        season_id: &str,
        track: Track,
    ) -> Result<Vec<ClaimedMilestone>, StoreError> {
        let progress = self.get_or_create_season_progress(user_id, season_id)?;
        if track == Track::Paid && !progress.has_inside_track {
            return Err(StoreError::TrackLocked {
                user_id,
                season_id: season_id.to_string(),
            });
        }

        let claimed = progress.claimed_milestones()?;
        let eligible: Vec<SeasonMilestone> = self
            .db
            .with_conn(|conn| seasons::list_milestones(conn, season_id))?
            .into_iter()
            .filter(|m| m.is_active)
            .filter(|m| m.required_points <= progress.season_points)
            .filter(|m| !claimed.contains(&m.milestone_id))
            .collect();

        let mut claims = Vec::with_capacity(eligible.len());
        for milestone in eligible {
            match self.claim_milestone(user_id, season_id, milestone.milestone_number, track) {
                Ok(claim) => claims.push(claim),
                Err(StoreError::AlreadyClaimed(_)) => {
                    debug!(user_id, milestone_id = %milestone.milestone_id, "Claimed concurrently, skipping")
                }
                Err(e) => {
                    warn!(user_id, season_id, claimed = claims.len(), error = %e, "Bulk milestone claim stopped");
                    return Err(e);
                }
            }
        }

        info!(user_id, season_id, %track, claimed = claims.len(), "Eligible milestones claimed");
        Ok(claims)
    }

    /// The active season whose date range contains `date`
    pub fn current_season(&self, date: NaiveDate) -> Result<Option<SeasonPass>, StoreError> {
        let mut active = self
            .db
            .with_conn(|conn| seasons::active_seasons_on(conn, date))?;
        Ok(if active.is_empty() { None } else { Some(active.remove(0)) })
    }

    /// Active milestones of a season with the user's claim status on each
    ///
    /// Read-only: a user without a progress row is shown with no points.
    pub fn season_overview(
        &self,
        user_id: i64,
        season_id: &str,
    ) -> Result<SeasonOverview, StoreError> {
        let today = self.today();

        self.db.with_conn(|conn| {
            let season = seasons::require_season(conn, season_id)?;
            let (_, end) = season.date_range()?;
            let days_remaining = ((end - today).num_days() + 1).max(0);

            let progress = season_progress::get_season_progress(conn, user_id, season_id)?;
            let (season_points, has_inside_track, claimed) = match &progress {
                Some(p) => (p.season_points, p.has_inside_track, p.claimed_milestones()?),
                None => (0, false, Default::default()),
            };

            let mut milestones = Vec::new();
            for milestone in seasons::list_milestones(conn, season_id)? {
                if !milestone.is_active {
                    continue;
                }
                let is_claimed = claimed.contains(&milestone.milestone_id);
                milestones.push(MilestoneStatus {
                    claimed: is_claimed,
                    claimable: !is_claimed && season_points >= milestone.required_points,
                    free_rewards: seasons::rewards_for_track(conn, &milestone, Track::Free)?,
                    paid_rewards: seasons::rewards_for_track(conn, &milestone, Track::Paid)?,
                    milestone,
                });
            }

            Ok(SeasonOverview {
                season,
                days_remaining,
                season_points,
                has_inside_track,
                milestones,
            })
        })
    }

    pub fn list_season_progress(
        &self,
        season_id: &str,
        page: i64,
        limit: i64,
    ) -> Result<ProgressPage, StoreError> {
        self.db
            .with_conn(|conn| season_progress::list_season_progress(conn, season_id, page, limit))
    }

    pub fn season_analytics(&self, season_id: &str) -> Result<SeasonAnalytics, StoreError> {
        self.db
            .with_conn(|conn| season_progress::season_analytics(conn, season_id))
    }
}
