//! Catalog service - admin operations on reference data
//!
//! Actions, daily tasks, task sets, the calendar, season passes, milestones
//! and milestone rewards. Also imports a whole catalog from a TOML seed file.

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use diesel::SqliteConnection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::db::daily_tasks::{self, CreateTaskInput, UpdateTaskInput};
use crate::db::models::{CalendarEntry, MilestoneReward, TaskSetWithTasks};
use crate::db::seasons::{
    self, CreateSeasonInput, MilestoneInput, MilestoneRewardInput,
};
use crate::db::task_actions::{self, CreateActionInput, UpdateActionInput};
use crate::db::task_sets::{self, CreateSetInput};
use crate::db::{
    task_calendar, DailyTask, ProgressDb, SeasonMilestone, SeasonPass, TaskAction, TaskSet,
};
use crate::error::StoreError;

use super::events::{EventBus, ProgressionEvent};

// ============================================================================
// Seed Catalog
// ============================================================================

/// Reference data loaded in one pass from a TOML file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedCatalog {
    #[serde(default)]
    pub actions: Vec<CreateActionInput>,
    #[serde(default)]
    pub tasks: Vec<CreateTaskInput>,
    #[serde(default)]
    pub sets: Vec<SeedSet>,
    #[serde(default)]
    pub calendar: Vec<SeedCalendarEntry>,
    #[serde(default)]
    pub seasons: Vec<SeedSeason>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedSet {
    #[serde(flatten)]
    pub set: CreateSetInput,
    #[serde(default)]
    pub tasks: Vec<SeedSetMember>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedSetMember {
    pub task_id: String,
    #[serde(default)]
    pub display_order: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedCalendarEntry {
    pub date: NaiveDate,
    pub set_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedSeason {
    #[serde(flatten)]
    pub season: CreateSeasonInput,
    #[serde(default)]
    pub milestones: Vec<SeedMilestone>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedMilestone {
    #[serde(flatten)]
    pub milestone: MilestoneInput,
    #[serde(default)]
    pub rewards: Vec<MilestoneRewardInput>,
}

impl SeedCatalog {
    pub fn from_toml_str(content: &str) -> Result<Self, StoreError> {
        toml::from_str(content).map_err(|e| StoreError::Config(format!("Invalid seed catalog: {}", e)))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

/// Counts from a seed import; existing rows are skipped, not overwritten
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub actions_created: usize,
    pub tasks_created: usize,
    pub sets_created: usize,
    pub set_members_added: usize,
    pub calendar_days: usize,
    pub seasons_created: usize,
    pub milestones_upserted: usize,
    pub rewards_added: usize,
    pub skipped: usize,
}

// ============================================================================
// Service
// ============================================================================

/// Catalog service for reference data
pub struct CatalogService {
    db: Arc<ProgressDb>,
    events: Arc<EventBus>,
}

impl CatalogService {
    pub fn new(db: Arc<ProgressDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    fn changed(&self, entity: &'static str, id: &str) {
        self.events.emit(ProgressionEvent::CatalogChanged {
            entity,
            id: id.to_string(),
        });
    }

    // =========================================================================
    // Task Actions
    // =========================================================================

    pub fn get_action(&self, action_id: &str) -> Result<Option<TaskAction>, StoreError> {
        self.db.with_conn(|conn| task_actions::get_action(conn, action_id))
    }

    pub fn list_actions(&self) -> Result<Vec<TaskAction>, StoreError> {
        self.db.with_conn(task_actions::list_actions)
    }

    pub fn create_action(&self, input: &CreateActionInput) -> Result<TaskAction, StoreError> {
        let action = self.db.with_conn(|conn| task_actions::create_action(conn, input))?;
        self.changed("task_action", &action.action_id);
        Ok(action)
    }

    pub fn update_action(
        &self,
        action_id: &str,
        input: &UpdateActionInput,
    ) -> Result<TaskAction, StoreError> {
        let action = self
            .db
            .with_conn(|conn| task_actions::update_action(conn, action_id, input))?;
        self.changed("task_action", action_id);
        Ok(action)
    }

    /// Rejected while any daily task references the action
    pub fn delete_action(&self, action_id: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| task_actions::delete_action(conn, action_id))?;
        self.changed("task_action", action_id);
        Ok(())
    }

    // =========================================================================
    // Daily Tasks
    // =========================================================================

    pub fn get_task(&self, task_id: &str) -> Result<Option<DailyTask>, StoreError> {
        self.db.with_conn(|conn| daily_tasks::get_task(conn, task_id))
    }

    pub fn list_tasks(&self, active_only: bool) -> Result<Vec<DailyTask>, StoreError> {
        self.db.with_conn(|conn| daily_tasks::list_tasks(conn, active_only))
    }

    pub fn create_task(&self, input: &CreateTaskInput) -> Result<DailyTask, StoreError> {
        let task = self.db.with_conn(|conn| daily_tasks::create_task(conn, input))?;
        self.changed("daily_task", &task.task_id);
        Ok(task)
    }

    pub fn update_task(&self, task_id: &str, input: &UpdateTaskInput) -> Result<DailyTask, StoreError> {
        let task = self
            .db
            .with_conn(|conn| daily_tasks::update_task(conn, task_id, input))?;
        self.changed("daily_task", task_id);
        Ok(task)
    }

    /// Rejected while progress rows exist for the task
    pub fn delete_task(&self, task_id: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| daily_tasks::delete_task(conn, task_id))?;
        self.changed("daily_task", task_id);
        Ok(())
    }

    // =========================================================================
    // Task Sets
    // =========================================================================

    pub fn get_set(&self, set_id: &str) -> Result<Option<TaskSet>, StoreError> {
        self.db.with_conn(|conn| task_sets::get_set(conn, set_id))
    }

    pub fn list_sets_with_tasks(&self) -> Result<Vec<TaskSetWithTasks>, StoreError> {
        self.db.with_conn(task_sets::list_sets_with_tasks)
    }

    pub fn create_set(&self, input: &CreateSetInput) -> Result<TaskSet, StoreError> {
        let set = self.db.with_conn(|conn| task_sets::create_set(conn, input))?;
        self.changed("task_set", &set.set_id);
        Ok(set)
    }

    pub fn set_set_active(&self, set_id: &str, is_active: bool) -> Result<TaskSet, StoreError> {
        let set = self
            .db
            .with_conn(|conn| task_sets::set_active(conn, set_id, is_active))?;
        self.changed("task_set", set_id);
        Ok(set)
    }

    pub fn add_task_to_set(
        &self,
        set_id: &str,
        task_id: &str,
        display_order: i32,
    ) -> Result<(), StoreError> {
        self.db
            .with_conn(|conn| task_sets::add_task_to_set(conn, set_id, task_id, display_order))?;
        self.changed("task_set", set_id);
        Ok(())
    }

    pub fn remove_task_from_set(&self, set_id: &str, task_id: &str) -> Result<bool, StoreError> {
        let removed = self
            .db
            .with_conn(|conn| task_sets::remove_task_from_set(conn, set_id, task_id))?;
        if removed {
            self.changed("task_set", set_id);
        }
        Ok(removed)
    }

    pub fn is_schedulable(&self, set_id: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| task_sets::is_schedulable(conn, set_id))
    }

    // =========================================================================
    // Calendar
    // =========================================================================

    pub fn assign_set(&self, date: NaiveDate, set_id: &str) -> Result<CalendarEntry, StoreError> {
        let entry = self
            .db
            .with_conn(|conn| task_calendar::assign_set(conn, date, set_id))?;
        self.changed("task_calendar", &entry.date);
        Ok(entry)
    }

    pub fn calendar_entry(&self, date: NaiveDate) -> Result<Option<CalendarEntry>, StoreError> {
        self.db.with_conn(|conn| task_calendar::get_entry(conn, date))
    }

    pub fn calendar_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<CalendarEntry>, StoreError> {
        self.db.with_conn(|conn| task_calendar::list_range(conn, from, to))
    }

    pub fn unassign(&self, date: NaiveDate) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| task_calendar::unassign(conn, date))
    }

    // =========================================================================
    // Seasons
    // =========================================================================

    pub fn get_season(&self, season_id: &str) -> Result<Option<SeasonPass>, StoreError> {
        self.db.with_conn(|conn| seasons::get_season(conn, season_id))
    }

    pub fn list_seasons(&self) -> Result<Vec<SeasonPass>, StoreError> {
        self.db.with_conn(seasons::list_seasons)
    }

    pub fn create_season(&self, input: &CreateSeasonInput) -> Result<SeasonPass, StoreError> {
        let season = self.db.with_conn(|conn| seasons::create_season(conn, input))?;
        self.changed("season_pass", &season.season_id);
        Ok(season)
    }

    /// Activating a season deactivates every other season
    pub fn set_season_active(&self, season_id: &str, is_active: bool) -> Result<SeasonPass, StoreError> {
        let season = self
            .db
            .with_conn(|conn| seasons::set_season_active(conn, season_id, is_active))?;
        self.changed("season_pass", season_id);
        Ok(season)
    }

    pub fn delete_season(&self, season_id: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| seasons::delete_season(conn, season_id))?;
        self.changed("season_pass", season_id);
        Ok(())
    }

    pub fn list_milestones(&self, season_id: &str) -> Result<Vec<SeasonMilestone>, StoreError> {
        self.db.with_conn(|conn| seasons::list_milestones(conn, season_id))
    }

    pub fn upsert_milestones(
        &self,
        season_id: &str,
        inputs: &[MilestoneInput],
    ) -> Result<Vec<SeasonMilestone>, StoreError> {
        let milestones = self
            .db
            .with_conn(|conn| seasons::upsert_milestones(conn, season_id, inputs))?;
        self.changed("season_milestones", season_id);
        Ok(milestones)
    }

    pub fn add_milestone_reward(
        &self,
        milestone_id: &str,
        input: &MilestoneRewardInput,
    ) -> Result<MilestoneReward, StoreError> {
        let reward = self
            .db
            .with_conn(|conn| seasons::add_milestone_reward(conn, milestone_id, input))?;
        self.changed("milestone_reward", milestone_id);
        Ok(reward)
    }

    pub fn list_milestone_rewards(&self, milestone_id: &str) -> Result<Vec<MilestoneReward>, StoreError> {
        self.db
            .with_conn(|conn| seasons::list_milestone_rewards(conn, milestone_id, None))
    }

    // =========================================================================
    // Seed Import
    // =========================================================================

    /// Import a seed catalog; rows that already exist are left untouched
    ///
    /// Calendar entries are always (re)assigned and milestones are upserted.
    /// Extra milestone rewards are only added for seasons created by this
    /// import. The import runs in one write transaction: any failure leaves
    /// the catalog as it was, and change events are published after commit.
    pub fn import_seed(&self, catalog: &SeedCatalog) -> Result<SeedReport, StoreError> {
        let (report, changes) = self
            .db
            .with_conn(|conn| conn.immediate_transaction(|conn| seed_catalog(conn, catalog)))?;

        for (entity, id) in changes {
            self.changed(entity, &id);
        }

        info!(
            actions = report.actions_created,
            tasks = report.tasks_created,
            sets = report.sets_created,
            calendar_days = report.calendar_days,
            seasons = report.seasons_created,
            milestones = report.milestones_upserted,
            skipped = report.skipped,
            "Seed catalog imported"
        );

        Ok(report)
    }
}

/// Apply a seed catalog inside the caller's transaction
fn seed_catalog(
    conn: &mut SqliteConnection,
    catalog: &SeedCatalog,
) -> Result<(SeedReport, Vec<(&'static str, String)>), StoreError> {
    let mut report = SeedReport::default();
    let mut changes = Vec::new();

    for action in &catalog.actions {
        if task_actions::get_action(conn, &action.action_id)?.is_some() {
            debug!(action_id = %action.action_id, "Seed action exists, skipping");
            report.skipped += 1;
            continue;
        }
        task_actions::create_action(conn, action)?;
        changes.push(("task_action", action.action_id.clone()));
        report.actions_created += 1;
    }

    for task in &catalog.tasks {
        if daily_tasks::get_task(conn, &task.task_id)?.is_some() {
            debug!(task_id = %task.task_id, "Seed task exists, skipping");
            report.skipped += 1;
            continue;
        }
        daily_tasks::create_task(conn, task)?;
        changes.push(("daily_task", task.task_id.clone()));
        report.tasks_created += 1;
    }

    for seed in &catalog.sets {
        let set_id = &seed.set.set_id;
        if task_sets::get_set(conn, set_id)?.is_some() {
            debug!(set_id = %set_id, "Seed set exists, skipping");
            report.skipped += 1;
            continue;
        }
        task_sets::create_set(conn, &seed.set)?;
        changes.push(("task_set", set_id.clone()));
        report.sets_created += 1;

        for member in &seed.tasks {
            task_sets::add_task_to_set(conn, set_id, &member.task_id, member.display_order)?;
            report.set_members_added += 1;
        }
    }

    for entry in &catalog.calendar {
        let assigned = task_calendar::assign_set(conn, entry.date, &entry.set_id)?;
        changes.push(("task_calendar", assigned.date));
        report.calendar_days += 1;
    }

    for seed in &catalog.seasons {
        let season_id = &seed.season.season_id;
        let created = if seasons::get_season(conn, season_id)?.is_some() {
            debug!(season_id = %season_id, "Seed season exists, upserting milestones only");
            report.skipped += 1;
            false
        } else {
            seasons::create_season(conn, &seed.season)?;
            changes.push(("season_pass", season_id.clone()));
            report.seasons_created += 1;
            true
        };

        if seed.milestones.is_empty() {
            continue;
        }

        let inputs: Vec<MilestoneInput> =
            seed.milestones.iter().map(|m| m.milestone.clone()).collect();
        report.milestones_upserted += seasons::apply_milestones(conn, season_id, &inputs)?.len();
        changes.push(("season_milestones", season_id.clone()));

        if created {
            for milestone in &seed.milestones {
                let milestone_id =
                    seasons::milestone_id_for(season_id, milestone.milestone.milestone_number);
                for reward in &milestone.rewards {
                    seasons::insert_milestone_reward(conn, &milestone_id, reward)?;
                    report.rewards_added += 1;
                }
                if !milestone.rewards.is_empty() {
                    changes.push(("milestone_reward", milestone_id));
                }
            }
        }
    }

    Ok((report, changes))
}
