//! Integration tests for the progression store
//!
//! Each test runs against a fresh SQLite file in a temporary directory with
//! the clock pinned to a fixed day.

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{Duration, NaiveDate};
use serde_json::json;
use tempfile::TempDir;

use progression_store::db::daily_tasks::{CreateTaskInput, UpdateTaskInput};
use progression_store::db::seasons::{CreateSeasonInput, MilestoneInput, MilestoneRewardInput};
use progression_store::db::task_actions::CreateActionInput;
use progression_store::db::task_sets::CreateSetInput;
use progression_store::services::events::ProgressionEvent;
use progression_store::{
    ActionOutcome, Clock, Config, FixedClock, ProgressDb, ProgressionStore, RewardDescriptor, SeedCatalog,
    Services, StoreError, TaskState, Track,
};

const USER: i64 = 42;
const SEASON: &str = "s1";

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
}

struct Fixture {
    services: Services,
    config: Config,
    clock: Arc<FixedClock>,
    _temp: TempDir,
}

impl Fixture {
    fn store(&self) -> &ProgressionStore {
        &self.services.progression
    }
}

/// Fresh database with two tasks scheduled today and one season
fn setup() -> Fixture {
    let temp = TempDir::new().unwrap();
    let config = Config::with_storage_dir(temp.path());
    let db = Arc::new(ProgressDb::open(&config).unwrap());
    let clock = Arc::new(FixedClock::at_date(today()));
    let services = Services::new(db, clock.clone(), &config);

    let catalog = &services.catalog;
    catalog
        .create_action(&CreateActionInput {
            action_id: "play_hand".into(),
            name: "Play a hand".into(),
            description: String::new(),
            tracking_event: "hand_completed".into(),
            tracking_conditions: Some(json!({"game": ["poker", "blackjack"]})),
        })
        .unwrap();
    catalog
        .create_action(&CreateActionInput {
            action_id: "win_hand".into(),
            name: "Win a hand".into(),
            description: String::new(),
            tracking_event: "hand_won".into(),
            tracking_conditions: None,
        })
        .unwrap();

    catalog.create_task(&task("play_3_hands", "play_hand", 3, 50)).unwrap();
    catalog.create_task(&task("win_1_hand", "win_hand", 1, 10)).unwrap();

    catalog
        .create_set(&CreateSetInput {
            set_id: "default".into(),
            name: "Default".into(),
            description: None,
            is_active: true,
        })
        .unwrap();
    catalog.add_task_to_set("default", "win_1_hand", 2).unwrap();
    catalog.add_task_to_set("default", "play_3_hands", 1).unwrap();
    catalog.assign_set(today(), "default").unwrap();

    catalog.create_season(&season(SEASON, "2026-03-01", "2026-05-31", true)).unwrap();
    catalog
        .upsert_milestones(
            SEASON,
            &[milestone(1, 500, 50, 0), milestone(2, 1000, 100, 200)],
        )
        .unwrap();

    Fixture {
        services,
        config,
        clock,
        _temp: temp,
    }
}

fn task(task_id: &str, action_id: &str, reps: i32, gems: i64) -> CreateTaskInput {
    CreateTaskInput {
        task_id: task_id.into(),
        action_id: action_id.into(),
        name: task_id.replace('_', " "),
        description: String::new(),
        required_repetitions: reps,
        reward_type: "gems".into(),
        reward_amount: gems,
        is_active: true,
    }
}

fn season(season_id: &str, start: &str, end: &str, is_active: bool) -> CreateSeasonInput {
    CreateSeasonInput {
        season_id: season_id.into(),
        name: season_id.to_uppercase(),
        description: None,
        start_date: start.parse().unwrap(),
        end_date: end.parse().unwrap(),
        is_active,
        created_by: None,
    }
}

fn milestone(number: i32, points: i64, free: i64, paid: i64) -> MilestoneInput {
    MilestoneInput {
        milestone_number: number,
        required_points: points,
        free_reward_type: None,
        free_reward_amount: Some(free),
        paid_reward_type: None,
        paid_reward_amount: Some(paid),
        is_active: None,
    }
}

// ============================================================================
// Daily tasks
// ============================================================================

#[test]
fn test_three_repetitions_then_single_claim() {
    let fx = setup();
    let store = fx.store();

    let first = store.increment_repetition(USER, "play_3_hands", today(), 1).unwrap();
    assert_eq!(first.progress.current_repetitions, 1);
    assert!(!first.newly_completed);

    store.increment_repetition(USER, "play_3_hands", today(), 1).unwrap();
    let third = store.increment_repetition(USER, "play_3_hands", today(), 1).unwrap();
    assert!(third.newly_completed);
    assert!(third.progress.completed);
    assert_eq!(third.progress.state(), TaskState::Completed);

    let claimed = store.claim_reward(USER, "play_3_hands", today()).unwrap();
    assert_eq!(claimed.reward, RewardDescriptor::new("gems", 50));
    assert_eq!(claimed.progress.state(), TaskState::Claimed);

    let again = store.claim_reward(USER, "play_3_hands", today()).unwrap_err();
    assert!(matches!(again, StoreError::AlreadyClaimed(_)));
    assert!(again.is_conflict());
}

#[test]
fn test_increment_after_completion_is_rejected() {
    let fx = setup();
    let store = fx.store();

    let outcome = store.increment_repetition(USER, "play_3_hands", today(), 10).unwrap();
    assert_eq!(outcome.progress.current_repetitions, 3);
    assert!(outcome.newly_completed);

    let err = store.increment_repetition(USER, "play_3_hands", today(), 1).unwrap_err();
    assert!(matches!(err, StoreError::AlreadyCompleted(_)));

    let progress = store.get_task_progress(USER, "play_3_hands", today()).unwrap().unwrap();
    assert_eq!(progress.current_repetitions, 3);
}

#[test]
fn test_increment_validation() {
    let fx = setup();
    let store = fx.store();

    let err = store.increment_repetition(USER, "play_3_hands", today(), 0).unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    let yesterday = today() - Duration::days(1);
    let err = store.increment_repetition(USER, "play_3_hands", yesterday, 1).unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    let err = store.increment_repetition(USER, "no_such_task", today(), 1).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));

    fx.services
        .catalog
        .update_task(
            "win_1_hand",
            &UpdateTaskInput {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
    let err = store.increment_repetition(USER, "win_1_hand", today(), 1).unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[test]
fn test_claim_requires_completion() {
    let fx = setup();
    let store = fx.store();

    let err = store.claim_reward(USER, "play_3_hands", today()).unwrap_err();
    assert!(matches!(err, StoreError::NotCompleted(_)));

    store.increment_repetition(USER, "play_3_hands", today(), 2).unwrap();
    let err = store.claim_reward(USER, "play_3_hands", today()).unwrap_err();
    assert!(matches!(err, StoreError::NotCompleted(_)));
}

#[test]
fn test_clock_defines_today() {
    let fx = setup();
    let store = fx.store();

    fx.clock.advance(Duration::days(1));
    let tomorrow = today() + Duration::days(1);
    assert_eq!(store.today(), tomorrow);

    let err = store.increment_repetition(USER, "play_3_hands", today(), 1).unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    let outcome = store.increment_repetition(USER, "play_3_hands", tomorrow, 1).unwrap();
    assert_eq!(outcome.progress.tracking_date, "2026-03-02");
    assert_eq!(outcome.progress.reset_at, "2026-03-03T00:00:00Z");
}

#[test]
fn test_concurrent_get_or_create_yields_one_row() {
    let fx = setup();
    let store = Arc::clone(&fx.services.progression);
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store
                    .get_or_create_task_progress(USER, "play_3_hands", today())
                    .unwrap()
                    .id
            })
        })
        .collect();

    let ids: Vec<i32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(ids.iter().all(|id| *id == ids[0]));

    let progress = store.get_task_progress(USER, "play_3_hands", today()).unwrap().unwrap();
    assert_eq!(progress.id, ids[0]);
    assert_eq!(progress.current_repetitions, 0);
    assert_eq!(store.stats().unwrap().task_progress_rows, 1);
}

#[test]
fn test_concurrent_duplicate_claims_credit_once() {
    let fx = setup();
    let store = Arc::clone(&fx.services.progression);
    store.increment_repetition(USER, "win_1_hand", today(), 1).unwrap();

    let barrier = Arc::new(Barrier::new(6));
    let handles: Vec<_> = (0..6)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.claim_reward(USER, "win_1_hand", today())
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, StoreError::AlreadyClaimed(_))));
}

// ============================================================================
// Board, reset and action ingestion
// ============================================================================

#[test]
fn test_daily_reset_materialises_board_once() {
    let fx = setup();
    let store = fx.store();

    let first = store.daily_reset(USER, today()).unwrap();
    assert!(first.newly_recorded);
    assert_eq!(first.board.set_id.as_deref(), Some("default"));
    let order: Vec<_> = first.board.tasks.iter().map(|e| e.task.task_id.as_str()).collect();
    assert_eq!(order, vec!["play_3_hands", "win_1_hand"]);
    assert!(first.board.tasks.iter().all(|e| e.state == TaskState::Pending));

    let second = store.daily_reset(USER, today()).unwrap();
    assert!(!second.newly_recorded);
    assert_eq!(second.board.tasks.len(), 2);
    assert_eq!(
        second.board.tasks[0].progress.id,
        first.board.tasks[0].progress.id
    );
}

#[test]
fn test_board_falls_back_to_default_set() {
    let fx = setup();
    let tomorrow = today() + Duration::days(1);

    let board = fx.store().daily_board(USER, tomorrow).unwrap();
    assert!(board.set_id.is_none());
    assert!(board.tasks.is_empty());

    let mut config = fx.config.clone();
    config.default_set_id = Some("default".into());
    let with_default = ProgressionStore::new(
        Arc::clone(&fx.services.db),
        fx.clock.clone(),
        Arc::clone(&fx.services.events),
        &config,
    );
    let board = with_default.daily_board(USER, tomorrow).unwrap();
    assert_eq!(board.set_id.as_deref(), Some("default"));
    assert_eq!(board.tasks.len(), 2);
}

#[test]
fn test_record_action_advances_bound_tasks() {
    let fx = setup();
    let store = fx.store();
    let now = fx.clock.now();

    let outcomes = store.record_action(USER, "play_hand", now).unwrap();
    assert_eq!(
        outcomes,
        vec![ActionOutcome::Advanced {
            task_id: "play_3_hands".into(),
            current_repetitions: 1,
            completed: false,
        }]
    );

    store.record_action(USER, "play_hand", now).unwrap();
    let third = store.record_action(USER, "play_hand", now).unwrap();
    assert!(matches!(&third[0], ActionOutcome::Advanced { completed: true, .. }));

    let redundant = store.record_action(USER, "play_hand", now).unwrap();
    assert_eq!(
        redundant,
        vec![ActionOutcome::AlreadyCompleted {
            task_id: "play_3_hands".into()
        }]
    );

    let err = store.record_action(USER, "no_such_action", now).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[test]
fn test_inactive_set_ignores_actions() {
    let fx = setup();
    let store = fx.store();
    let now = fx.clock.now();

    fx.services.catalog.set_set_active("default", false).unwrap();
    assert!(store.daily_board(USER, today()).unwrap().tasks.is_empty());

    let outcomes = store.record_action(USER, "win_hand", now).unwrap();
    assert!(outcomes.is_empty());
    assert!(store.get_task_progress(USER, "win_1_hand", today()).unwrap().is_none());

    fx.services.catalog.set_set_active("default", true).unwrap();
    let outcomes = store.record_action(USER, "win_hand", now).unwrap();
    assert_eq!(outcomes.len(), 1);
}

#[test]
fn test_concurrent_increments_stop_at_requirement() {
    let fx = setup();
    let store = Arc::clone(&fx.services.progression);
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.increment_repetition(USER, "play_3_hands", today(), 1)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 3);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Ok(outcome) if outcome.newly_completed))
            .count(),
        1
    );
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, StoreError::AlreadyCompleted(_))));

    let progress = store.get_task_progress(USER, "play_3_hands", today()).unwrap().unwrap();
    assert_eq!(progress.current_repetitions, 3);
    assert!(progress.completed);
}

#[test]
fn test_failed_event_applies_nothing() {
    let fx = setup();
    let store = fx.store();
    let catalog = &fx.services.catalog;
    let now = fx.clock.now();

    catalog
        .create_action(&CreateActionInput {
            action_id: "any_hand".into(),
            name: "Any hand".into(),
            description: String::new(),
            tracking_event: "hand_completed".into(),
            tracking_conditions: None,
        })
        .unwrap();
    catalog.create_task(&task("hand_streak", "any_hand", 5, 20)).unwrap();
    catalog.add_task_to_set("default", "hand_streak", 3).unwrap();

    // Make the second matched task fail after the first has been written
    let raw = rusqlite::Connection::open(fx.services.db.path()).unwrap();
    raw.execute_batch(
        "CREATE TRIGGER streak_unavailable BEFORE INSERT ON user_task_progress
         WHEN NEW.task_id = 'hand_streak'
         BEGIN SELECT RAISE(ABORT, 'streak unavailable'); END;",
    )
    .unwrap();

    let mut receiver = fx.services.events.subscribe();
    let poker = json!({"game": "poker"});
    let err = store
        .record_event(USER, "hand_completed", poker.as_object().unwrap(), now)
        .unwrap_err();
    assert!(matches!(err, StoreError::Database(_)));
    assert!(store.progress_for_date(USER, today()).unwrap().is_empty());
    assert!(receiver.try_recv().is_err());

    // Redelivery after the fault counts the event once
    raw.execute_batch("DROP TRIGGER streak_unavailable;").unwrap();
    let outcomes = store
        .record_event(USER, "hand_completed", poker.as_object().unwrap(), now)
        .unwrap();
    assert_eq!(outcomes.len(), 2);

    let progress = store.progress_for_date(USER, today()).unwrap();
    let reps: Vec<_> = progress
        .iter()
        .map(|p| (p.task_id.as_str(), p.current_repetitions))
        .collect();
    assert_eq!(reps, vec![("hand_streak", 1), ("play_3_hands", 1)]);
}

#[test]
fn test_last_daily_reset_tracks_latest_day() {
    let fx = setup();
    let store = fx.store();
    assert!(store.last_daily_reset(USER).unwrap().is_none());

    store.daily_reset(USER, today()).unwrap();
    let tomorrow = today() + Duration::days(1);
    fx.clock.advance(Duration::days(1));
    store.daily_reset(USER, tomorrow).unwrap();

    let last = store.last_daily_reset(USER).unwrap().unwrap();
    assert_eq!(last.reset_date, "2026-03-02");
    assert!(store.last_daily_reset(USER + 1).unwrap().is_none());

    // Yesterday's rows stay; tomorrow has no calendar entry
    assert_eq!(store.progress_for_date(USER, today()).unwrap().len(), 2);
    assert!(store.progress_for_date(USER, tomorrow).unwrap().is_empty());
}

#[test]
fn test_record_event_matches_conditions() {
    let fx = setup();
    let store = fx.store();
    let now = fx.clock.now();

    let poker = json!({"game": "poker", "table": 7});
    let slots = json!({"game": "slots"});

    let outcomes = store
        .record_event(USER, "hand_completed", poker.as_object().unwrap(), now)
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].task_id(), "play_3_hands");

    let outcomes = store
        .record_event(USER, "hand_completed", slots.as_object().unwrap(), now)
        .unwrap();
    assert!(outcomes.is_empty());

    let outcomes = store
        .record_event(USER, "hand_won", slots.as_object().unwrap(), now)
        .unwrap();
    assert!(matches!(&outcomes[0], ActionOutcome::Advanced { completed: true, .. }));
}

#[test]
fn test_events_published_for_reward_claims() {
    let fx = setup();
    let store = fx.store();
    let mut receiver = fx.services.events.subscribe();

    store.increment_repetition(USER, "win_1_hand", today(), 1).unwrap();
    store.claim_reward(USER, "win_1_hand", today()).unwrap();

    let mut saw_completed = false;
    let mut credited = None;
    while let Ok(event) = receiver.try_recv() {
        match event {
            ProgressionEvent::TaskCompleted { task_id, .. } => {
                saw_completed = task_id == "win_1_hand";
            }
            ProgressionEvent::TaskRewardClaimed { reward, .. } => credited = Some(reward),
            _ => {}
        }
    }
    assert!(saw_completed);
    assert_eq!(credited, Some(RewardDescriptor::new("gems", 10)));
}

// ============================================================================
// Season pass
// ============================================================================

#[test]
fn test_milestone_requires_points() {
    let fx = setup();
    let store = fx.store();

    store.add_season_points(USER, SEASON, 800).unwrap();
    let err = store.claim_milestone(USER, SEASON, 2, Track::Free).unwrap_err();
    match err {
        StoreError::InsufficientPoints { required, current } => {
            assert_eq!(required, 1000);
            assert_eq!(current, 800);
        }
        other => panic!("expected InsufficientPoints, got {:?}", other),
    }

    let progress = store.add_season_points(USER, SEASON, 200).unwrap();
    assert_eq!(progress.season_points, 1000);

    let claim = store.claim_milestone(USER, SEASON, 2, Track::Free).unwrap();
    assert_eq!(claim.milestone.milestone_id, "s1_2");
    assert_eq!(claim.rewards, vec![RewardDescriptor::new("chips", 100)]);
    assert!(claim.progress.claimed_milestones().unwrap().contains("s1_2"));

    let err = store.claim_milestone(USER, SEASON, 2, Track::Free).unwrap_err();
    assert!(matches!(err, StoreError::AlreadyClaimed(_)));
}

#[test]
fn test_paid_track_locked_without_inside_track() {
    let fx = setup();
    let store = fx.store();

    store.add_season_points(USER, SEASON, 5000).unwrap();
    let err = store.claim_milestone(USER, SEASON, 2, Track::Paid).unwrap_err();
    assert!(matches!(err, StoreError::TrackLocked { user_id: USER, .. }));

    let progress = store.grant_inside_track(USER, SEASON).unwrap();
    assert!(progress.has_inside_track);

    let claim = store.claim_milestone(USER, SEASON, 2, Track::Paid).unwrap();
    assert_eq!(claim.rewards, vec![RewardDescriptor::new("chips", 200)]);
    let err = store.claim_milestone(USER, SEASON, 2, Track::Free).unwrap_err();
    assert!(matches!(err, StoreError::AlreadyClaimed(_)));

    // Free claims keep paying the free reward even with the inside track
    let claim = store.claim_milestone(USER, SEASON, 1, Track::Free).unwrap();
    assert_eq!(claim.rewards, vec![RewardDescriptor::new("chips", 50)]);
}

#[test]
fn test_repeated_grants_publish_once() {
    let fx = setup();
    let store = Arc::clone(&fx.services.progression);
    let mut receiver = fx.services.events.subscribe();

    let barrier = Arc::new(Barrier::new(6));
    let handles: Vec<_> = (0..6)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.grant_inside_track(USER, SEASON)
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap().unwrap().has_inside_track);
    }
    store.grant_inside_track(USER, SEASON).unwrap();

    let mut grants = 0;
    while let Ok(event) = receiver.try_recv() {
        if matches!(event, ProgressionEvent::InsideTrackGranted { .. }) {
            grants += 1;
        }
    }
    assert_eq!(grants, 1);
}

#[test]
fn test_concurrent_milestone_claims_append_once() {
    let fx = setup();
    let store = Arc::clone(&fx.services.progression);
    store.add_season_points(USER, SEASON, 1000).unwrap();

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.claim_milestone(USER, SEASON, 2, Track::Free)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, StoreError::AlreadyClaimed(_) | StoreError::ConcurrentModification(_))));

    let progress = store.get_season_progress(USER, SEASON).unwrap().unwrap();
    let claimed = progress.claimed_milestones().unwrap();
    assert_eq!(claimed.len(), 1);
    assert!(claimed.contains("s1_2"));
}

#[test]
fn test_points_racing_a_claim_are_kept() {
    let fx = setup();
    let store = Arc::clone(&fx.services.progression);
    store.add_season_points(USER, SEASON, 1000).unwrap();

    let barrier = Arc::new(Barrier::new(8));
    let claimers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.claim_milestone(USER, SEASON, 2, Track::Free)
            })
        })
        .collect();
    let adders: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.add_season_points(USER, SEASON, 10)
            })
        })
        .collect();

    for adder in adders {
        adder.join().unwrap().unwrap();
    }
    let results: Vec<_> = claimers.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, StoreError::AlreadyClaimed(_) | StoreError::ConcurrentModification(_))));

    let progress = store.get_season_progress(USER, SEASON).unwrap().unwrap();
    assert_eq!(progress.season_points, 1040);
    let claimed = progress.claimed_milestones().unwrap();
    assert_eq!(claimed.len(), 1);
    assert!(claimed.contains("s1_2"));
}

#[test]
fn test_current_season_overview() {
    let fx = setup();
    let store = fx.store();

    let current = store.current_season(today()).unwrap().unwrap();
    assert_eq!(current.season_id, SEASON);
    assert!(store
        .current_season(NaiveDate::from_ymd_opt(2026, 6, 1).unwrap())
        .unwrap()
        .is_none());

    let overview = store.season_overview(USER, SEASON).unwrap();
    assert_eq!(overview.days_remaining, 92);
    assert_eq!(overview.season_points, 0);
    assert!(!overview.has_inside_track);
    assert_eq!(overview.milestones.len(), 2);
    assert!(overview.milestones.iter().all(|m| !m.claimed && !m.claimable));
    assert_eq!(overview.milestones[1].paid_rewards, vec![RewardDescriptor::new("chips", 200)]);
    assert!(overview.milestones[0].paid_rewards.is_empty());
    assert!(store.get_season_progress(USER, SEASON).unwrap().is_none());

    store.add_season_points(USER, SEASON, 600).unwrap();
    store.claim_milestone(USER, SEASON, 1, Track::Free).unwrap();
    store.add_season_points(USER, SEASON, 400).unwrap();

    let overview = store.season_overview(USER, SEASON).unwrap();
    assert_eq!(overview.season_points, 1000);
    assert!(overview.milestones[0].claimed);
    assert!(!overview.milestones[0].claimable);
    assert!(overview.milestones[1].claimable);
}

#[test]
fn test_claim_eligible_milestones() {
    let fx = setup();
    let store = fx.store();

    store.add_season_points(USER, SEASON, 700).unwrap();
    let err = store.claim_eligible_milestones(USER, SEASON, Track::Paid).unwrap_err();
    assert!(matches!(err, StoreError::TrackLocked { .. }));

    let claims = store.claim_eligible_milestones(USER, SEASON, Track::Free).unwrap();
    let ids: Vec<_> = claims.iter().map(|c| c.milestone.milestone_id.as_str()).collect();
    assert_eq!(ids, vec!["s1_1"]);

    store.add_season_points(USER, SEASON, 300).unwrap();
    store.grant_inside_track(USER, SEASON).unwrap();
    let claims = store.claim_eligible_milestones(USER, SEASON, Track::Paid).unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].milestone.milestone_id, "s1_2");
    assert_eq!(claims[0].rewards, vec![RewardDescriptor::new("chips", 200)]);

    assert!(store
        .claim_eligible_milestones(USER, SEASON, Track::Free)
        .unwrap()
        .is_empty());
    let claimed = store
        .get_season_progress(USER, SEASON)
        .unwrap()
        .unwrap()
        .claimed_milestones()
        .unwrap();
    assert_eq!(claimed.len(), 2);
}

#[test]
fn test_season_points_must_be_positive() {
    let fx = setup();
    let err = fx.store().add_season_points(USER, SEASON, 0).unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    let err = fx.store().add_season_points(USER, "missing", 10).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[test]
fn test_milestone_reward_rows_override_inline_reward() {
    let fx = setup();
    fx.services
        .catalog
        .add_milestone_reward(
            "s1_1",
            &MilestoneRewardInput {
                track: Track::Free,
                reward_type: "avatar_frame".into(),
                reward_amount: 1,
                display_order: 0,
            },
        )
        .unwrap();

    let store = fx.store();
    store.add_season_points(USER, SEASON, 500).unwrap();
    let claim = store.claim_milestone(USER, SEASON, 1, Track::Free).unwrap();
    assert_eq!(claim.rewards, vec![RewardDescriptor::new("avatar_frame", 1)]);
}

#[test]
fn test_season_analytics() {
    let fx = setup();
    let store = fx.store();

    store.add_season_points(1, SEASON, 600).unwrap();
    store.claim_milestone(1, SEASON, 1, Track::Free).unwrap();
    store.grant_inside_track(2, SEASON).unwrap();

    let analytics = store.season_analytics(SEASON).unwrap();
    assert_eq!(analytics.users_with_progress, 2);
    assert_eq!(analytics.users_with_inside_track, 1);
    assert!((analytics.conversion_rate - 50.0).abs() < f64::EPSILON);
    assert!((analytics.avg_milestones_claimed - 0.5).abs() < f64::EPSILON);
    assert_eq!(analytics.milestone_completion.len(), 1);
    assert_eq!(analytics.milestone_completion[0].milestone_id, "s1_1");

    let page = store.list_season_progress(SEASON, 1, 1).unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.total_pages, 2);
    assert_eq!(page.data.len(), 1);
}

// ============================================================================
// Catalog rules
// ============================================================================

#[test]
fn test_set_membership_and_scheduling_rules() {
    let fx = setup();
    let catalog = &fx.services.catalog;

    let err = catalog.add_task_to_set("default", "play_3_hands", 5).unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    catalog
        .create_set(&CreateSetInput {
            set_id: "empty".into(),
            name: "Empty".into(),
            description: None,
            is_active: true,
        })
        .unwrap();
    assert!(!catalog.is_schedulable("empty").unwrap());
    let err = catalog.assign_set(today(), "empty").unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    let err = catalog.delete_action("play_hand").unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    fx.store().increment_repetition(USER, "win_1_hand", today(), 1).unwrap();
    let err = catalog.delete_task("win_1_hand").unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[test]
fn test_season_overlap_and_activation() {
    let fx = setup();
    let catalog = &fx.services.catalog;

    let err = catalog
        .create_season(&season("s2", "2026-05-01", "2026-07-31", true))
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    let err = catalog
        .create_season(&season("bad", "2026-08-01", "2026-07-01", false))
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    catalog.create_season(&season("s2", "2026-05-01", "2026-07-31", false)).unwrap();
    let activated = catalog.set_season_active("s2", true).unwrap();
    assert!(activated.is_active);
    assert!(!catalog.get_season(SEASON).unwrap().unwrap().is_active);
}

#[test]
fn test_milestone_points_must_increase() {
    let fx = setup();
    let err = fx
        .services
        .catalog
        .upsert_milestones(SEASON, &[milestone(3, 900, 0, 0)])
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    let milestones = fx
        .services
        .catalog
        .upsert_milestones(SEASON, &[milestone(3, 1500, 0, 300)])
        .unwrap();
    assert_eq!(milestones.len(), 3);
    assert_eq!(milestones[2].milestone_id, "s1_3");
    assert_eq!(milestones[2].free_reward_type, "chips");
}

#[test]
fn test_seed_import_is_repeatable() {
    let temp = TempDir::new().unwrap();
    let config = Config::with_storage_dir(temp.path());
    let services = Services::new(
        Arc::new(ProgressDb::open(&config).unwrap()),
        Arc::new(FixedClock::at_date(today())),
        &config,
    );

    let catalog = SeedCatalog::from_toml_str(
        r#"
        [[actions]]
        action_id = "play_hand"
        name = "Play a hand"
        tracking_event = "hand_completed"

        [[tasks]]
        task_id = "play_3_hands"
        action_id = "play_hand"
        name = "Play 3 hands"
        required_repetitions = 3
        reward_amount = 50

        [[sets]]
        set_id = "default"
        name = "Default"
        tasks = [{ task_id = "play_3_hands", display_order = 1 }]

        [[calendar]]
        date = "2026-03-01"
        set_id = "default"

        [[seasons]]
        season_id = "s1"
        name = "Season One"
        start_date = "2026-03-01"
        end_date = "2026-05-31"

        [[seasons.milestones]]
        milestone_number = 1
        required_points = 100
        free_reward_amount = 25

        [[seasons.milestones.rewards]]
        track = "paid"
        reward_type = "avatar"
        reward_amount = 1
        "#,
    )
    .unwrap();

    let first = services.catalog.import_seed(&catalog).unwrap();
    assert_eq!(first.actions_created, 1);
    assert_eq!(first.tasks_created, 1);
    assert_eq!(first.set_members_added, 1);
    assert_eq!(first.seasons_created, 1);
    assert_eq!(first.rewards_added, 1);
    assert_eq!(first.skipped, 0);

    let second = services.catalog.import_seed(&catalog).unwrap();
    assert_eq!(second.actions_created, 0);
    assert_eq!(second.rewards_added, 0);
    assert_eq!(second.skipped, 4);

    let board = services.progression.daily_board(USER, today()).unwrap();
    assert_eq!(board.tasks.len(), 1);
    assert_eq!(services.catalog.list_milestone_rewards("s1_1").unwrap().len(), 1);
}

#[test]
fn test_failed_seed_import_leaves_no_rows() {
    let temp = TempDir::new().unwrap();
    let config = Config::with_storage_dir(temp.path());
    let services = Services::new(
        Arc::new(ProgressDb::open(&config).unwrap()),
        Arc::new(FixedClock::at_date(today())),
        &config,
    );

    let catalog = SeedCatalog::from_toml_str(
        r#"
        [[actions]]
        action_id = "play_hand"
        name = "Play a hand"
        tracking_event = "hand_completed"

        [[tasks]]
        task_id = "play_3_hands"
        action_id = "play_hand"
        name = "Play 3 hands"
        required_repetitions = 3

        [[tasks]]
        task_id = "orphan"
        action_id = "missing_action"
        name = "Orphan"
        "#,
    )
    .unwrap();

    let mut receiver = services.events.subscribe();
    let err = services.catalog.import_seed(&catalog).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
    assert!(services.catalog.get_action("play_hand").unwrap().is_none());
    assert!(services.catalog.get_task("play_3_hands").unwrap().is_none());
    assert!(receiver.try_recv().is_err());
}
