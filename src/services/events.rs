//! Event system for progression changes
//!
//! Every state transition that a reward ledger or notifier may care about is
//! published on the bus. Emission never fails the operation that produced it.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use crate::db::{RewardDescriptor, Track};

/// Progression events emitted by services
#[derive(Debug, Clone)]
pub enum ProgressionEvent {
    // Daily task events
    TaskProgressed {
        user_id: i64,
        task_id: String,
        tracking_date: String,
        current_repetitions: i32,
    },
    TaskCompleted {
        user_id: i64,
        task_id: String,
        tracking_date: String,
    },
    TaskRewardClaimed {
        user_id: i64,
        task_id: String,
        tracking_date: String,
        reward: RewardDescriptor,
    },
    DailyReset {
        user_id: i64,
        reset_date: String,
        tasks: usize,
    },

    // Season events
    SeasonPointsAdded {
        user_id: i64,
        season_id: String,
        points: i64,
        total: i64,
    },
    InsideTrackGranted {
        user_id: i64,
        season_id: String,
    },
    MilestoneClaimed {
        user_id: i64,
        season_id: String,
        milestone_id: String,
        track: Track,
        rewards: Vec<RewardDescriptor>,
    },

    // Catalog events
    CatalogChanged {
        entity: &'static str,
        id: String,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &ProgressionEvent);
}

/// Event bus for broadcasting progression events
pub struct EventBus {
    sender: broadcast::Sender<ProgressionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: ProgressionEvent) {
        trace!(event = ?event, "Emitting progression event");
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressionEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs reward-bearing events at info, everything else at debug
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &ProgressionEvent) {
        match event {
            ProgressionEvent::TaskRewardClaimed { user_id, task_id, reward, .. } => {
                info!(
                    user_id,
                    task_id = %task_id,
                    reward_type = %reward.reward_type,
                    amount = reward.amount,
                    "Credit task reward"
                );
            }
            ProgressionEvent::MilestoneClaimed { user_id, milestone_id, track, rewards, .. } => {
                info!(
                    user_id,
                    milestone_id = %milestone_id,
                    %track,
                    rewards = rewards.len(),
                    "Credit milestone rewards"
                );
            }
            ProgressionEvent::TaskCompleted { user_id, task_id, .. } => {
                debug!(user_id, task_id = %task_id, "Task completed");
            }
            _ => {
                trace!(event = ?event, "Progression event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}
