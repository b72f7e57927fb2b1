//! Service layer for progression-store
//!
//! Services sit between callers (CLI, an API layer, an event pipeline) and
//! the repositories. Each service wraps database operations with:
//! - The injected clock and configured limits
//! - Cross-entity orchestration
//! - Event emission for reward ledgers and audit
//!
//! ## Architecture
//!
//! ```text
//! Callers (CLI / API / event pipeline)
//!     ↓
//! Service Layer (ProgressionStore, CatalogService)
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod events;
pub mod matching;
pub mod progression;
pub mod catalog;

// Re-exports
pub use events::{EventBus, EventListener, LoggingEventListener, ProgressionEvent};
pub use matching::conditions_match;
pub use progression::{
    ActionOutcome, BoardEntry, DailyBoard, DailyResetOutcome, MilestoneStatus, ProgressionStore,
    SeasonOverview,
};
pub use catalog::{CatalogService, SeedCatalog, SeedReport};

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db::ProgressDb;
use crate::error::StoreError;

/// Service container for dependency injection
pub struct Services {
    pub progression: Arc<ProgressionStore>,
    pub catalog: Arc<CatalogService>,
    pub events: Arc<EventBus>,
    pub db: Arc<ProgressDb>,
}

impl Services {
    /// Create all services with a shared database
    pub fn new(db: Arc<ProgressDb>, clock: Arc<dyn Clock>, config: &Config) -> Self {
        let events = Arc::new(EventBus::new());

        Self {
            progression: Arc::new(ProgressionStore::new(
                db.clone(),
                clock,
                events.clone(),
                config,
            )),
            catalog: Arc::new(CatalogService::new(db.clone(), events.clone())),
            events,
            db,
        }
    }

    /// Open the database described by `config` and wire services on the wall clock
    pub fn open(config: &Config) -> Result<Self, StoreError> {
        let db = Arc::new(ProgressDb::open(config)?);
        Ok(Self::new(db, Arc::new(SystemClock), config))
    }
}
