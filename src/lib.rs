//! Progression Store - daily tasks and season pass progression
//!
//! Holds task, task set, calendar and season definitions together with
//! per-user progress, and enforces the lifecycle rules a gameplay event
//! pipeline and a reward ledger rely on:
//!
//! - A progress row moves `pending -> completed -> claimed` and never back
//! - A task reward is credited at most once per (user, task, date)
//! - A milestone id enters a user's claimed set at most once
//! - Paid-track milestone rewards require the inside track
//!
//! The store never changes currency balances; claims return reward
//! descriptors and publish events for an external ledger to credit.
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/progression-store/
//! ├── progression.db     # SQLite database (WAL journal)
//! └── config.toml        # Configuration
//! ```

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod services;

// Re-exports
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use db::{ProgressDb, RewardDescriptor, TaskState, Track};
pub use error::StoreError;
pub use services::{
    ActionOutcome, CatalogService, DailyBoard, EventBus, ProgressionEvent, ProgressionStore,
    SeedCatalog, Services,
};
