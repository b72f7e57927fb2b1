//! Error types for progression-store

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task already completed: {0}")]
    AlreadyCompleted(String),

    #[error("Reward already claimed: {0}")]
    AlreadyClaimed(String),

    #[error("Task not completed: {0}")]
    NotCompleted(String),

    #[error("Insufficient points: required {required}, have {current}")]
    InsufficientPoints { required: i64, current: i64 },

    #[error("Paid track locked for user {user_id} in season {season_id}")]
    TrackLocked { user_id: i64, season_id: String },

    #[error("Concurrent modification of {0}: retries exhausted")]
    ConcurrentModification(String),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// True for outcomes where nothing happened because the work was already done.
    ///
    /// Event pipelines delivering at-least-once use this to drop redundant
    /// deliveries without treating them as failures.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::AlreadyCompleted(_) | StoreError::AlreadyClaimed(_)
        )
    }

    /// True for failures caused by the caller's request rather than the store.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound(_)
                | StoreError::Validation(_)
                | StoreError::NotCompleted(_)
                | StoreError::InsufficientPoints { .. }
                | StoreError::TrackLocked { .. }
        ) || self.is_conflict()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_classification() {
        assert!(StoreError::AlreadyClaimed("task1".into()).is_conflict());
        assert!(StoreError::AlreadyCompleted("task1".into()).is_conflict());
        assert!(!StoreError::NotCompleted("task1".into()).is_conflict());
        assert!(!StoreError::Internal("boom".into()).is_conflict());
    }

    #[test]
    fn test_rejection_classification() {
        assert!(StoreError::TrackLocked { user_id: 1, season_id: "s1".into() }.is_rejection());
        assert!(StoreError::InsufficientPoints { required: 10, current: 5 }.is_rejection());
        assert!(!StoreError::ConcurrentModification("row".into()).is_rejection());
        assert!(!StoreError::Connection("pool".into()).is_rejection());
    }

    #[test]
    fn test_display_includes_amounts() {
        let err = StoreError::InsufficientPoints { required: 1000, current: 800 };
        assert_eq!(err.to_string(), "Insufficient points: required 1000, have 800");
    }
}
