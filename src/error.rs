//! Crate-wide error taxonomy for lifecycle operations.
//!
//! Registry transition violations are programming-contract errors and are
//! returned to the caller without retry. Collaborator failures
//! (`TrainingFailure`, `DataUnavailable`) are containable: a failed trial is
//! recorded on its experiment, a failed cycle is logged and the active model
//! keeps serving.

use crate::registry::VersionStatus;

/// Errors surfaced by lifecycle components
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// A version with this identifier is already registered
    #[error("duplicate version id: {0}")]
    DuplicateVersion(String),

    /// Illegal registry state change
    #[error("invalid transition from {from} to {to} for version {id}")]
    InvalidTransition {
        id: String,
        from: VersionStatus,
        to: VersionStatus,
    },

    /// No version with this identifier
    #[error("version not found: {0}")]
    VersionNotFound(String),

    /// The training collaborator failed (non-convergence, malformed data, ...)
    #[error("training failure: {0}")]
    TrainingFailure(String),

    /// Rolling buffer or training set below the required size
    #[error("insufficient data: have {have}, need {need}")]
    InsufficientData { have: usize, need: usize },

    /// A retraining cycle is already in progress for this family
    #[error("retraining already in progress for family {0}")]
    ConcurrentRetraining(String),

    /// The historical data provider is unavailable; retry later
    #[error("training data unavailable: {0}")]
    DataUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;
