//! Model Lifecycle Core (MLOPS-020)
//!
//! Automated lifecycle management for prediction models: rolling performance
//! monitoring, versioned registry with a single serving version per family,
//! hyperparameter search, and trigger-driven retraining with compare-then-
//! promote semantics.
//!
//! ## Architecture
//!
//! - `provider`: Seams to the training and data collaborators
//! - `monitor`: Rolling prediction-outcome window and degradation detection
//! - `registry`: Version lineage, status state machine, atomic promotion
//! - `search`: Grid / random / successive hyperparameter sweeps
//! - `retrain`: Trigger evaluation and the full retraining cycle
//! - `store`: Pluggable persistence for versions, experiments, logs, windows
//!
//! ## Example
//!
//! ```ignore
//! use vigilar::{ModelFamily, MonitorConfig, PerformanceMonitor};
//! use vigilar::retrain::{RetrainConfig, RetrainingManager};
//!
//! let monitor = Arc::new(PerformanceMonitor::new(MonitorConfig::default()));
//! monitor.record_outcome(1.0, 1.0, 0.8, true);
//!
//! let manager = RetrainingManager::new(
//!     RetrainConfig::new(ModelFamily::Lstm, space),
//!     registry, monitor, trainer, provider, store,
//! );
//! if let Some(trigger) = manager.check_triggers() {
//!     manager.execute_retraining(trigger)?;
//! }
//! ```

pub mod error;
pub mod monitor;
pub mod provider;
pub mod registry;
pub mod retrain;
pub mod search;
pub mod store;

pub use error::{LifecycleError, Result};
pub use monitor::{DegradationStatus, MonitorConfig, PerformanceMonitor, PerformanceWindow};
pub use provider::{DataProvider, FitOutcome, ModelFamily, ModelTrainer, ParamSet, ParamValue, TrainingData};
pub use registry::{ModelRegistry, ModelVersion, VersionStatus};
pub use retrain::{CycleOutcome, RetrainConfig, RetrainingManager, RetrainingTrigger, TriggerKind};
pub use search::{SearchConfig, SearchEngine, SearchSpace, SearchStrategy, TrainingExperiment};
pub use store::{InMemoryStore, JsonFileStore, LifecycleStore};
