//! Model Registry (MLOPS-023)
//!
//! Single source of truth for which model version serves each family, with
//! full version history and promotion/rollback. Exactly one version per
//! family is serving at any instant; `promote` swaps the serving snapshot
//! inside one write-lock critical section so concurrent readers observe the
//! old version or the new one, never a torn intermediate.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{LifecycleError, Result};
use crate::provider::{ModelFamily, ParamSet};


/// Lifecycle status of one model version
///
/// `Degraded` is a monitor-assigned label on the version that is still
/// serving; it does not open a second serving slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionStatus {
    /// Trained but not yet evaluated against the active version
    Training,
    /// Serving the prediction path
    Active,
    /// Still serving, flagged by the monitor
    Degraded,
    /// Retired
    Archived,
}

impl VersionStatus {
    /// Whether this version currently serves predictions
    pub fn is_serving(&self) -> bool {
        matches!(self, VersionStatus::Active | VersionStatus::Degraded)
    }

    /// Check if a transition to `target` is legal
    pub fn can_transition_to(&self, target: VersionStatus) -> bool {
        use VersionStatus::{Active, Archived, Degraded, Training};
        match (self, target) {
            // Promotion and rejection out of training
            (Training, Active) | (Training, Archived) => true,
            // Replacement by a newer version
            (Active, Archived) | (Degraded, Archived) => true,
            // Monitor flag on and off the serving version
            (Active, Degraded) | (Degraded, Active) => true,
            // Rollback
            (Archived, Active) => true,
            // Same state is a no-op
            (a, b) if *a == b => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VersionStatus::Training => "training",
            VersionStatus::Active => "active",
            VersionStatus::Degraded => "degraded",
            VersionStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable record of one trained artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVersion {
    /// Unique identifier
    pub id: String,
    /// Model family this version belongs to
    pub family: ModelFamily,
    /// Where the trained artifact is stored
    pub artifact_uri: String,
    /// Hyperparameters the version was trained with
    pub params: ParamSet,
    /// Training-time metrics (metric name -> value)
    pub metrics: std::collections::BTreeMap<String, f64>,
    /// Content fingerprint of the training dataset
    pub dataset_fingerprint: String,
    /// Lifecycle status
    pub status: VersionStatus,
    pub created_at: DateTime<Utc>,
    /// Stamped on each promotion
    pub promoted_at: Option<DateTime<Utc>>,
    /// Free-form metadata
    pub metadata: std::collections::BTreeMap<String, String>,
}

impl ModelVersion {
    pub fn new(id: &str, family: ModelFamily, artifact_uri: &str) -> Self {
        Self {
            id: id.to_string(),
            family,
            artifact_uri: artifact_uri.to_string(),
            params: ParamSet::new(),
            metrics: std::collections::BTreeMap::new(),
            dataset_fingerprint: String::new(),
            status: VersionStatus::Training,
            created_at: Utc::now(),
            promoted_at: None,
            metadata: std::collections::BTreeMap::new(),
        }
    }

    pub fn with_params(mut self, params: ParamSet) -> Self {
        self.params = params;
        self
    }

    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: &str) -> Self {
        self.dataset_fingerprint = fingerprint.to_string();
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Read-only metric-by-metric diff between two versions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionComparison {
    pub id_a: String,
    pub id_b: String,
    /// metric -> (value in a, value in b); None where a side lacks the metric
    pub metrics: std::collections::BTreeMap<String, (Option<f64>, Option<f64>)>,
    /// b minus a where both sides have the metric
    pub diffs: std::collections::BTreeMap<String, f64>,
}

/// Append-only audit record of one status change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    pub version_id: String,
    pub family: ModelFamily,
    pub from: VersionStatus,
    pub to: VersionStatus,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    versions: HashMap<String, ModelVersion>,
    /// Registration order, for stable listings
    order: Vec<String>,
    /// The serving snapshot per family; swapped whole under the write lock
    serving: HashMap<ModelFamily, Arc<ModelVersion>>,
    transitions: Vec<StatusTransition>,
}

impl RegistryInner {
    fn record_transition(
        &mut self,
        id: &str,
        family: ModelFamily,
        from: VersionStatus,
        to: VersionStatus,
        reason: Option<String>,
    ) {
        self.transitions.push(StatusTransition {
            version_id: id.to_string(),
            family,
            from,
            to,
            at: Utc::now(),
            reason,
        });
    }
}

/// Shared-state model registry
///
/// Clones share one underlying store, so the serving path and the retraining
/// manager can hold their own handles; tests instantiate independent
/// registries in parallel.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a new version in `Training` status
    pub fn register(&self, version: ModelVersion) -> Result<()> {
        let mut inner = self.write();
        if inner.versions.contains_key(&version.id) {
            return Err(LifecycleError::DuplicateVersion(version.id));
        }
        let mut version = version;
        version.status = VersionStatus::Training;
        inner.order.push(version.id.clone());
        inner.versions.insert(version.id.clone(), version);
        Ok(())
    }

    /// Make `id` the serving version for its family
    ///
    /// Demotes the current serving version (if any) to `Archived` and
    /// activates the target in one critical section. Concurrent promotions
    /// serialize on the write lock.
    pub fn promote(&self, id: &str) -> Result<()> {
        let mut inner = self.write();
        let target = inner
            .versions
            .get(id)
            .ok_or_else(|| LifecycleError::VersionNotFound(id.to_string()))?;
        let family = target.family;
        let from = target.status;

        if from == VersionStatus::Active {
            return Ok(()); // already serving
        }
        if !from.can_transition_to(VersionStatus::Active) {
            return Err(LifecycleError::InvalidTransition {
                id: id.to_string(),
                from,
                to: VersionStatus::Active,
            });
        }

        // Demote the incumbent first; both writes happen under the one lock.
        let incumbent = inner.serving.get(&family).map(|v| v.id.clone());
        if let Some(prev_id) = incumbent {
            if prev_id != id {
                let prev = inner
                    .versions
                    .get_mut(&prev_id)
                    .ok_or_else(|| LifecycleError::VersionNotFound(prev_id.clone()))?;
                let prev_from = prev.status;
                prev.status = VersionStatus::Archived;
                inner.record_transition(
                    &prev_id,
                    family,
                    prev_from,
                    VersionStatus::Archived,
                    Some(format!("superseded by {id}")),
                );
            }
        }

        let target = inner
            .versions
            .get_mut(id)
            .ok_or_else(|| LifecycleError::VersionNotFound(id.to_string()))?;
        target.status = VersionStatus::Active;
        target.promoted_at = Some(Utc::now());
        let snapshot = Arc::new(target.clone());
        inner.serving.insert(family, snapshot);
        inner.record_transition(id, family, from, VersionStatus::Active, None);

        info!(version = id, family = family.as_str(), "promoted model version");
        Ok(())
    }

    /// Retire a non-serving version
    pub fn archive(&self, id: &str) -> Result<()> {
        let mut inner = self.write();
        let version = inner
            .versions
            .get_mut(id)
            .ok_or_else(|| LifecycleError::VersionNotFound(id.to_string()))?;
        let from = version.status;
        if from.is_serving() || !from.can_transition_to(VersionStatus::Archived) {
            // The serving version must be replaced via promote, not archived
            return Err(LifecycleError::InvalidTransition {
                id: id.to_string(),
                from,
                to: VersionStatus::Archived,
            });
        }
        if from == VersionStatus::Archived {
            return Ok(());
        }
        version.status = VersionStatus::Archived;
        let family = version.family;
        inner.record_transition(id, family, from, VersionStatus::Archived, None);
        Ok(())
    }

    /// Flag the serving version as degraded; it keeps serving
    pub fn mark_degraded(&self, id: &str, reason: &str) -> Result<()> {
        self.set_degraded_flag(id, true, Some(reason.to_string()))
    }

    /// Clear the degraded flag on the serving version
    pub fn clear_degraded(&self, id: &str) -> Result<()> {
        self.set_degraded_flag(id, false, None)
    }

    fn set_degraded_flag(&self, id: &str, degraded: bool, reason: Option<String>) -> Result<()> {
        let to = if degraded {
            VersionStatus::Degraded
        } else {
            VersionStatus::Active
        };
        let mut inner = self.write();
        let version = inner
            .versions
            .get_mut(id)
            .ok_or_else(|| LifecycleError::VersionNotFound(id.to_string()))?;
        let from = version.status;
        if from == to {
            return Ok(());
        }
        if !from.can_transition_to(to) {
            return Err(LifecycleError::InvalidTransition {
                id: id.to_string(),
                from,
                to,
            });
        }
        version.status = to;
        let family = version.family;
        let snapshot = Arc::new(version.clone());
        inner.serving.insert(family, snapshot);
        inner.record_transition(id, family, from, to, reason);
        Ok(())
    }

    /// The version currently consulted by the serving path, if any
    pub fn get_active(&self, family: ModelFamily) -> Option<Arc<ModelVersion>> {
        self.read().serving.get(&family).cloned()
    }

    /// Fetch a version by id
    pub fn get(&self, id: &str) -> Result<ModelVersion> {
        self.read()
            .versions
            .get(id)
            .cloned()
            .ok_or_else(|| LifecycleError::VersionNotFound(id.to_string()))
    }

    /// All versions of a family in registration order
    pub fn list_versions(&self, family: ModelFamily) -> Vec<ModelVersion> {
        let inner = self.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.versions.get(id))
            .filter(|v| v.family == family)
            .cloned()
            .collect()
    }

    /// Read-only metric diff between two versions
    pub fn compare(&self, id_a: &str, id_b: &str) -> Result<VersionComparison> {
        let a = self.get(id_a)?;
        let b = self.get(id_b)?;

        let mut metrics = std::collections::BTreeMap::new();
        let mut diffs = std::collections::BTreeMap::new();
        let names: std::collections::BTreeSet<&String> =
            a.metrics.keys().chain(b.metrics.keys()).collect();
        for name in names {
            let va = a.metrics.get(name).copied();
            let vb = b.metrics.get(name).copied();
            if let (Some(va), Some(vb)) = (va, vb) {
                diffs.insert(name.clone(), vb - va);
            }
            metrics.insert(name.clone(), (va, vb));
        }

        Ok(VersionComparison {
            id_a: a.id,
            id_b: b.id,
            metrics,
            diffs,
        })
    }

    /// Append-only status-change audit trail
    pub fn transition_history(&self) -> Vec<StatusTransition> {
        self.read().transitions.clone()
    }

    /// Number of serving (active or degraded) versions for a family.
    /// Always 0 or 1.
    pub fn serving_count(&self, family: ModelFamily) -> usize {
        self.read()
            .versions
            .values()
            .filter(|v| v.family == family && v.status.is_serving())
            .count()
    }
}
