//! Collaborator Interfaces (MLOPS-021)
//!
//! Seams to the components this core orchestrates but does not own: the
//! numeric training implementation and the historical data source. Model
//! family dispatch is a closed enum selected at registration time, never
//! runtime reflection.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;


/// A category of interchangeable model implementations sharing one
/// active/version lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelFamily {
    /// Recurrent sequence models
    Lstm,
    /// Tree ensembles
    RandomForest,
    /// Linear / logistic baselines
    Linear,
}

impl ModelFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::Lstm => "lstm",
            ModelFamily::RandomForest => "random_forest",
            ModelFamily::Linear => "linear",
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single hyperparameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
    Flag(bool),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(v) => write!(f, "{v}"),
            ParamValue::Flag(v) => write!(f, "{v}"),
        }
    }
}

/// Hyperparameters: name -> value
///
/// `BTreeMap` so iteration order (and thus grid enumeration and fingerprints)
/// is deterministic.
pub type ParamSet = BTreeMap<String, ParamValue>;

/// Render a parameter set as a stable `k=v` string, used in experiment notes
/// and log metadata.
pub fn params_key(params: &ParamSet) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// A labeled dataset handed over by the historical data provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingData {
    /// Feature rows
    pub features: Vec<Vec<f64>>,
    /// One label per row
    pub labels: Vec<f64>,
    /// Content fingerprint of the raw dataset (hex SHA-256)
    pub fingerprint: String,
}

impl TrainingData {
    /// Build a dataset, computing its fingerprint from the rows
    pub fn new(features: Vec<Vec<f64>>, labels: Vec<f64>) -> Self {
        let fingerprint = fingerprint_of(&features, &labels);
        Self {
            features,
            labels,
            fingerprint,
        }
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Hex SHA-256 over the little-endian bytes of every feature and label
pub fn fingerprint_of(features: &[Vec<f64>], labels: &[f64]) -> String {
    let mut hasher = Sha256::new();
    for row in features {
        for v in row {
            hasher.update(v.to_le_bytes());
        }
    }
    for v in labels {
        hasher.update(v.to_le_bytes());
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Result of fitting one model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitOutcome {
    /// Where the trained artifact was stored
    pub artifact_uri: String,
    /// Held-out test metrics reported by the trainer
    pub metrics: BTreeMap<String, f64>,
    /// Per-feature importance, if the family exposes it
    pub feature_importance: BTreeMap<String, f64>,
}

/// The raw model-fitting collaborator
///
/// Failures are reported as [`LifecycleError::TrainingFailure`] and are never
/// process-fatal: a trial failure lands in that experiment's notes, a
/// final-fit failure aborts only its cycle.
///
/// [`LifecycleError::TrainingFailure`]: crate::error::LifecycleError::TrainingFailure
pub trait ModelTrainer: Send + Sync {
    /// Train one model with the given hyperparameters
    fn fit(&self, family: ModelFamily, params: &ParamSet, data: &TrainingData) -> Result<FitOutcome>;

    /// k-fold cross-validation; returns one score per fold
    fn cross_validate(
        &self,
        family: ModelFamily,
        params: &ParamSet,
        data: &TrainingData,
        k: usize,
    ) -> Result<Vec<f64>>;
}

/// The historical data collaborator
///
/// Unavailability surfaces as the retryable
/// [`LifecycleError::DataUnavailable`], deferring the retraining cycle rather
/// than aborting it permanently.
///
/// [`LifecycleError::DataUnavailable`]: crate::error::LifecycleError::DataUnavailable
pub trait DataProvider: Send + Sync {
    /// Labeled dataset for the requested trailing number of days
    fn fetch(&self, lookback_days: u32) -> Result<TrainingData>;
}

/// Deterministic trainer for tests: scores are a pure function of the
/// hyperparameters, so sweeps and comparisons are reproducible.
#[derive(Debug, Clone, Default)]
pub struct StubTrainer {
    /// Added to every score; lets tests move candidates above/below the
    /// active version's recorded metric.
    pub score_offset: f64,
    /// Parameter sets (by `params_key`) that should fail to train
    pub failing: Vec<String>,
}

impl StubTrainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_offset(offset: f64) -> Self {
        Self {
            score_offset: offset,
            failing: Vec::new(),
        }
    }

    /// Mark a parameter set as failing
    pub fn fail_on(mut self, params: &ParamSet) -> Self {
        self.failing.push(params_key(params));
        self
    }

    fn base_score(params: &ParamSet) -> f64 {
        // Stable pseudo-score in [0, 0.3) derived from the params
        let key = params_key(params);
        let mut acc: u64 = 0;
        for b in key.bytes() {
            acc = acc.wrapping_mul(31).wrapping_add(u64::from(b));
        }
        (acc % 1000) as f64 / 3334.0
    }
}

impl ModelTrainer for StubTrainer {
    fn fit(&self, family: ModelFamily, params: &ParamSet, _data: &TrainingData) -> Result<FitOutcome> {
        let key = params_key(params);
        if self.failing.contains(&key) {
            return Err(crate::error::LifecycleError::TrainingFailure(format!(
                "stub trainer configured to fail for {key}"
            )));
        }
        let score = (0.5 + Self::base_score(params) + self.score_offset).min(1.0);
        let mut metrics = BTreeMap::new();
        metrics.insert("accuracy".to_string(), score);
        Ok(FitOutcome {
            artifact_uri: format!("stub://{family}/{key}"),
            metrics,
            feature_importance: BTreeMap::new(),
        })
    }

    fn cross_validate(
        &self,
        _family: ModelFamily,
        params: &ParamSet,
        _data: &TrainingData,
        k: usize,
    ) -> Result<Vec<f64>> {
        let key = params_key(params);
        if self.failing.contains(&key) {
            return Err(crate::error::LifecycleError::TrainingFailure(format!(
                "stub trainer configured to fail for {key}"
            )));
        }
        let base = (0.5 + Self::base_score(params) + self.score_offset).min(1.0);
        // Small deterministic spread across folds
        Ok((0..k).map(|i| base - 0.01 * (i % 3) as f64).collect())
    }
}

/// Fixed in-memory data provider for tests
#[derive(Debug, Clone)]
pub struct StaticDataProvider {
    data: TrainingData,
}

impl StaticDataProvider {
    pub fn new(data: TrainingData) -> Self {
        Self { data }
    }

    /// Synthetic linearly-labeled dataset of `rows` rows
    pub fn synthetic(rows: usize) -> Self {
        let features: Vec<Vec<f64>> = (0..rows)
            .map(|i| vec![i as f64, (i as f64) * 0.5])
            .collect();
        let labels: Vec<f64> = (0..rows).map(|i| (i % 2) as f64).collect();
        Self::new(TrainingData::new(features, labels))
    }
}

impl DataProvider for StaticDataProvider {
    fn fetch(&self, _lookback_days: u32) -> Result<TrainingData> {
        Ok(self.data.clone())
    }
}
