//! Hyperparameter Search Engine (MLOPS-024)
//!
//! Sweeps a parameter space with grid, bounded random, or successive
//! (sequential model-based) search. Every trial is scored by k-fold
//! cross-validation through the training collaborator and recorded as one
//! immutable experiment; a failed trial is captured in its notes and never
//! aborts the sweep.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LifecycleError, Result};
use crate::provider::{params_key, ModelFamily, ModelTrainer, ParamSet, ParamValue, TrainingData};


/// Parameter search space: name -> candidate values
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchSpace {
    params: BTreeMap<String, Vec<ParamValue>>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dimension with its candidate values
    pub fn with(mut self, name: &str, values: Vec<ParamValue>) -> Self {
        self.params.insert(name.to_string(), values);
        self
    }

    /// Total number of combinations (cartesian product size)
    pub fn combinations(&self) -> usize {
        if self.params.is_empty() {
            return 0;
        }
        self.params.values().map(Vec::len).product()
    }

    /// Enumerate every combination in deterministic order
    pub fn enumerate(&self) -> Vec<ParamSet> {
        let mut combos = vec![ParamSet::new()];
        for (name, values) in &self.params {
            let mut next = Vec::with_capacity(combos.len() * values.len());
            for combo in &combos {
                for value in values {
                    let mut extended = combo.clone();
                    extended.insert(name.clone(), value.clone());
                    next.push(extended);
                }
            }
            combos = next;
        }
        if self.params.is_empty() {
            Vec::new()
        } else {
            combos
        }
    }

    /// Candidate values for one dimension
    pub fn candidates(&self, name: &str) -> Option<&[ParamValue]> {
        self.params.get(name).map(Vec::as_slice)
    }

    pub fn dimensions(&self) -> impl Iterator<Item = &String> {
        self.params.keys()
    }
}

/// How the space is explored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchStrategy {
    /// Evaluate every combination
    Grid,
    /// Evaluate `n_iter` combinations, sampled without replacement
    Random { n_iter: usize },
    /// `n_initial` random trials, then `n_refine` perturbations of the
    /// incumbent; fewer evaluations for comparable quality
    Successive { n_initial: usize, n_refine: usize },
}

/// Sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub strategy: SearchStrategy,
    /// Cross-validation folds per trial
    pub cv_folds: usize,
    /// Metric the fold scores measure
    pub metric: String,
    /// Seed for random/successive sampling; None draws from entropy
    pub seed: Option<u64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            strategy: SearchStrategy::Grid,
            cv_folds: 5,
            metric: "accuracy".to_string(),
            seed: None,
        }
    }
}

/// Trial outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperimentStatus {
    Completed,
    Failed,
}

/// One hyperparameter trial. Append-only: never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingExperiment {
    /// Monotonic identifier (`exp-N`)
    pub id: String,
    pub family: ModelFamily,
    pub params: ParamSet,
    /// Metric the fold scores measure
    pub metric: String,
    /// Per-fold cross-validation scores, in fold order
    pub fold_scores: Vec<f64>,
    /// Mean of the fold scores
    pub cv_mean: f64,
    /// Standard deviation of the fold scores (sample std-dev)
    pub cv_std: f64,
    /// Wall-clock time spent in the trial
    pub train_duration: Duration,
    /// Held-out test metrics, when a final fit was evaluated
    pub test_metrics: BTreeMap<String, f64>,
    pub feature_importance: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
    /// Free text; carries the failure reason for failed trials
    pub notes: String,
    pub status: ExperimentStatus,
}

impl TrainingExperiment {
    fn mean_std(scores: &[f64]) -> (f64, f64) {
        if scores.is_empty() {
            return (0.0, 0.0);
        }
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        if scores.len() < 2 {
            return (mean, 0.0);
        }
        let var = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>()
            / (scores.len() - 1) as f64;
        (mean, var.sqrt())
    }
}

/// Append-only experiment arena with monotonic ids
#[derive(Debug, Default)]
pub struct SearchEngine {
    experiments: Vec<TrainingExperiment>,
    next_id: u64,
}

impl SearchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_experiment_id(&mut self) -> String {
        self.next_id += 1;
        format!("exp-{}", self.next_id)
    }

    /// Run one sweep over `space`; returns ids of the experiments created
    ///
    /// Each trial is cross-validated with `config.cv_folds` folds through
    /// `trainer`. Trial failures become `Failed` experiments, not errors.
    pub fn run_sweep(
        &mut self,
        family: ModelFamily,
        space: &SearchSpace,
        trainer: &dyn ModelTrainer,
        data: &TrainingData,
        config: &SearchConfig,
    ) -> Result<Vec<String>> {
        if space.combinations() == 0 {
            return Err(LifecycleError::InsufficientData { have: 0, need: 1 });
        }
        if data.len() < config.cv_folds {
            return Err(LifecycleError::InsufficientData {
                have: data.len(),
                need: config.cv_folds,
            });
        }

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let ids = match &config.strategy {
            SearchStrategy::Grid => {
                let combos = space.enumerate();
                debug!(trials = combos.len(), family = family.as_str(), "grid sweep");
                self.run_trials(family, combos, trainer, data, config)
            }
            SearchStrategy::Random { n_iter } => {
                let mut combos = space.enumerate();
                combos.shuffle(&mut rng);
                combos.truncate(*n_iter);
                debug!(trials = combos.len(), family = family.as_str(), "random sweep");
                self.run_trials(family, combos, trainer, data, config)
            }
            SearchStrategy::Successive { n_initial, n_refine } => {
                self.run_successive(family, space, trainer, data, config, &mut rng, *n_initial, *n_refine)
            }
        };
        Ok(ids)
    }

    fn run_trials(
        &mut self,
        family: ModelFamily,
        combos: Vec<ParamSet>,
        trainer: &dyn ModelTrainer,
        data: &TrainingData,
        config: &SearchConfig,
    ) -> Vec<String> {
        combos
            .into_iter()
            .map(|params| self.run_trial(family, params, trainer, data, config))
            .collect()
    }

    fn run_trial(
        &mut self,
        family: ModelFamily,
        params: ParamSet,
        trainer: &dyn ModelTrainer,
        data: &TrainingData,
        config: &SearchConfig,
    ) -> String {
        let id = self.next_experiment_id();
        let started = Instant::now();

        let experiment = match trainer.cross_validate(family, &params, data, config.cv_folds) {
            Ok(fold_scores) => {
                let (cv_mean, cv_std) = TrainingExperiment::mean_std(&fold_scores);
                TrainingExperiment {
                    id: id.clone(),
                    family,
                    params,
                    metric: config.metric.clone(),
                    fold_scores,
                    cv_mean,
                    cv_std,
                    train_duration: started.elapsed(),
                    test_metrics: BTreeMap::new(),
                    feature_importance: BTreeMap::new(),
                    created_at: Utc::now(),
                    notes: String::new(),
                    status: ExperimentStatus::Completed,
                }
            }
            Err(err) => TrainingExperiment {
                id: id.clone(),
                family,
                metric: config.metric.clone(),
                fold_scores: Vec::new(),
                cv_mean: 0.0,
                cv_std: 0.0,
                train_duration: started.elapsed(),
                test_metrics: BTreeMap::new(),
                feature_importance: BTreeMap::new(),
                created_at: Utc::now(),
                notes: format!("trial failed: {err}"),
                status: ExperimentStatus::Failed,
                params,
            },
        };

        self.experiments.push(experiment);
        id
    }

    #[allow(clippy::too_many_arguments)]
    fn run_successive(
        &mut self,
        family: ModelFamily,
        space: &SearchSpace,
        trainer: &dyn ModelTrainer,
        data: &TrainingData,
        config: &SearchConfig,
        rng: &mut StdRng,
        n_initial: usize,
        n_refine: usize,
    ) -> Vec<String> {
        // Seeding phase: random sample without replacement
        let mut combos = space.enumerate();
        combos.shuffle(rng);
        let seeds: Vec<ParamSet> = combos.iter().take(n_initial.max(1)).cloned().collect();
        let mut tried: Vec<String> = seeds.iter().map(params_key).collect();
        let mut ids = self.run_trials(family, seeds, trainer, data, config);

        // Refinement phase: perturb one dimension of the incumbent at a time
        let dimensions: Vec<String> = space.dimensions().cloned().collect();
        for _ in 0..n_refine {
            let Some(best) = self.best_in(&ids) else { break };
            let mut candidate = best.params.clone();

            let dim = &dimensions[rng.gen_range(0..dimensions.len())];
            let Some(values) = space.candidates(dim) else { continue };
            candidate.insert(dim.clone(), values[rng.gen_range(0..values.len())].clone());

            let key = params_key(&candidate);
            if tried.contains(&key) {
                continue;
            }
            tried.push(key);
            ids.push(self.run_trial(family, candidate, trainer, data, config));
        }
        ids
    }

    fn best_in(&self, ids: &[String]) -> Option<&TrainingExperiment> {
        Self::rank(
            self.experiments
                .iter()
                .filter(|e| ids.contains(&e.id) && e.status == ExperimentStatus::Completed),
        )
    }

    /// Best completed experiment for `metric`, over the whole arena
    ///
    /// Optimal mean CV score; ties broken by lower standard deviation (a
    /// stable trial beats a lucky one), then by earliest creation.
    pub fn best_experiment(&self, family: ModelFamily, metric: &str) -> Option<&TrainingExperiment> {
        Self::rank(self.experiments.iter().filter(|e| {
            e.family == family && e.metric == metric && e.status == ExperimentStatus::Completed
        }))
    }

    fn rank<'a>(
        candidates: impl Iterator<Item = &'a TrainingExperiment>,
    ) -> Option<&'a TrainingExperiment> {
        candidates.fold(None, |best: Option<&TrainingExperiment>, e| match best {
            None => Some(e),
            Some(b) => {
                let better = e.cv_mean > b.cv_mean
                    || (e.cv_mean == b.cv_mean && e.cv_std < b.cv_std)
                    || (e.cv_mean == b.cv_mean
                        && e.cv_std == b.cv_std
                        && e.created_at < b.created_at);
                if better {
                    Some(e)
                } else {
                    Some(b)
                }
            }
        })
    }

    /// All experiments, in creation order
    pub fn experiments(&self) -> &[TrainingExperiment] {
        &self.experiments
    }

    /// Experiments for one family, in creation order
    pub fn experiments_for(&self, family: ModelFamily) -> Vec<&TrainingExperiment> {
        self.experiments.iter().filter(|e| e.family == family).collect()
    }

    /// Fetch one experiment by id
    pub fn get(&self, id: &str) -> Option<&TrainingExperiment> {
        self.experiments.iter().find(|e| e.id == id)
    }
}
