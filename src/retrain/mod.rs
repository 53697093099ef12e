//! Retraining Manager (MLOPS-025)
//!
//! Root orchestrator: polls the monitor for degradation, drives the search
//! engine and training collaborator to produce a candidate, registers it,
//! and promotes or archives it against the serving version. The search and
//! training phase is long-running and runs off the serving path; the only
//! synchronization point shared with serving is the registry's promote swap.
//!
//! Failure containment: a collaborator failure aborts only its own cycle.
//! The active model keeps serving, and the attempt is still logged.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{LifecycleError, Result};
use crate::monitor::PerformanceMonitor;
use crate::provider::{DataProvider, ModelFamily, ModelTrainer};
use crate::registry::{ModelRegistry, ModelVersion};
use crate::search::{SearchConfig, SearchEngine, SearchSpace};
use crate::store::LifecycleStore;


/// What authorized a retraining cycle, in priority order: when several are
/// true at once, the earliest listed kind drives the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TriggerKind {
    /// Monitor reports rolling accuracy below threshold
    AccuracyDrop,
    /// Too long since the last successful retraining
    TimeBased,
    /// Current training data fingerprint differs from the active version's
    DataDrift,
    /// Explicit external request
    Manual,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::AccuracyDrop => "accuracy_drop",
            TriggerKind::TimeBased => "time_based",
            TriggerKind::DataDrift => "data_drift",
            TriggerKind::Manual => "manual",
        }
    }
}

/// One trigger evaluation result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrainingTrigger {
    pub kind: TriggerKind,
    /// Configured threshold, where the trigger is numeric
    pub threshold: Option<f64>,
    /// Observed value, where the trigger is numeric
    pub observed: Option<f64>,
    pub at: DateTime<Utc>,
    pub reason: String,
}

/// Append-only audit record of one retraining attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrainingLog {
    pub trigger: RetrainingTrigger,
    /// Serving version before the cycle, if any
    pub previous_active: Option<String>,
    /// Registered candidate; None when training failed before registration
    pub candidate: Option<String>,
    /// Whether the attempt ran to a promote/archive decision
    pub success: bool,
    /// Whether the candidate became the serving version
    pub promoted: bool,
    pub duration: Duration,
    pub at: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
}

/// Cycle phase; at most one cycle per family is past `Idle` at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CyclePhase {
    Idle,
    Evaluating,
    Training,
    Comparing,
    Promoting,
    Discarding,
}

/// Result of one `execute_retraining` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Candidate beat the active version by at least the margin
    Promoted { candidate: String },
    /// Candidate was evaluated and archived; active untouched
    Discarded { candidate: String },
    /// Training or search failed; active untouched
    Failed { reason: String },
    /// Cycle could not run now (busy, or data unavailable); retry later
    Deferred { reason: String },
}

/// Retraining policy and wiring for one model family
#[derive(Debug, Clone)]
pub struct RetrainConfig {
    pub family: ModelFamily,
    /// Metric used for the promote/archive decision
    pub decision_metric: String,
    /// Candidate must improve on the active version's score by at least
    /// this much. 0.01 by default: a positive margin avoids promoting on
    /// noise. At 0.0 any strict improvement promotes; a tie never does.
    pub promotion_margin: f64,
    /// Time-based trigger fires when this much time has passed since the
    /// last successful retraining
    pub retrain_interval: Duration,
    /// Trailing window of data requested from the provider
    pub lookback_days: u32,
    pub search: SearchConfig,
    pub space: SearchSpace,
}

impl RetrainConfig {
    pub fn new(family: ModelFamily, space: SearchSpace) -> Self {
        Self {
            family,
            decision_metric: "accuracy".to_string(),
            promotion_margin: 0.01,
            retrain_interval: Duration::from_secs(7 * 24 * 3600),
            lookback_days: 90,
            search: SearchConfig::default(),
            space,
        }
    }
}

#[derive(Debug)]
struct ManagerState {
    phase: CyclePhase,
    last_success: Option<DateTime<Utc>>,
    manual_request: Option<String>,
    deferred: Vec<RetrainingTrigger>,
    logs: Vec<RetrainingLog>,
    next_version: u64,
}

/// Orchestrates evaluation, retraining, and promotion for one model family
///
/// The manager is the only component that calls the registry's promote and
/// archive operations. Shared behind an `Arc`, it can run its cycle on a
/// worker thread while the serving path keeps reading the active version.
pub struct RetrainingManager {
    config: RetrainConfig,
    registry: ModelRegistry,
    monitor: Arc<PerformanceMonitor>,
    trainer: Arc<dyn ModelTrainer>,
    data: Arc<dyn DataProvider>,
    engine: Mutex<SearchEngine>,
    store: Mutex<Box<dyn LifecycleStore>>,
    state: Mutex<ManagerState>,
    started_at: DateTime<Utc>,
}

impl RetrainingManager {
    pub fn new(
        config: RetrainConfig,
        registry: ModelRegistry,
        monitor: Arc<PerformanceMonitor>,
        trainer: Arc<dyn ModelTrainer>,
        data: Arc<dyn DataProvider>,
        store: Box<dyn LifecycleStore>,
    ) -> Self {
        Self {
            config,
            registry,
            monitor,
            trainer,
            data,
            engine: Mutex::new(SearchEngine::new()),
            store: Mutex::new(store),
            state: Mutex::new(ManagerState {
                phase: CyclePhase::Idle,
                last_success: None,
                manual_request: None,
                deferred: Vec::new(),
                logs: Vec::new(),
                next_version: 0,
            }),
            started_at: Utc::now(),
        }
    }

    pub fn config(&self) -> &RetrainConfig {
        &self.config
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: CyclePhase) {
        self.state().phase = phase;
    }

    /// Current cycle phase
    pub fn phase(&self) -> CyclePhase {
        self.state().phase
    }

    /// Arm the manual trigger
    pub fn request_manual(&self, reason: &str) {
        self.state().manual_request = Some(reason.to_string());
    }

    /// Triggers that arrived while a cycle was in progress
    pub fn deferred_triggers(&self) -> Vec<RetrainingTrigger> {
        self.state().deferred.clone()
    }

    /// Append-only log of every retraining attempt
    pub fn history(&self) -> Vec<RetrainingLog> {
        self.state().logs.clone()
    }

    /// Timestamp of the last cycle that ran to a decision
    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.state().last_success
    }

    /// Evaluate all trigger conditions; first satisfied kind (in priority
    /// order) wins. Lower-priority triggers that were also true are logged
    /// but do not drive the cycle.
    pub fn check_triggers(&self) -> Option<RetrainingTrigger> {
        let now = Utc::now();
        let mut satisfied: Vec<RetrainingTrigger> = Vec::new();

        // (a) accuracy drop
        let degradation = self.monitor.detect_degradation();
        if degradation.degraded {
            if let Some(active) = self.registry.get_active(self.config.family) {
                if let Err(err) = self.registry.mark_degraded(&active.id, &degradation.reason) {
                    warn!(version = %active.id, error = %err, "failed to flag degraded version");
                }
            }
            satisfied.push(RetrainingTrigger {
                kind: TriggerKind::AccuracyDrop,
                threshold: Some(self.monitor.config().accuracy_threshold),
                observed: degradation.accuracy,
                at: now,
                reason: degradation.reason,
            });
        }

        // (b) time since last successful retraining
        let reference = self.state().last_success.unwrap_or(self.started_at);
        let elapsed = (now - reference).to_std().unwrap_or_default();
        if elapsed > self.config.retrain_interval {
            satisfied.push(RetrainingTrigger {
                kind: TriggerKind::TimeBased,
                threshold: Some(self.config.retrain_interval.as_secs_f64()),
                observed: Some(elapsed.as_secs_f64()),
                at: now,
                reason: format!(
                    "{}s since last successful retraining exceeds interval {}s",
                    elapsed.as_secs(),
                    self.config.retrain_interval.as_secs()
                ),
            });
        }

        // (c) data drift against the active version's recorded fingerprint
        if let Some(active) = self.registry.get_active(self.config.family) {
            if !active.dataset_fingerprint.is_empty() {
                match self.data.fetch(self.config.lookback_days) {
                    Ok(data) if data.fingerprint != active.dataset_fingerprint => {
                        satisfied.push(RetrainingTrigger {
                            kind: TriggerKind::DataDrift,
                            threshold: None,
                            observed: None,
                            at: now,
                            reason: format!(
                                "training data fingerprint {} differs from active version's {}",
                                &data.fingerprint[..12.min(data.fingerprint.len())],
                                &active.dataset_fingerprint
                                    [..12.min(active.dataset_fingerprint.len())]
                            ),
                        });
                    }
                    Ok(_) => {}
                    Err(err) => debug!(error = %err, "drift check skipped, data unavailable"),
                }
            }
        }

        // (d) manual request
        let manual_armed = self.state().manual_request.is_some();
        if manual_armed {
            let reason = self
                .state()
                .manual_request
                .clone()
                .unwrap_or_else(|| "manual request".to_string());
            satisfied.push(RetrainingTrigger {
                kind: TriggerKind::Manual,
                threshold: None,
                observed: None,
                at: now,
                reason,
            });
        }

        if satisfied.is_empty() {
            return None;
        }
        satisfied.sort_by_key(|t| t.kind);
        for loser in &satisfied[1..] {
            debug!(kind = loser.kind.as_str(), "trigger also satisfied, deferred to higher priority");
        }
        let winner = satisfied.remove(0);
        if winner.kind == TriggerKind::Manual {
            self.state().manual_request = None;
        }
        Some(winner)
    }

    /// Convenience: evaluate triggers and run a cycle if one fired
    pub fn check_and_retrain(&self) -> Option<Result<CycleOutcome>> {
        self.check_triggers().map(|t| self.execute_retraining(t))
    }

    /// Run one full retraining cycle
    ///
    /// A trigger arriving while a cycle is in progress is recorded and
    /// deferred, never run concurrently and never surfaced as a fatal error.
    /// Every attempt that actually starts produces exactly one log entry.
    pub fn execute_retraining(&self, trigger: RetrainingTrigger) -> Result<CycleOutcome> {
        {
            let mut state = self.state();
            if state.phase != CyclePhase::Idle {
                warn!(
                    kind = trigger.kind.as_str(),
                    "retraining already in progress, trigger deferred"
                );
                state.deferred.push(trigger);
                return Ok(CycleOutcome::Deferred {
                    reason: LifecycleError::ConcurrentRetraining(
                        self.config.family.as_str().to_string(),
                    )
                    .to_string(),
                });
            }
            state.phase = CyclePhase::Evaluating;
        }

        let started = Instant::now();
        info!(
            kind = trigger.kind.as_str(),
            family = self.config.family.as_str(),
            "retraining cycle started"
        );
        let previous_active = self.registry.get_active(self.config.family).map(|v| v.id.clone());
        let outcome = self.run_cycle(&trigger, started);
        self.set_phase(CyclePhase::Idle);

        match &outcome {
            Ok(outcome) => {
                info!(family = self.config.family.as_str(), ?outcome, "retraining cycle finished");
            }
            // Every started cycle gets a log entry; run_cycle covers its own
            // contained failures, this arm covers the propagated ones.
            Err(err) => {
                warn!(error = %err, "retraining cycle aborted");
                self.append_log(
                    &trigger,
                    previous_active,
                    None,
                    false,
                    false,
                    started.elapsed(),
                    &[("outcome", "error"), ("error", &err.to_string())],
                );
            }
        }
        outcome
    }

    fn run_cycle(&self, trigger: &RetrainingTrigger, started: Instant) -> Result<CycleOutcome> {
        let previous_active = self.registry.get_active(self.config.family).map(|v| v.id.clone());

        // Fetch training data; unavailability defers the cycle.
        let data = match self.data.fetch(self.config.lookback_days) {
            Ok(data) => data,
            Err(err @ LifecycleError::DataUnavailable(_)) => {
                warn!(error = %err, "cycle deferred, training data unavailable");
                self.append_log(
                    trigger,
                    previous_active,
                    None,
                    false,
                    false,
                    started.elapsed(),
                    &[("outcome", "deferred"), ("error", &err.to_string())],
                );
                return Ok(CycleOutcome::Deferred {
                    reason: err.to_string(),
                });
            }
            Err(err) => return Err(err),
        };

        self.set_phase(CyclePhase::Training);

        // Hyperparameter sweep; individual trial failures are recorded on
        // their experiments and do not reach here.
        let (winning_params, sweep_len) = {
            let mut engine = self.engine.lock().unwrap_or_else(|e| e.into_inner());
            let ids = engine.run_sweep(
                self.config.family,
                &self.config.space,
                self.trainer.as_ref(),
                &data,
                &self.config.search,
            )?;
            {
                let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
                for id in &ids {
                    if let Some(experiment) = engine.get(id) {
                        store.save_experiment(experiment)?;
                    }
                }
            }
            let best = engine.best_experiment(self.config.family, &self.config.search.metric);
            match best {
                Some(best) => (best.params.clone(), ids.len()),
                None => {
                    let reason = "no completed experiment in sweep".to_string();
                    self.append_log(
                        trigger,
                        previous_active,
                        None,
                        false,
                        false,
                        started.elapsed(),
                        &[("outcome", "failed"), ("error", &reason)],
                    );
                    return Ok(CycleOutcome::Failed { reason });
                }
            }
        };
        debug!(trials = sweep_len, "sweep complete");

        // Final training with the winning hyperparameters.
        let fit = match self.trainer.fit(self.config.family, &winning_params, &data) {
            Ok(fit) => fit,
            Err(err @ LifecycleError::TrainingFailure(_)) => {
                warn!(error = %err, "final training failed, active version untouched");
                self.append_log(
                    trigger,
                    previous_active,
                    None,
                    false,
                    false,
                    started.elapsed(),
                    &[("outcome", "failed"), ("error", &err.to_string())],
                );
                return Ok(CycleOutcome::Failed {
                    reason: err.to_string(),
                });
            }
            Err(err) => return Err(err),
        };

        // Register the candidate. It stays in `training` status until the
        // comparison decides; a shutdown here leaves a pending candidate,
        // never a half-promoted one.
        let candidate_id = {
            let mut state = self.state();
            state.next_version += 1;
            format!("{}-v{}", self.config.family, state.next_version)
        };
        let mut candidate =
            ModelVersion::new(&candidate_id, self.config.family, &fit.artifact_uri)
                .with_params(winning_params)
                .with_fingerprint(&data.fingerprint)
                .with_metadata("trigger", trigger.kind.as_str());
        for (name, value) in &fit.metrics {
            candidate = candidate.with_metric(name, *value);
        }
        self.registry.register(candidate)?;
        self.persist_version(&candidate_id)?;

        self.set_phase(CyclePhase::Comparing);

        let metric = &self.config.decision_metric;
        let Some(candidate_score) = fit.metrics.get(metric).copied() else {
            let reason = format!("candidate reports no {metric} metric");
            self.registry.archive(&candidate_id)?;
            self.persist_version(&candidate_id)?;
            self.append_log(
                trigger,
                previous_active,
                Some(candidate_id.clone()),
                false,
                false,
                started.elapsed(),
                &[("outcome", "failed"), ("error", &reason)],
            );
            return Ok(CycleOutcome::Failed { reason });
        };

        let active_score = self
            .registry
            .get_active(self.config.family)
            .and_then(|active| active.metrics.get(metric).copied());

        let promote = match active_score {
            // First version for the family serves unconditionally
            None => true,
            Some(active_score) => {
                // Improvement of at least the margin; with margin 0.0 any
                // strict improvement promotes, a tie never does.
                let improvement = candidate_score - active_score;
                improvement > 0.0 && improvement >= self.config.promotion_margin
            }
        };

        if promote {
            self.set_phase(CyclePhase::Promoting);
            self.close_window()?;
            self.registry.promote(&candidate_id)?;
            self.monitor.reset();
            self.persist_version(&candidate_id)?;
            if let Some(prev) = &previous_active {
                self.persist_version(prev)?;
            }
            self.state().last_success = Some(Utc::now());
            self.append_log(
                trigger,
                previous_active,
                Some(candidate_id.clone()),
                true,
                true,
                started.elapsed(),
                &[
                    ("outcome", "promoted"),
                    ("candidate_score", &candidate_score.to_string()),
                    (
                        "active_score",
                        &active_score.map_or("none".to_string(), |s| s.to_string()),
                    ),
                ],
            );
            Ok(CycleOutcome::Promoted {
                candidate: candidate_id,
            })
        } else {
            self.set_phase(CyclePhase::Discarding);
            self.registry.archive(&candidate_id)?;
            self.persist_version(&candidate_id)?;
            self.state().last_success = Some(Utc::now());
            self.append_log(
                trigger,
                previous_active,
                Some(candidate_id.clone()),
                true,
                false,
                started.elapsed(),
                &[
                    ("outcome", "archived"),
                    ("candidate_score", &candidate_score.to_string()),
                    (
                        "active_score",
                        &active_score.map_or("none".to_string(), |s| s.to_string()),
                    ),
                ],
            );
            Ok(CycleOutcome::Discarded {
                candidate: candidate_id,
            })
        }
    }

    /// Promote a previously archived version back to active, bypassing the
    /// training pipeline entirely
    pub fn rollback(&self, target_id: &str) -> Result<()> {
        let target = self.registry.get(target_id)?;
        if target.family != self.config.family {
            return Err(LifecycleError::VersionNotFound(target_id.to_string()));
        }
        let previous_active = self.registry.get_active(self.config.family).map(|v| v.id.clone());

        self.registry.promote(target_id)?;
        self.monitor.reset();
        self.persist_version(target_id)?;
        if let Some(prev) = &previous_active {
            self.persist_version(prev)?;
        }
        info!(target = target_id, "rolled back to archived version");

        let trigger = RetrainingTrigger {
            kind: TriggerKind::Manual,
            threshold: None,
            observed: None,
            at: Utc::now(),
            reason: format!("rollback to {target_id}"),
        };
        self.append_log(
            &trigger,
            previous_active,
            Some(target_id.to_string()),
            true,
            true,
            Duration::ZERO,
            &[("outcome", "rollback")],
        );
        Ok(())
    }

    /// Run one cycle on a worker thread so the serving path is never blocked
    pub fn run_cycle_in_background(
        self: &Arc<Self>,
        trigger: RetrainingTrigger,
    ) -> std::thread::JoinHandle<Result<CycleOutcome>> {
        let manager = Arc::clone(self);
        std::thread::spawn(move || manager.execute_retraining(trigger))
    }

    fn close_window(&self) -> Result<()> {
        // The outgoing version's window is archived if it has enough data
        match self.monitor.snapshot() {
            Ok(window) => {
                let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
                store.save_window(self.config.family, &window)
            }
            Err(LifecycleError::InsufficientData { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn persist_version(&self, id: &str) -> Result<()> {
        let version = self.registry.get(id)?;
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        store.save_version(&version)
    }

    #[allow(clippy::too_many_arguments)]
    fn append_log(
        &self,
        trigger: &RetrainingTrigger,
        previous_active: Option<String>,
        candidate: Option<String>,
        success: bool,
        promoted: bool,
        duration: Duration,
        metadata: &[(&str, &str)],
    ) {
        let entry = RetrainingLog {
            trigger: trigger.clone(),
            previous_active,
            candidate,
            success,
            promoted,
            duration,
            at: Utc::now(),
            metadata: metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        if let Err(err) = self
            .store
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .append_log(&entry)
        {
            warn!(error = %err, "failed to persist retraining log entry");
        }
        self.state().logs.push(entry);
    }

    /// Shared registry handle (for the serving path)
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Experiment history for this family, in creation order
    pub fn experiments(&self) -> Vec<crate::search::TrainingExperiment> {
        self.engine
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .experiments_for(self.config.family)
            .into_iter()
            .cloned()
            .collect()
    }
}
