//! Lifecycle persistence backends
//!
//! Stores the four append-mostly record kinds (model versions, experiments,
//! retraining log entries, performance windows) behind a pluggable trait.
//! Single-process deployments use the JSON file backend; multi-process
//! deployments substitute a transactional store so the registry swap is
//! externalized.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::monitor::PerformanceWindow;
use crate::provider::ModelFamily;
use crate::registry::ModelVersion;
use crate::retrain::RetrainingLog;
use crate::search::TrainingExperiment;

#[cfg(test)]
mod tests;

/// Persistence seam for lifecycle records
pub trait LifecycleStore: Send + Sync {
    /// Upsert one model version record
    fn save_version(&mut self, version: &ModelVersion) -> Result<()>;

    /// Append one experiment record (experiments are immutable)
    fn save_experiment(&mut self, experiment: &TrainingExperiment) -> Result<()>;

    /// Append one retraining log entry
    fn append_log(&mut self, entry: &RetrainingLog) -> Result<()>;

    /// Append one closed performance window for a family
    fn save_window(&mut self, family: ModelFamily, window: &PerformanceWindow) -> Result<()>;

    fn load_versions(&self) -> Result<Vec<ModelVersion>>;
    fn load_experiments(&self) -> Result<Vec<TrainingExperiment>>;
    fn load_logs(&self) -> Result<Vec<RetrainingLog>>;
    fn load_windows(&self, family: ModelFamily) -> Result<Vec<PerformanceWindow>>;
}

/// In-memory store, for tests and ephemeral deployments
#[derive(Debug, Default)]
pub struct InMemoryStore {
    versions: HashMap<String, ModelVersion>,
    experiments: Vec<TrainingExperiment>,
    logs: Vec<RetrainingLog>,
    windows: HashMap<ModelFamily, Vec<PerformanceWindow>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LifecycleStore for InMemoryStore {
    fn save_version(&mut self, version: &ModelVersion) -> Result<()> {
        self.versions.insert(version.id.clone(), version.clone());
        Ok(())
    }

    fn save_experiment(&mut self, experiment: &TrainingExperiment) -> Result<()> {
        self.experiments.push(experiment.clone());
        Ok(())
    }

    fn append_log(&mut self, entry: &RetrainingLog) -> Result<()> {
        self.logs.push(entry.clone());
        Ok(())
    }

    fn save_window(&mut self, family: ModelFamily, window: &PerformanceWindow) -> Result<()> {
        self.windows.entry(family).or_default().push(window.clone());
        Ok(())
    }

    fn load_versions(&self) -> Result<Vec<ModelVersion>> {
        let mut versions: Vec<_> = self.versions.values().cloned().collect();
        versions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(versions)
    }

    fn load_experiments(&self) -> Result<Vec<TrainingExperiment>> {
        Ok(self.experiments.clone())
    }

    fn load_logs(&self) -> Result<Vec<RetrainingLog>> {
        Ok(self.logs.clone())
    }

    fn load_windows(&self, family: ModelFamily) -> Result<Vec<PerformanceWindow>> {
        Ok(self.windows.get(&family).cloned().unwrap_or_default())
    }
}

/// JSON file store: one file per record, grouped by record kind
///
/// Layout under the root directory:
/// `versions/{id}.json`, `experiments/{id}.json`,
/// `logs/{seq}.json`, `windows/{family}/{seq}.json`.
#[derive(Debug)]
pub struct JsonFileStore {
    root: PathBuf,
    log_seq: u64,
    /// Per-family window counters, lazily resumed from each family's
    /// directory on first append
    window_seq: HashMap<ModelFamily, u64>,
}

impl JsonFileStore {
    /// Open a store rooted at `root`, resuming sequence counters from any
    /// records already on disk
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let log_seq = Self::max_seq(&root.join("logs"));
        Self {
            root,
            log_seq,
            window_seq: HashMap::new(),
        }
    }

    fn max_seq(dir: &Path) -> u64 {
        fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| {
                        e.path()
                            .file_stem()
                            .and_then(|s| s.to_str())
                            .and_then(|s| s.parse().ok())
                    })
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    fn write_json<T: serde::Serialize>(&self, dir: &str, name: &str, value: &T) -> Result<()> {
        let dir = self.root.join(dir);
        fs::create_dir_all(&dir)?;
        let json = serde_json::to_string_pretty(value)?;
        fs::write(dir.join(format!("{name}.json")), json)?;
        Ok(())
    }

    fn read_dir<T: serde::de::DeserializeOwned>(&self, dir: &str) -> Result<Vec<T>> {
        let dir = self.root.join(dir);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        paths.sort();
        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            let json = fs::read_to_string(&path)?;
            records.push(serde_json::from_str(&json)?);
        }
        Ok(records)
    }
}

impl LifecycleStore for JsonFileStore {
    fn save_version(&mut self, version: &ModelVersion) -> Result<()> {
        self.write_json("versions", &version.id, version)
    }

    fn save_experiment(&mut self, experiment: &TrainingExperiment) -> Result<()> {
        self.write_json("experiments", &experiment.id, experiment)
    }

    fn append_log(&mut self, entry: &RetrainingLog) -> Result<()> {
        self.log_seq += 1;
        let name = format!("{:08}", self.log_seq);
        self.write_json("logs", &name, entry)
    }

    fn save_window(&mut self, family: ModelFamily, window: &PerformanceWindow) -> Result<()> {
        let dir = format!("windows/{family}");
        let family_dir = self.root.join(&dir);
        let seq = self
            .window_seq
            .entry(family)
            .or_insert_with(|| Self::max_seq(&family_dir));
        *seq += 1;
        let name = format!("{:08}", *seq);
        self.write_json(&dir, &name, window)
    }

    fn load_versions(&self) -> Result<Vec<ModelVersion>> {
        self.read_dir("versions")
    }

    fn load_experiments(&self) -> Result<Vec<TrainingExperiment>> {
        self.read_dir("experiments")
    }

    fn load_logs(&self) -> Result<Vec<RetrainingLog>> {
        self.read_dir("logs")
    }

    fn load_windows(&self, family: ModelFamily) -> Result<Vec<PerformanceWindow>> {
        self.read_dir(&format!("windows/{family}"))
    }
}
