use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use tempfile::tempdir;

use super::*;
use crate::monitor::PerformanceWindow;
use crate::provider::{ModelFamily, ParamValue};
use crate::registry::ModelVersion;
use crate::retrain::{RetrainingLog, RetrainingTrigger, TriggerKind};
use crate::search::{ExperimentStatus, TrainingExperiment};

fn sample_version(id: &str) -> ModelVersion {
    ModelVersion::new(id, ModelFamily::Lstm, "file:///tmp/model.bin")
        .with_params(
            [("epochs".to_string(), ParamValue::Int(30))]
                .into_iter()
                .collect(),
        )
        .with_metric("accuracy", 0.61)
        .with_fingerprint("abc123")
}

fn sample_experiment(id: &str) -> TrainingExperiment {
    TrainingExperiment {
        id: id.to_string(),
        family: ModelFamily::Lstm,
        params: BTreeMap::new(),
        metric: "accuracy".to_string(),
        fold_scores: vec![0.6, 0.62, 0.58],
        cv_mean: 0.6,
        cv_std: 0.02,
        train_duration: Duration::from_millis(120),
        test_metrics: BTreeMap::new(),
        feature_importance: BTreeMap::new(),
        created_at: Utc::now(),
        notes: String::new(),
        status: ExperimentStatus::Completed,
    }
}

fn sample_log(reason: &str) -> RetrainingLog {
    RetrainingLog {
        trigger: RetrainingTrigger {
            kind: TriggerKind::TimeBased,
            threshold: Some(604800.0),
            observed: Some(700000.0),
            at: Utc::now(),
            reason: reason.to_string(),
        },
        previous_active: Some("lstm-v1".to_string()),
        candidate: Some("lstm-v2".to_string()),
        success: true,
        promoted: false,
        duration: Duration::from_secs(3),
        at: Utc::now(),
        metadata: BTreeMap::new(),
    }
}

fn sample_window(count: usize) -> PerformanceWindow {
    PerformanceWindow {
        window_size: 50,
        count,
        correct: count / 2,
        accuracy: 0.5,
        mean_confidence: 0.7,
        started_at: Utc::now(),
        ended_at: Utc::now(),
        metrics: BTreeMap::new(),
    }
}

// -------------------------------------------------------------------------
// InMemoryStore
// -------------------------------------------------------------------------

#[test]
fn test_in_memory_version_upsert() {
    let mut store = InMemoryStore::new();
    store.save_version(&sample_version("lstm-v1")).unwrap();

    // Same id again replaces, not duplicates
    let mut updated = sample_version("lstm-v1");
    updated.metrics.insert("accuracy".to_string(), 0.7);
    store.save_version(&updated).unwrap();

    let versions = store.load_versions().unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].metrics.get("accuracy"), Some(&0.7));
}

#[test]
fn test_in_memory_logs_append_in_order() {
    let mut store = InMemoryStore::new();
    store.append_log(&sample_log("first")).unwrap();
    store.append_log(&sample_log("second")).unwrap();

    let logs = store.load_logs().unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].trigger.reason, "first");
    assert_eq!(logs[1].trigger.reason, "second");
}

#[test]
fn test_in_memory_windows_keyed_by_family() {
    let mut store = InMemoryStore::new();
    store.save_window(ModelFamily::Lstm, &sample_window(50)).unwrap();
    store.save_window(ModelFamily::Linear, &sample_window(20)).unwrap();

    assert_eq!(store.load_windows(ModelFamily::Lstm).unwrap().len(), 1);
    assert_eq!(store.load_windows(ModelFamily::Linear).unwrap().len(), 1);
    assert!(store.load_windows(ModelFamily::RandomForest).unwrap().is_empty());
}

// -------------------------------------------------------------------------
// JsonFileStore
// -------------------------------------------------------------------------

#[test]
fn test_json_store_version_round_trip() {
    let dir = tempdir().unwrap();
    let mut store = JsonFileStore::new(dir.path());

    let version = sample_version("lstm-v1");
    store.save_version(&version).unwrap();

    assert!(dir.path().join("versions/lstm-v1.json").exists());

    let loaded = store.load_versions().unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id, version.id);
    assert_eq!(loaded[0].family, version.family);
    assert_eq!(loaded[0].params, version.params);
    assert_eq!(loaded[0].dataset_fingerprint, version.dataset_fingerprint);
}

#[test]
fn test_json_store_experiment_round_trip() {
    let dir = tempdir().unwrap();
    let mut store = JsonFileStore::new(dir.path());

    store.save_experiment(&sample_experiment("exp-1")).unwrap();
    store.save_experiment(&sample_experiment("exp-2")).unwrap();

    let loaded = store.load_experiments().unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].fold_scores, vec![0.6, 0.62, 0.58]);
    assert_eq!(loaded[0].status, ExperimentStatus::Completed);
}

#[test]
fn test_json_store_logs_preserve_append_order() {
    let dir = tempdir().unwrap();
    let mut store = JsonFileStore::new(dir.path());

    for i in 0..12 {
        store.append_log(&sample_log(&format!("entry {i}"))).unwrap();
    }

    // Zero-padded sequence names keep lexicographic order = append order
    let logs = store.load_logs().unwrap();
    assert_eq!(logs.len(), 12);
    for (i, log) in logs.iter().enumerate() {
        assert_eq!(log.trigger.reason, format!("entry {i}"));
    }
}

#[test]
fn test_json_store_windows_partitioned_by_family() {
    let dir = tempdir().unwrap();
    let mut store = JsonFileStore::new(dir.path());

    store.save_window(ModelFamily::Lstm, &sample_window(50)).unwrap();
    store.save_window(ModelFamily::Lstm, &sample_window(30)).unwrap();
    store.save_window(ModelFamily::RandomForest, &sample_window(20)).unwrap();

    let lstm = store.load_windows(ModelFamily::Lstm).unwrap();
    assert_eq!(lstm.len(), 2);
    assert_eq!(lstm[0].count, 50);
    assert_eq!(lstm[1].count, 30);
    assert_eq!(store.load_windows(ModelFamily::RandomForest).unwrap().len(), 1);
}

#[test]
fn test_json_store_empty_load_is_empty_not_error() {
    let dir = tempdir().unwrap();
    let store = JsonFileStore::new(dir.path().join("never-written"));

    assert!(store.load_versions().unwrap().is_empty());
    assert!(store.load_experiments().unwrap().is_empty());
    assert!(store.load_logs().unwrap().is_empty());
    assert!(store.load_windows(ModelFamily::Lstm).unwrap().is_empty());
}

#[test]
fn test_json_store_corrupt_file_surfaces_json_error() {
    let dir = tempdir().unwrap();
    let mut store = JsonFileStore::new(dir.path());
    store.save_version(&sample_version("lstm-v1")).unwrap();

    std::fs::write(dir.path().join("versions/broken.json"), "{ not json").unwrap();

    assert!(matches!(
        store.load_versions(),
        Err(crate::error::LifecycleError::Json(_))
    ));
}

#[test]
fn test_json_store_window_sequences_independent_per_family() {
    let dir = tempdir().unwrap();
    {
        let mut store = JsonFileStore::new(dir.path());
        store.save_window(ModelFamily::Lstm, &sample_window(50)).unwrap();
        store.save_window(ModelFamily::Lstm, &sample_window(40)).unwrap();
    }
    let mut store = JsonFileStore::new(dir.path());
    // A family with no history starts at 1 regardless of the others
    store.save_window(ModelFamily::RandomForest, &sample_window(20)).unwrap();
    store.save_window(ModelFamily::Lstm, &sample_window(30)).unwrap();

    assert!(dir.path().join("windows/random_forest/00000001.json").exists());
    assert!(dir.path().join("windows/lstm/00000003.json").exists());
    assert_eq!(store.load_windows(ModelFamily::Lstm).unwrap().len(), 3);
    assert_eq!(store.load_windows(ModelFamily::RandomForest).unwrap().len(), 1);
}

#[test]
fn test_json_store_reopen_resumes_sequences() {
    let dir = tempdir().unwrap();
    {
        let mut store = JsonFileStore::new(dir.path());
        store.append_log(&sample_log("from first handle")).unwrap();
        store.save_window(ModelFamily::Lstm, &sample_window(50)).unwrap();
    }
    let mut store = JsonFileStore::new(dir.path());
    store.append_log(&sample_log("from second handle")).unwrap();
    store.save_window(ModelFamily::Lstm, &sample_window(30)).unwrap();

    let logs = store.load_logs().unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].trigger.reason, "from first handle");
    assert_eq!(logs[1].trigger.reason, "from second handle");
    assert_eq!(store.load_windows(ModelFamily::Lstm).unwrap().len(), 2);
}
