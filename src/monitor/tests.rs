use super::*;

fn record_n(monitor: &PerformanceMonitor, correct: usize, incorrect: usize) {
    for _ in 0..correct {
        monitor.record_outcome(1.0, 1.0, 0.8, true);
    }
    for _ in 0..incorrect {
        monitor.record_outcome(1.0, -1.0, 0.8, false);
    }
}

#[test]
fn test_empty_monitor() {
    let monitor = PerformanceMonitor::default();
    assert!(monitor.is_empty());
    assert!(monitor.rolling_metrics().is_err());
}

#[test]
fn test_rolling_metrics_below_minimum_signals() {
    let monitor = PerformanceMonitor::default();
    record_n(&monitor, 10, 9); // 19 < 20

    let err = monitor.rolling_metrics().unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::InsufficientData { have: 19, need: 20 }
    ));
}

#[test]
fn test_rolling_accuracy_exact() {
    let monitor = PerformanceMonitor::default();
    record_n(&monitor, 11, 9);

    let metrics = monitor.rolling_metrics().unwrap();
    assert_eq!(metrics.count, 20);
    assert_eq!(metrics.correct, 11);
    assert!((metrics.accuracy - 0.55).abs() < f64::EPSILON);
}

#[test]
fn test_fifo_eviction_at_capacity() {
    let config = MonitorConfig {
        window_size: 5,
        min_samples: 1,
        ..Default::default()
    };
    let monitor = PerformanceMonitor::new(config);

    // 3 incorrect then 5 correct: the incorrect ones are evicted
    record_n(&monitor, 0, 3);
    record_n(&monitor, 5, 0);

    assert_eq!(monitor.len(), 5);
    let metrics = monitor.rolling_metrics().unwrap();
    assert!((metrics.accuracy - 1.0).abs() < f64::EPSILON);
}

#[test]
fn test_degradation_at_threshold_is_not_degraded() {
    // Scenario: 11 correct / 9 incorrect with threshold 0.55.
    // Accuracy equals the threshold exactly; strict < means not degraded.
    let monitor = PerformanceMonitor::default();
    record_n(&monitor, 11, 9);

    let metrics = monitor.rolling_metrics().unwrap();
    assert!((metrics.accuracy - 0.55).abs() < f64::EPSILON);

    let status = monitor.detect_degradation();
    assert!(!status.degraded);
    assert_eq!(status.accuracy, Some(0.55));
}

#[test]
fn test_degradation_below_threshold() {
    let monitor = PerformanceMonitor::default();
    record_n(&monitor, 10, 10); // 0.50 < 0.55

    let status = monitor.detect_degradation();
    assert!(status.degraded);
    assert!(status.reason.contains("below threshold"));
}

#[test]
fn test_degradation_guarded_by_minimum_sample() {
    let monitor = PerformanceMonitor::default();
    record_n(&monitor, 0, 19); // accuracy 0.0 but only 19 samples

    let status = monitor.detect_degradation();
    assert!(!status.degraded);
    assert!(status.accuracy.is_none());
    assert!(status.reason.contains("insufficient sample"));
}

#[test]
fn test_reset_idempotent() {
    let monitor = PerformanceMonitor::default();
    record_n(&monitor, 15, 10);

    monitor.reset();
    assert!(monitor.is_empty());
    monitor.reset();
    assert!(monitor.is_empty());
    assert!(monitor.rolling_metrics().is_err());
}

#[test]
fn test_confidence_calibration_buckets() {
    let config = MonitorConfig {
        min_samples: 1,
        ..Default::default()
    };
    let monitor = PerformanceMonitor::new(config);

    // Two buckets: [0.6, 0.7) with 1/2 correct, [0.9, 1.0] with 1/1 correct
    monitor.record_outcome(1.0, 1.0, 0.62, true);
    monitor.record_outcome(1.0, -1.0, 0.65, false);
    monitor.record_outcome(1.0, 1.0, 0.95, true);

    let buckets = monitor.confidence_calibration();
    assert_eq!(buckets.len(), 2);
    assert!((buckets[0].lower - 0.6).abs() < f64::EPSILON);
    assert!((buckets[0].observed_accuracy - 0.5).abs() < f64::EPSILON);
    assert!((buckets[1].observed_accuracy - 1.0).abs() < f64::EPSILON);
}

#[test]
fn test_calibration_clamps_confidence() {
    let config = MonitorConfig {
        min_samples: 1,
        ..Default::default()
    };
    let monitor = PerformanceMonitor::new(config);
    monitor.record_outcome(1.0, 1.0, 1.7, true); // clamped to 1.0

    let buckets = monitor.confidence_calibration();
    assert_eq!(buckets.len(), 1);
    assert!((buckets[0].lower - 0.9).abs() < f64::EPSILON);
}

#[test]
fn test_snapshot_window() {
    let monitor = PerformanceMonitor::default();
    record_n(&monitor, 15, 5);

    let window = monitor.snapshot().unwrap();
    assert_eq!(window.window_size, 50);
    assert_eq!(window.count, 20);
    assert_eq!(window.correct, 15);
    assert!((window.accuracy - 0.75).abs() < f64::EPSILON);
    assert!(window.started_at <= window.ended_at);
    assert!(window.metrics.contains_key("precision"));
}

#[test]
fn test_snapshot_below_minimum_signals() {
    let monitor = PerformanceMonitor::default();
    record_n(&monitor, 3, 2);
    assert!(monitor.snapshot().is_err());
}

#[test]
fn test_concurrent_writers_and_readers() {
    use std::sync::Arc;
    use std::thread;

    let monitor = Arc::new(PerformanceMonitor::new(MonitorConfig {
        window_size: 50,
        min_samples: 1,
        accuracy_threshold: 0.55,
    }));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let m = Arc::clone(&monitor);
        handles.push(thread::spawn(move || {
            for i in 0..200 {
                m.record_outcome(1.0, 1.0, 0.5, i % 2 == 0);
            }
        }));
    }
    for _ in 0..2 {
        let m = Arc::clone(&monitor);
        handles.push(thread::spawn(move || {
            for _ in 0..200 {
                // Snapshot must always be internally consistent
                if let Ok(metrics) = m.rolling_metrics() {
                    assert!(metrics.correct <= metrics.count);
                    assert!(metrics.count <= 50);
                }
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(monitor.len(), 50);
}

mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_accuracy_is_exact_ratio(correct in 0usize..40, incorrect in 0usize..40) {
            let monitor = PerformanceMonitor::new(MonitorConfig {
                window_size: 100,
                min_samples: 1,
                accuracy_threshold: 0.55,
            });
            record_n(&monitor, correct, incorrect);

            let total = correct + incorrect;
            if total == 0 {
                prop_assert!(monitor.rolling_metrics().is_err());
            } else {
                let metrics = monitor.rolling_metrics().unwrap();
                prop_assert_eq!(metrics.correct, correct);
                prop_assert!((metrics.accuracy - correct as f64 / total as f64).abs() < 1e-12);
            }
        }

        #[test]
        fn prop_buffer_never_exceeds_window(n in 0usize..300, window in 1usize..60) {
            let monitor = PerformanceMonitor::new(MonitorConfig {
                window_size: window,
                min_samples: 1,
                accuracy_threshold: 0.55,
            });
            for i in 0..n {
                monitor.record_outcome(1.0, 1.0, 0.5, i % 3 == 0);
            }
            prop_assert!(monitor.len() <= window);
            prop_assert_eq!(monitor.len(), n.min(window));
        }

        #[test]
        fn prop_degradation_requires_min_samples(n in 0usize..19) {
            let monitor = PerformanceMonitor::default();
            record_n(&monitor, 0, n); // all wrong
            prop_assert!(!monitor.detect_degradation().degraded);
        }
    }
}
