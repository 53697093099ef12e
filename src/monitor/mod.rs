//! Performance Monitor (MLOPS-022)
//!
//! Records prediction/outcome pairs for the serving model in a bounded FIFO
//! buffer and flags degradation against a configurable accuracy threshold.
//! Write and read paths share one mutex so readers always see a consistent
//! buffer, never a half-evicted one.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, Result};

#[cfg(test)]
mod tests;

/// Monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Rolling buffer capacity
    pub window_size: usize,
    /// Minimum observations before metrics are defined; guards against
    /// flagging degradation on a statistically insignificant sample
    pub min_samples: usize,
    /// Degraded when rolling accuracy is strictly below this value.
    /// Accuracy exactly equal to the threshold is not degraded.
    pub accuracy_threshold: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_size: 50,
            min_samples: 20,
            accuracy_threshold: 0.55,
        }
    }
}

/// One prediction/outcome pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Predicted value
    pub predicted: f64,
    /// Realized value
    pub actual: f64,
    /// Model-stated confidence in [0, 1]
    pub confidence: f64,
    /// Whether the prediction counted as correct
    pub correct: bool,
    /// When the outcome was recorded
    pub at: DateTime<Utc>,
}

/// Rolling accuracy-family metrics over the current buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingMetrics {
    pub count: usize,
    pub correct: usize,
    /// correct / count, exact
    pub accuracy: f64,
    pub mean_confidence: f64,
}

/// Degradation verdict with a human-readable reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradationStatus {
    pub degraded: bool,
    pub reason: String,
    /// Observed rolling accuracy, if the buffer was large enough
    pub accuracy: Option<f64>,
}

/// Closed, immutable summary of one rolling window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceWindow {
    /// Configured window capacity
    pub window_size: usize,
    pub count: usize,
    pub correct: usize,
    pub accuracy: f64,
    pub mean_confidence: f64,
    /// First observation in the window
    pub started_at: DateTime<Utc>,
    /// Last observation in the window
    pub ended_at: DateTime<Utc>,
    /// Open metric map (precision/recall/...)
    pub metrics: BTreeMap<String, f64>,
}

/// Accuracy observed within one confidence bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBucket {
    /// Inclusive lower bound of the bucket, e.g. 0.6 for [0.6, 0.7)
    pub lower: f64,
    pub count: usize,
    pub correct: usize,
    pub observed_accuracy: f64,
}

/// Rolling performance monitor for one model family's serving path
///
/// `record_outcome` is called from the prediction context; the buffer
/// mutation is a short critical section behind one mutex.
#[derive(Debug)]
pub struct PerformanceMonitor {
    config: MonitorConfig,
    buffer: Mutex<VecDeque<Observation>>,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let capacity = config.window_size;
        Self {
            config,
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Observation>> {
        // A poisoned lock means a panic mid-push; the buffer itself is still
        // structurally valid, so recover rather than propagate.
        self.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append one observation; evicts the oldest entry once at capacity
    pub fn record_outcome(&self, predicted: f64, actual: f64, confidence: f64, correct: bool) {
        let obs = Observation {
            predicted,
            actual,
            confidence: confidence.clamp(0.0, 1.0),
            correct,
            at: Utc::now(),
        };
        let mut buf = self.lock();
        if buf.len() >= self.config.window_size {
            buf.pop_front();
        }
        buf.push_back(obs);
    }

    /// Number of buffered observations
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Rolling metrics over the current buffer
    ///
    /// Signals [`LifecycleError::InsufficientData`] rather than computing a
    /// value when fewer than `min_samples` observations are buffered.
    pub fn rolling_metrics(&self) -> Result<RollingMetrics> {
        let buf = self.lock();
        if buf.len() < self.config.min_samples {
            return Err(LifecycleError::InsufficientData {
                have: buf.len(),
                need: self.config.min_samples,
            });
        }
        Ok(Self::metrics_of(&buf))
    }

    fn metrics_of(buf: &VecDeque<Observation>) -> RollingMetrics {
        let count = buf.len();
        let correct = buf.iter().filter(|o| o.correct).count();
        let confidence_sum: f64 = buf.iter().map(|o| o.confidence).sum();
        RollingMetrics {
            count,
            correct,
            accuracy: correct as f64 / count as f64,
            mean_confidence: confidence_sum / count as f64,
        }
    }

    /// Check whether the serving model has degraded
    ///
    /// Degraded iff the buffer holds at least `min_samples` observations AND
    /// rolling accuracy is strictly below `accuracy_threshold`.
    pub fn detect_degradation(&self) -> DegradationStatus {
        let buf = self.lock();
        if buf.len() < self.config.min_samples {
            return DegradationStatus {
                degraded: false,
                reason: format!(
                    "insufficient sample: {} of {} required observations",
                    buf.len(),
                    self.config.min_samples
                ),
                accuracy: None,
            };
        }
        let metrics = Self::metrics_of(&buf);
        if metrics.accuracy < self.config.accuracy_threshold {
            DegradationStatus {
                degraded: true,
                reason: format!(
                    "rolling accuracy {:.4} below threshold {:.4} over {} predictions",
                    metrics.accuracy, self.config.accuracy_threshold, metrics.count
                ),
                accuracy: Some(metrics.accuracy),
            }
        } else {
            DegradationStatus {
                degraded: false,
                reason: format!(
                    "rolling accuracy {:.4} at or above threshold {:.4}",
                    metrics.accuracy, self.config.accuracy_threshold
                ),
                accuracy: Some(metrics.accuracy),
            }
        }
    }

    /// Bucket predictions by stated confidence and report observed accuracy
    /// per bucket. Used for threshold tuning, not for triggering retraining.
    pub fn confidence_calibration(&self) -> Vec<CalibrationBucket> {
        let buf = self.lock();
        let mut counts = [0usize; 10];
        let mut corrects = [0usize; 10];
        for obs in buf.iter() {
            let idx = ((obs.confidence * 10.0) as usize).min(9);
            counts[idx] += 1;
            if obs.correct {
                corrects[idx] += 1;
            }
        }
        (0..10)
            .filter(|&i| counts[i] > 0)
            .map(|i| CalibrationBucket {
                lower: i as f64 / 10.0,
                count: counts[i],
                correct: corrects[i],
                observed_accuracy: corrects[i] as f64 / counts[i] as f64,
            })
            .collect()
    }

    /// Close the current buffer into an immutable window summary
    pub fn snapshot(&self) -> Result<PerformanceWindow> {
        let buf = self.lock();
        if buf.len() < self.config.min_samples {
            return Err(LifecycleError::InsufficientData {
                have: buf.len(),
                need: self.config.min_samples,
            });
        }
        let metrics = Self::metrics_of(&buf);
        let started_at = buf.front().map(|o| o.at).unwrap_or_else(Utc::now);
        let ended_at = buf.back().map(|o| o.at).unwrap_or_else(Utc::now);

        let mut open_metrics = BTreeMap::new();
        // Precision/recall treating predicted >= actual-direction as positive
        // class "correct on positive prediction"
        let positives = buf.iter().filter(|o| o.predicted > 0.0).count();
        let true_positives = buf
            .iter()
            .filter(|o| o.predicted > 0.0 && o.correct)
            .count();
        let actual_positives = buf.iter().filter(|o| o.actual > 0.0).count();
        if positives > 0 {
            open_metrics.insert(
                "precision".to_string(),
                true_positives as f64 / positives as f64,
            );
        }
        if actual_positives > 0 {
            open_metrics.insert(
                "recall".to_string(),
                true_positives as f64 / actual_positives as f64,
            );
        }

        Ok(PerformanceWindow {
            window_size: self.config.window_size,
            count: metrics.count,
            correct: metrics.correct,
            accuracy: metrics.accuracy,
            mean_confidence: metrics.mean_confidence,
            started_at,
            ended_at,
            metrics: open_metrics,
        })
    }

    /// Clear the buffer. Invoked once per promotion so metrics never straddle
    /// two model versions. Idempotent.
    pub fn reset(&self) {
        self.lock().clear();
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}
