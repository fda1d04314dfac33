//! Z-score anomaly detection
//!
//! Compares a current observation to its series baseline and tags the
//! deviation with a severity from an ordered tier table.

use crate::models::{Anomaly, Baseline, Direction, MetricObservation, Severity};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use sha2::{Digest, Sha256};

/// Default minimum |z| for an observation to be anomalous
pub const DEFAULT_ZSCORE_THRESHOLD: f64 = 2.0;

/// Severity tiers, most severe first. The first tier whose bound is exceeded
/// wins; anything above the detector threshold but below every tier is low.
pub const SEVERITY_TIERS: [(f64, Severity); 3] = [
    (4.0, Severity::Critical),
    (3.0, Severity::High),
    (2.5, Severity::Medium),
];

/// Standard score of `value` against the baseline
///
/// A flat baseline (stddev == 0) yields 0: no deviation can be measured.
pub fn zscore(value: f64, baseline: &Baseline) -> f64 {
    if baseline.stddev <= 0.0 || !baseline.stddev.is_finite() {
        return 0.0;
    }
    (value - baseline.mean) / baseline.stddev
}

/// Deterministic anomaly id derived from the series and observation time
pub fn anomaly_id(entity_id: &str, metric_name: &str, observed_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entity_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(metric_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(observed_at.timestamp_micros().to_be_bytes());
    let digest = hasher.finalize();
    format!("anm-{}", hex::encode(&digest[..12]))
}

/// Detects observations that deviate from their baseline
#[derive(Debug, Clone, Copy)]
pub struct AnomalyDetector {
    /// Minimum |z| (exclusive) to flag an observation at all
    pub zscore_threshold: f64,
}

impl AnomalyDetector {
    pub fn new(zscore_threshold: f64) -> Self {
        Self { zscore_threshold }
    }

    /// Severity for a z-score, or `None` when not anomalous
    pub fn classify(&self, zscore: f64) -> Option<Severity> {
        let magnitude = zscore.abs();
        if magnitude.is_nan() || magnitude <= self.zscore_threshold {
            return None;
        }
        SEVERITY_TIERS
            .iter()
            .find(|(bound, _)| magnitude > *bound)
            .map(|(_, severity)| *severity)
            .or(Some(Severity::Low))
    }

    /// Compare one observation to its baseline
    pub fn detect(&self, observation: &MetricObservation, baseline: &Baseline) -> Option<Anomaly> {
        // Flat baselines suppress detection for the series
        if baseline.stddev <= 0.0 {
            return None;
        }

        let z = zscore(observation.value, baseline);
        let severity = self.classify(z)?;

        Some(Anomaly {
            id: anomaly_id(
                &observation.entity_id,
                &observation.metric_name,
                observation.timestamp,
            ),
            entity_id: observation.entity_id.clone(),
            metric_name: observation.metric_name.clone(),
            detected_at: observation.timestamp,
            current_value: observation.value,
            baseline_mean: baseline.mean,
            baseline_stddev: baseline.stddev,
            zscore: z,
            severity,
            direction: if observation.value > baseline.mean {
                Direction::High
            } else {
                Direction::Low
            },
        })
    }

    /// Detect across independent series in parallel
    ///
    /// Output is sorted by (entity, metric, time) so it does not depend on
    /// scheduling order.
    pub fn detect_batch(&self, pairs: &[(MetricObservation, Baseline)]) -> Vec<Anomaly> {
        let mut anomalies: Vec<Anomaly> = pairs
            .par_iter()
            .filter_map(|(observation, baseline)| self.detect(observation, baseline))
            .collect();
        anomalies.sort_by(|a, b| {
            (&a.entity_id, &a.metric_name, a.detected_at).cmp(&(
                &b.entity_id,
                &b.metric_name,
                b.detected_at,
            ))
        });
        anomalies
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(DEFAULT_ZSCORE_THRESHOLD)
    }
}
