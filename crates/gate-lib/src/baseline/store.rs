//! Baseline snapshots
//!
//! A baseline summarises one series over `window_days` whole days ending at
//! the start of the evaluation day, so a day's readings never contribute to
//! the baseline they are compared against.

use super::ObservationStore;
use crate::models::{Baseline, SeriesKey};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Lookback windows the store can compute
pub const SUPPORTED_WINDOWS: [u32; 4] = [3, 7, 14, 30];

/// Minimum samples for a meaningful standard deviation
pub const MIN_BASELINE_SAMPLES: usize = 2;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BaselineError {
    #[error(
        "insufficient data for {entity_id}/{metric_name}: {found} samples, need {required}"
    )]
    InsufficientData {
        entity_id: String,
        metric_name: String,
        found: usize,
        required: usize,
    },
    #[error("unsupported baseline window of {0} days (expected one of 3, 7, 14, 30)")]
    UnsupportedWindow(u32),
}

/// A stored baseline together with whether a newer snapshot replaced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineSnapshot {
    #[serde(flatten)]
    pub baseline: Baseline,
    pub superseded: bool,
}

/// Mean and sample standard deviation (Bessel's correction)
///
/// Returns `None` for an empty slice; a single value has zero spread.
pub fn summarize(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return Some((mean, 0.0));
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some((mean, variance.sqrt()))
}

/// Append-only history of baseline snapshots per series
pub struct BaselineStore {
    observations: Arc<ObservationStore>,
    snapshots: DashMap<SeriesKey, Vec<Baseline>>,
    min_samples: usize,
}

impl BaselineStore {
    pub fn new(observations: Arc<ObservationStore>) -> Self {
        Self {
            observations,
            snapshots: DashMap::new(),
            min_samples: MIN_BASELINE_SAMPLES,
        }
    }

    /// Set a stricter minimum sample count
    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = min_samples.max(MIN_BASELINE_SAMPLES);
        self
    }

    pub fn observations(&self) -> &Arc<ObservationStore> {
        &self.observations
    }

    /// Compute a baseline for the series as of `as_of` without storing it
    ///
    /// The window is `[day_start - window_days, day_start)` where `day_start`
    /// is midnight UTC of the evaluation day.
    pub fn compute_baseline(
        &self,
        entity_id: &str,
        metric_name: &str,
        window_days: u32,
        as_of: DateTime<Utc>,
    ) -> Result<Baseline, BaselineError> {
        if !SUPPORTED_WINDOWS.contains(&window_days) {
            return Err(BaselineError::UnsupportedWindow(window_days));
        }

        let day_start = as_of.date_naive().and_time(NaiveTime::MIN).and_utc();
        let window_start = day_start - Duration::days(i64::from(window_days));
        let key = SeriesKey::new(entity_id, metric_name);

        let values: Vec<f64> = self
            .observations
            .range(&key, window_start, day_start)
            .into_iter()
            .map(|o| o.value)
            .collect();

        if values.len() < self.min_samples {
            return Err(BaselineError::InsufficientData {
                entity_id: entity_id.to_string(),
                metric_name: metric_name.to_string(),
                found: values.len(),
                required: self.min_samples,
            });
        }

        let (mean, stddev) = summarize(&values).ok_or_else(|| BaselineError::InsufficientData {
            entity_id: entity_id.to_string(),
            metric_name: metric_name.to_string(),
            found: 0,
            required: self.min_samples,
        })?;

        Ok(Baseline {
            entity_id: entity_id.to_string(),
            metric_name: metric_name.to_string(),
            window_days,
            mean,
            stddev,
            sample_count: values.len(),
            computed_at: as_of,
            version: 0,
        })
    }

    /// Append a computed baseline as the series' newest snapshot
    pub fn record(&self, mut baseline: Baseline) -> Baseline {
        let key = SeriesKey::new(&baseline.entity_id, &baseline.metric_name);
        let mut history = self.snapshots.entry(key).or_default();
        baseline.version = history.len() as u64 + 1;
        history.push(baseline.clone());
        baseline
    }

    /// Compute and record in one step
    pub fn refresh(
        &self,
        entity_id: &str,
        metric_name: &str,
        window_days: u32,
        as_of: DateTime<Utc>,
    ) -> Result<Baseline, BaselineError> {
        let baseline = self.compute_baseline(entity_id, metric_name, window_days, as_of)?;
        Ok(self.record(baseline))
    }

    /// Newest snapshot for the series
    pub fn current(&self, key: &SeriesKey) -> Option<Baseline> {
        self.snapshots.get(key).and_then(|h| h.last().cloned())
    }

    /// Every snapshot for the series, oldest first
    pub fn history(&self, key: &SeriesKey) -> Vec<BaselineSnapshot> {
        let Some(history) = self.snapshots.get(key) else {
            return Vec::new();
        };
        let newest = history.len();
        history
            .iter()
            .enumerate()
            .map(|(i, baseline)| BaselineSnapshot {
                baseline: baseline.clone(),
                superseded: i + 1 < newest,
            })
            .collect()
    }

    pub fn series_count(&self) -> usize {
        self.snapshots.len()
    }
}
