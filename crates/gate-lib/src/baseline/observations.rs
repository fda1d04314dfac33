//! Observation storage
//!
//! Keeps every series sorted by timestamp so window scans are two binary
//! searches. Observations older than the retention horizon are pruned.

use crate::models::{MetricObservation, SeriesKey};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Default retention, matching the longest configurable lookback
const DEFAULT_RETENTION_DAYS: i64 = 90;

/// Reasons an observation is refused at ingest
#[derive(Debug, Error, PartialEq)]
pub enum IngestError {
    #[error("observation for {series} has non-finite value {value}")]
    NonFiniteValue { series: SeriesKey, value: f64 },
    #[error("observation is missing an entity id or metric name")]
    EmptyIdentifier,
}

/// Outcome of a batch ingest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub accepted: usize,
    pub rejected: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Concurrent store of observations keyed by series
#[derive(Debug)]
pub struct ObservationStore {
    series: DashMap<SeriesKey, Vec<MetricObservation>>,
    retention: Duration,
}

impl Default for ObservationStore {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_DAYS as u32)
    }
}

impl ObservationStore {
    pub fn new(retention_days: u32) -> Self {
        Self {
            series: DashMap::new(),
            retention: Duration::days(i64::from(retention_days)),
        }
    }

    /// Insert one observation, keeping its series in timestamp order
    pub fn ingest(&self, observation: MetricObservation) -> Result<(), IngestError> {
        if observation.entity_id.is_empty() || observation.metric_name.is_empty() {
            return Err(IngestError::EmptyIdentifier);
        }
        if !observation.value.is_finite() {
            return Err(IngestError::NonFiniteValue {
                series: observation.series_key(),
                value: observation.value,
            });
        }

        let mut entry = self.series.entry(observation.series_key()).or_default();
        let at = entry.partition_point(|o| o.timestamp <= observation.timestamp);
        entry.insert(at, observation);
        Ok(())
    }

    /// Insert a batch; bad observations are counted and skipped
    pub fn ingest_batch(&self, observations: Vec<MetricObservation>) -> IngestSummary {
        let mut summary = IngestSummary::default();
        for observation in observations {
            match self.ingest(observation) {
                Ok(()) => summary.accepted += 1,
                Err(e) => {
                    summary.rejected += 1;
                    summary.errors.push(e.to_string());
                }
            }
        }
        debug!(
            accepted = summary.accepted,
            rejected = summary.rejected,
            "Ingested observation batch"
        );
        summary
    }

    /// Observations with `start <= timestamp < end`, ascending
    pub fn range(
        &self,
        key: &SeriesKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<MetricObservation> {
        let Some(series) = self.series.get(key) else {
            return Vec::new();
        };
        let lo = series.partition_point(|o| o.timestamp < start);
        let hi = series.partition_point(|o| o.timestamp < end);
        if lo >= hi {
            return Vec::new();
        }
        series[lo..hi].to_vec()
    }

    /// Most recent observation at or before `at`
    pub fn latest_at_or_before(
        &self,
        key: &SeriesKey,
        at: DateTime<Utc>,
    ) -> Option<MetricObservation> {
        let series = self.series.get(key)?;
        let idx = series.partition_point(|o| o.timestamp <= at);
        idx.checked_sub(1).map(|i| series[i].clone())
    }

    /// Latest timestamp at or before `at` across the given series
    pub fn latest_timestamp(&self, keys: &[SeriesKey], at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        keys.iter()
            .filter_map(|key| self.latest_at_or_before(key, at))
            .map(|o| o.timestamp)
            .max()
    }

    /// Drop observations older than the retention horizon
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        let mut removed = 0;
        for mut series in self.series.iter_mut() {
            let expired = series.partition_point(|o| o.timestamp < cutoff);
            if expired > 0 {
                series.drain(..expired);
                removed += expired;
            }
        }
        self.series.retain(|_, observations| !observations.is_empty());
        removed
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    pub fn len(&self) -> usize {
        self.series.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_ingest_keeps_series_sorted() {
        let store = ObservationStore::default();
        store
            .ingest(MetricObservation::new("ad-1", "spend", at(3, 0), 3.0))
            .unwrap();
        store
            .ingest(MetricObservation::new("ad-1", "spend", at(1, 0), 1.0))
            .unwrap();
        store
            .ingest(MetricObservation::new("ad-1", "spend", at(2, 0), 2.0))
            .unwrap();

        let key = SeriesKey::new("ad-1", "spend");
        let values: Vec<f64> = store
            .range(&key, at(1, 0), at(4, 0))
            .iter()
            .map(|o| o.value)
            .collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_range_is_half_open() {
        let store = ObservationStore::default();
        for day in 1..=5 {
            store
                .ingest(MetricObservation::new("ad-1", "spend", at(day, 0), day as f64))
                .unwrap();
        }

        let key = SeriesKey::new("ad-1", "spend");
        let window = store.range(&key, at(2, 0), at(4, 0));
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].value, 2.0);
        assert_eq!(window[1].value, 3.0);
    }

    #[test]
    fn test_rejects_non_finite_values() {
        let store = ObservationStore::default();
        let result = store.ingest(MetricObservation::new("ad-1", "spend", at(1, 0), f64::NAN));
        assert!(matches!(result, Err(IngestError::NonFiniteValue { .. })));

        let summary = store.ingest_batch(vec![
            MetricObservation::new("ad-1", "spend", at(1, 0), 1.0),
            MetricObservation::new("ad-1", "spend", at(1, 1), f64::INFINITY),
            MetricObservation::new("", "spend", at(1, 2), 1.0),
        ]);
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.rejected, 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_latest_at_or_before() {
        let store = ObservationStore::default();
        store
            .ingest(MetricObservation::new("ad-1", "spend", at(1, 0), 1.0))
            .unwrap();
        store
            .ingest(MetricObservation::new("ad-1", "spend", at(3, 0), 3.0))
            .unwrap();

        let key = SeriesKey::new("ad-1", "spend");
        assert_eq!(store.latest_at_or_before(&key, at(2, 0)).unwrap().value, 1.0);
        assert_eq!(store.latest_at_or_before(&key, at(3, 0)).unwrap().value, 3.0);
        assert!(store.latest_at_or_before(&key, at(1, 0) - Duration::hours(1)).is_none());
        assert_eq!(
            store.latest_timestamp(&[key.clone(), SeriesKey::new("ad-9", "spend")], at(5, 0)),
            Some(at(3, 0))
        );
    }

    #[test]
    fn test_prune_drops_expired_series() {
        let store = ObservationStore::new(2);
        store
            .ingest(MetricObservation::new("ad-1", "spend", at(1, 0), 1.0))
            .unwrap();
        store
            .ingest(MetricObservation::new("ad-2", "spend", at(9, 0), 1.0))
            .unwrap();

        let removed = store.prune(at(10, 0));
        assert_eq!(removed, 1);
        assert_eq!(store.series_count(), 1);
    }
}
