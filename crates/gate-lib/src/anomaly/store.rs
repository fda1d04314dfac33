//! Anomaly retention and read-time filtering
//!
//! Severity is fixed at detection time. Query parameters such as a display
//! z-score threshold only filter what is returned.

use crate::models::{Anomaly, SeriesKey, Severity};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Anomalies are kept for the longest configurable lookback
const DEFAULT_RETENTION_DAYS: i64 = 90;

/// Read-time filter over retained anomalies
#[derive(Debug, Clone)]
pub struct AnomalyQuery {
    /// Only anomalies detected at or after this instant
    pub since: DateTime<Utc>,
    /// Only anomalies with |z| above this value
    pub min_abs_zscore: Option<f64>,
}

impl AnomalyQuery {
    pub fn window(as_of: DateTime<Utc>, window_days: u32) -> Self {
        Self {
            since: as_of - Duration::days(i64::from(window_days)),
            min_abs_zscore: None,
        }
    }

    pub fn with_min_abs_zscore(mut self, threshold: f64) -> Self {
        self.min_abs_zscore = Some(threshold);
        self
    }

    fn matches(&self, anomaly: &Anomaly) -> bool {
        anomaly.detected_at >= self.since
            && self
                .min_abs_zscore
                .map_or(true, |threshold| anomaly.zscore.abs() > threshold)
    }
}

/// Count of anomalies per severity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalySummary {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    pub critical: usize,
    pub total: usize,
}

impl AnomalySummary {
    pub fn from_anomalies<'a>(anomalies: impl IntoIterator<Item = &'a Anomaly>) -> Self {
        let mut summary = Self::default();
        for anomaly in anomalies {
            match anomaly.severity {
                Severity::Low => summary.low += 1,
                Severity::Medium => summary.medium += 1,
                Severity::High => summary.high += 1,
                Severity::Critical => summary.critical += 1,
            }
            summary.total += 1;
        }
        summary
    }
}

/// Retained anomalies keyed by (entity, metric) series
#[derive(Debug)]
pub struct AnomalyStore {
    by_series: DashMap<SeriesKey, Vec<Anomaly>>,
    retention: Duration,
}

impl Default for AnomalyStore {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_DAYS as u32)
    }
}

impl AnomalyStore {
    pub fn new(retention_days: u32) -> Self {
        Self {
            by_series: DashMap::new(),
            retention: Duration::days(i64::from(retention_days)),
        }
    }

    /// Store anomalies not already present; returns how many were new
    pub fn record(&self, anomalies: &[Anomaly]) -> usize {
        let mut added = 0;
        for anomaly in anomalies {
            let mut stored = self.by_series.entry(anomaly.series_key()).or_default();
            if stored.iter().any(|a| a.id == anomaly.id) {
                continue;
            }
            let at = stored.partition_point(|a| a.detected_at <= anomaly.detected_at);
            stored.insert(at, anomaly.clone());
            added += 1;
        }
        added
    }

    /// Anomalies on the given series matching the query, oldest first
    ///
    /// Scopes sharing an entity only see anomalies on their own metrics.
    pub fn query(&self, series: &[SeriesKey], query: &AnomalyQuery) -> Vec<Anomaly> {
        let mut result: Vec<Anomaly> = series
            .iter()
            .filter_map(|key| self.by_series.get(key))
            .flat_map(|stored| {
                stored
                    .iter()
                    .filter(|a| query.matches(a))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        result.sort_by(|a, b| a.detected_at.cmp(&b.detected_at).then_with(|| a.id.cmp(&b.id)));
        result
    }

    /// Drop anomalies past the retention horizon
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        let mut removed = 0;
        for mut stored in self.by_series.iter_mut() {
            let expired = stored.partition_point(|a| a.detected_at < cutoff);
            if expired > 0 {
                stored.drain(..expired);
                removed += expired;
            }
        }
        self.by_series.retain(|_, stored| !stored.is_empty());
        removed
    }

    pub fn len(&self) -> usize {
        self.by_series.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use chrono::TimeZone;

    fn anomaly(id: &str, entity: &str, day: u32, zscore: f64, severity: Severity) -> Anomaly {
        on_metric(id, entity, "spend", day, zscore, severity)
    }

    fn on_metric(
        id: &str,
        entity: &str,
        metric: &str,
        day: u32,
        zscore: f64,
        severity: Severity,
    ) -> Anomaly {
        Anomaly {
            id: id.to_string(),
            entity_id: entity.to_string(),
            metric_name: metric.to_string(),
            detected_at: Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap(),
            current_value: 10.0,
            baseline_mean: 5.0,
            baseline_stddev: 1.0,
            zscore,
            severity,
            direction: Direction::High,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 20, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_record_deduplicates_by_id() {
        let store = AnomalyStore::default();
        let a = anomaly("a", "ad-1", 18, 2.2, Severity::Low);

        assert_eq!(store.record(&[a.clone()]), 1);
        assert_eq!(store.record(&[a]), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_query_filters_window_and_threshold() {
        let store = AnomalyStore::default();
        store.record(&[
            anomaly("old", "ad-1", 1, 4.5, Severity::Critical),
            anomaly("low", "ad-1", 18, 2.2, Severity::Low),
            anomaly("high", "ad-2", 19, 3.3, Severity::High),
            anomaly("other", "ad-9", 19, 3.3, Severity::High),
        ]);
        let series = vec![SeriesKey::new("ad-1", "spend"), SeriesKey::new("ad-2", "spend")];

        let week = store.query(&series, &AnomalyQuery::window(now(), 7));
        let ids: Vec<&str> = week.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["low", "high"]);

        let strict = store.query(
            &series,
            &AnomalyQuery::window(now(), 30).with_min_abs_zscore(3.0),
        );
        let ids: Vec<&str> = strict.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["old", "high"]);
    }

    #[test]
    fn test_threshold_filter_keeps_detection_severity() {
        let store = AnomalyStore::default();
        store.record(&[anomaly("low", "ad-1", 18, 2.2, Severity::Low)]);

        let filtered = store.query(
            &[SeriesKey::new("ad-1", "spend")],
            &AnomalyQuery::window(now(), 7).with_min_abs_zscore(1.0),
        );
        assert_eq!(filtered[0].severity, Severity::Low);
    }

    #[test]
    fn test_query_only_matches_requested_metrics() {
        let store = AnomalyStore::default();
        store.record(&[
            on_metric("spend-low", "ad-1", "spend", 18, 2.2, Severity::Low),
            on_metric("cpa-critical", "ad-1", "cpa", 19, 4.6, Severity::Critical),
        ]);

        let spend_only = store.query(
            &[SeriesKey::new("ad-1", "spend")],
            &AnomalyQuery::window(now(), 7),
        );
        let ids: Vec<&str> = spend_only.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["spend-low"]);
        assert_eq!(AnomalySummary::from_anomalies(&spend_only).critical, 0);
    }

    #[test]
    fn test_summary_counts() {
        let anomalies = vec![
            anomaly("a", "ad-1", 18, 2.2, Severity::Low),
            anomaly("b", "ad-1", 18, 4.2, Severity::Critical),
            anomaly("c", "ad-1", 18, 4.4, Severity::Critical),
        ];
        let summary = AnomalySummary::from_anomalies(&anomalies);
        assert_eq!(summary.low, 1);
        assert_eq!(summary.critical, 2);
        assert_eq!(summary.total, 3);
    }

    #[test]
    fn test_prune() {
        let store = AnomalyStore::new(10);
        store.record(&[
            anomaly("old", "ad-1", 1, 4.5, Severity::Critical),
            anomaly("new", "ad-1", 18, 2.2, Severity::Low),
        ]);
        assert_eq!(store.prune(now()), 1);
        assert_eq!(store.len(), 1);
    }
}
