//! Core data models for the trust gate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single metric reading produced by the upstream ingestion pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricObservation {
    pub entity_id: String,
    pub metric_name: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl MetricObservation {
    pub fn new(
        entity_id: impl Into<String>,
        metric_name: impl Into<String>,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            metric_name: metric_name.into(),
            timestamp,
            value,
        }
    }

    pub fn series_key(&self) -> SeriesKey {
        SeriesKey::new(&self.entity_id, &self.metric_name)
    }
}

/// Identifies one (entity, metric) time series
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub entity_id: String,
    pub metric_name: String,
}

impl SeriesKey {
    pub fn new(entity_id: impl Into<String>, metric_name: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            metric_name: metric_name.into(),
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_id, self.metric_name)
    }
}

/// Rolling statistics snapshot for one series
///
/// Snapshots are never mutated. A recomputation appends a new snapshot with a
/// higher `version`; older ones are reported as superseded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub entity_id: String,
    pub metric_name: String,
    pub window_days: u32,
    pub mean: f64,
    pub stddev: f64,
    pub sample_count: usize,
    pub computed_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl Baseline {
    /// Coefficient of variation, capped at 1.0
    ///
    /// A zero-mean series with spread is treated as maximally variable.
    pub fn coefficient_of_variation(&self) -> f64 {
        if self.stddev <= 0.0 {
            return 0.0;
        }
        if self.mean.abs() < f64::EPSILON {
            return 1.0;
        }
        (self.stddev / self.mean.abs()).min(1.0)
    }
}

/// Anomaly severity tiers, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the baseline mean the observation fell on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    High,
    Low,
}

/// A severity-tagged deviation from a baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: String,
    pub entity_id: String,
    pub metric_name: String,
    pub detected_at: DateTime<Utc>,
    pub current_value: f64,
    pub baseline_mean: f64,
    pub baseline_stddev: f64,
    pub zscore: f64,
    pub severity: Severity,
    pub direction: Direction,
}

impl Anomaly {
    pub fn series_key(&self) -> SeriesKey {
        SeriesKey::new(&self.entity_id, &self.metric_name)
    }
}

/// Sub-scores feeding the composite health score, each in [0, 100]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HealthComponents {
    pub emq_score: f64,
    pub freshness_score: f64,
    pub variance_score: f64,
    pub anomaly_score: f64,
}

/// Status band of a composite health score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Fair,
    Degraded,
    Critical,
    /// Inputs were incomplete; never treated as a score band
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Fair => "fair",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Critical => "critical",
            HealthStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to an anomaly that is active in the evaluated window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveAnomaly {
    pub id: String,
    pub severity: Severity,
}

impl From<&Anomaly> for ActiveAnomaly {
    fn from(anomaly: &Anomaly) -> Self {
        Self {
            id: anomaly.id.clone(),
            severity: anomaly.severity,
        }
    }
}

/// One evaluation cycle's health record for a scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthScore {
    /// Content-derived reference used by decisions
    pub id: String,
    pub scope_id: String,
    pub as_of: DateTime<Utc>,
    pub composite_score: f64,
    pub components: HealthComponents,
    pub status: HealthStatus,
    #[serde(default)]
    pub active_anomalies: Vec<ActiveAnomaly>,
}

/// Outcome of the trust gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GateOutcome {
    Pass,
    Hold,
    Block,
}

impl GateOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateOutcome::Pass => "PASS",
            GateOutcome::Hold => "HOLD",
            GateOutcome::Block => "BLOCK",
        }
    }

    /// Only PASS permits automated execution
    pub fn permits_automation(&self) -> bool {
        matches!(self, GateOutcome::Pass)
    }

    /// Rank from most permissive (0) to most restrictive (2)
    pub fn restrictiveness(&self) -> u8 {
        match self {
            GateOutcome::Pass => 0,
            GateOutcome::Hold => 1,
            GateOutcome::Block => 2,
        }
    }
}

impl fmt::Display for GateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable audit record of a gate decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub scope_id: String,
    pub evaluated_at: DateTime<Utc>,
    pub health_score_ref: String,
    pub decision: GateOutcome,
    pub reason: String,
    #[serde(default)]
    pub overriding_anomaly_ids: Vec<String>,
}

/// Entity granularity at which health is evaluated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeDefinition {
    pub scope_id: String,
    pub tenant_id: String,
    /// Entities whose series roll up into this scope
    pub entities: Vec<String>,
    /// Key metrics tracked for every entity
    pub metrics: Vec<String>,
}

impl ScopeDefinition {
    /// All (entity, metric) series covered by the scope
    pub fn series(&self) -> Vec<SeriesKey> {
        self.entities
            .iter()
            .flat_map(|entity| {
                self.metrics
                    .iter()
                    .map(move |metric| SeriesKey::new(entity.as_str(), metric.as_str()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_gate_outcome_serializes_uppercase() {
        let json = serde_json::to_string(&GateOutcome::Block).unwrap();
        assert_eq!(json, "\"BLOCK\"");
        assert!(GateOutcome::Pass.permits_automation());
        assert!(!GateOutcome::Hold.permits_automation());
    }

    #[test]
    fn test_scope_series_cross_product() {
        let scope = ScopeDefinition {
            scope_id: "campaign-1".to_string(),
            tenant_id: "tenant-a".to_string(),
            entities: vec!["ad-1".to_string(), "ad-2".to_string()],
            metrics: vec!["spend".to_string(), "conversions".to_string()],
        };

        let series = scope.series();
        assert_eq!(series.len(), 4);
        assert!(series.contains(&SeriesKey::new("ad-2", "conversions")));
    }

    #[test]
    fn test_coefficient_of_variation() {
        let baseline = Baseline {
            entity_id: "ad-1".to_string(),
            metric_name: "spend".to_string(),
            window_days: 7,
            mean: 100.0,
            stddev: 20.0,
            sample_count: 7,
            computed_at: Utc::now(),
            version: 1,
        };
        assert!((baseline.coefficient_of_variation() - 0.2).abs() < 1e-9);

        let flat = Baseline {
            stddev: 0.0,
            ..baseline.clone()
        };
        assert_eq!(flat.coefficient_of_variation(), 0.0);

        let zero_mean = Baseline {
            mean: 0.0,
            ..baseline
        };
        assert_eq!(zero_mean.coefficient_of_variation(), 1.0);
    }
}
