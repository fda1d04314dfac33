//! Composite health scoring
//!
//! Turns raw signal inputs into four sub-scores and combines them with
//! explicit weights. Scoring is pure: identical inputs give identical
//! `HealthScore`s, including the content-derived `id`.

use crate::models::{ActiveAnomaly, HealthComponents, HealthScore, HealthStatus, Severity};
use crate::policy::ComponentWeights;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

/// Ingest lag at or below which data counts as fully fresh
pub const FRESH_LAG_SECS: i64 = 15 * 60;

/// Ingest lag at or above which data counts as fully stale
pub const STALE_LAG_SECS: i64 = 24 * 60 * 60;

/// Status band lower bounds, highest first
const STATUS_BANDS: [(f64, HealthStatus); 3] = [
    (80.0, HealthStatus::Healthy),
    (60.0, HealthStatus::Fair),
    (40.0, HealthStatus::Degraded),
];

/// Raw inputs for one scope's health evaluation
///
/// `None` marks an input the cycle could not obtain; any missing input makes
/// the resulting status `unknown`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthInputs {
    /// Platform-reported event match quality, 0 to 100
    pub emq: Option<f64>,
    /// Time since the newest observation in the scope
    pub ingest_lag: Option<Duration>,
    /// Coefficient of variation of each key metric over the window
    pub coefficients_of_variation: Option<Vec<f64>>,
    /// Anomalies active in the evaluated window
    pub active_anomalies: Vec<ActiveAnomaly>,
}

/// Penalty subtracted from the anomaly sub-score per active anomaly
pub fn severity_penalty(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => 40.0,
        Severity::High => 25.0,
        Severity::Medium => 10.0,
        Severity::Low => 3.0,
    }
}

/// Linear decay from 100 at 15 minutes of lag to 0 at 24 hours
pub fn freshness_score(lag: Duration) -> f64 {
    let lag_ms = lag.num_milliseconds();
    if lag_ms <= FRESH_LAG_SECS * 1000 {
        return 100.0;
    }
    if lag_ms >= STALE_LAG_SECS * 1000 {
        return 0.0;
    }
    let span = ((STALE_LAG_SECS - FRESH_LAG_SECS) * 1000) as f64;
    let remaining = (STALE_LAG_SECS * 1000 - lag_ms) as f64;
    100.0 * remaining / span
}

/// 100 minus the mean coefficient of variation expressed in points
pub fn variance_score(coefficients: &[f64]) -> Option<f64> {
    if coefficients.is_empty() || coefficients.iter().any(|c| !c.is_finite()) {
        return None;
    }
    let mean_cv = coefficients.iter().map(|c| c.abs()).sum::<f64>() / coefficients.len() as f64;
    Some((100.0 - 100.0 * mean_cv).clamp(0.0, 100.0))
}

/// 100 minus the cumulative severity penalty, floored at 0
pub fn anomaly_score(active: &[ActiveAnomaly]) -> f64 {
    let penalty: f64 = active.iter().map(|a| severity_penalty(a.severity)).sum();
    (100.0 - penalty).max(0.0)
}

/// Weighted sum of the components clamped to [0, 100]
pub fn composite_score(components: &HealthComponents, weights: &ComponentWeights) -> f64 {
    let score = weights.emq * components.emq_score
        + weights.freshness * components.freshness_score
        + weights.variance * components.variance_score
        + weights.anomaly * components.anomaly_score;
    score.clamp(0.0, 100.0)
}

/// Status band for a composite score
pub fn status_for(composite: f64) -> HealthStatus {
    STATUS_BANDS
        .iter()
        .find(|(lower, _)| composite >= *lower)
        .map(|(_, status)| *status)
        .unwrap_or(HealthStatus::Critical)
}

/// Content-derived reference for a health score
pub fn health_score_ref(
    scope_id: &str,
    as_of: DateTime<Utc>,
    components: &HealthComponents,
    status: HealthStatus,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(scope_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(as_of.timestamp_micros().to_be_bytes());
    for value in [
        components.emq_score,
        components.freshness_score,
        components.variance_score,
        components.anomaly_score,
    ] {
        hasher.update(value.to_bits().to_be_bytes());
    }
    hasher.update(status.as_str().as_bytes());
    format!("hs-{}", hex::encode(&hasher.finalize()[..12]))
}

/// Weighted health scorer
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthScorer {
    pub weights: ComponentWeights,
}

impl HealthScorer {
    pub fn new(weights: ComponentWeights) -> Self {
        Self { weights }
    }

    /// Score one scope
    ///
    /// Missing inputs contribute 0 to their component and force `unknown`.
    pub fn score(&self, scope_id: &str, as_of: DateTime<Utc>, inputs: &HealthInputs) -> HealthScore {
        let emq = inputs
            .emq
            .filter(|v| v.is_finite())
            .map(|v| v.clamp(0.0, 100.0));
        let freshness = inputs.ingest_lag.map(freshness_score);
        let variance = inputs
            .coefficients_of_variation
            .as_deref()
            .and_then(variance_score);

        let complete = emq.is_some() && freshness.is_some() && variance.is_some();

        let components = HealthComponents {
            emq_score: emq.unwrap_or(0.0),
            freshness_score: freshness.unwrap_or(0.0),
            variance_score: variance.unwrap_or(0.0),
            anomaly_score: anomaly_score(&inputs.active_anomalies),
        };
        let composite = composite_score(&components, &self.weights);
        let status = if complete {
            status_for(composite)
        } else {
            HealthStatus::Unknown
        };

        HealthScore {
            id: health_score_ref(scope_id, as_of, &components, status),
            scope_id: scope_id.to_string(),
            as_of,
            composite_score: composite,
            components,
            status,
            active_anomalies: inputs.active_anomalies.clone(),
        }
    }

    /// Score precomputed components directly
    pub fn score_components(
        &self,
        scope_id: &str,
        as_of: DateTime<Utc>,
        components: HealthComponents,
        active_anomalies: Vec<ActiveAnomaly>,
    ) -> HealthScore {
        let composite = composite_score(&components, &self.weights);
        let status = status_for(composite);
        HealthScore {
            id: health_score_ref(scope_id, as_of, &components, status),
            scope_id: scope_id.to_string(),
            as_of,
            composite_score: composite,
            components,
            status,
            active_anomalies,
        }
    }
}
