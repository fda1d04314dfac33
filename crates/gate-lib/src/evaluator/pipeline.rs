//! Single-scope evaluation pipeline
//!
//! baseline refresh -> detection -> scoring -> decision, computed entirely
//! in memory. Nothing here writes to a store; the scheduler commits an
//! `EvaluationOutcome` only after the pipeline has finished, so an aborted
//! run leaves no trace.

use super::EvaluationError;
use crate::anomaly::AnomalyDetector;
use crate::baseline::{BaselineError, BaselineStore};
use crate::gate::DecisionGate;
use crate::models::{
    ActiveAnomaly, Anomaly, Baseline, Decision, HealthScore, MetricObservation, ScopeDefinition,
    SeriesKey,
};
use crate::policy::GatePolicy;
use crate::scoring::{HealthInputs, HealthScorer};
use crate::signals::SignalSource;
use chrono::{DateTime, NaiveTime, Utc};
use tracing::debug;

/// Everything one cycle produced for a scope, not yet committed
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub scope_id: String,
    pub baselines: Vec<Baseline>,
    pub insufficient: Vec<BaselineError>,
    pub anomalies: Vec<Anomaly>,
    pub health: HealthScore,
    pub decision: Decision,
}

/// Run the pipeline for one scope as of `as_of`
pub async fn evaluate(
    scope: &ScopeDefinition,
    policy: &GatePolicy,
    as_of: DateTime<Utc>,
    baselines: &BaselineStore,
    signals: &dyn SignalSource,
) -> Result<EvaluationOutcome, EvaluationError> {
    let series = scope.series();

    // Baseline refresh
    let mut computed = Vec::with_capacity(series.len());
    let mut insufficient = Vec::new();
    for key in &series {
        match baselines.compute_baseline(&key.entity_id, &key.metric_name, policy.window_days, as_of)
        {
            Ok(baseline) => computed.push(baseline),
            Err(e) => insufficient.push(e),
        }
    }
    tokio::task::yield_now().await;

    // Detection: each series' latest reading of the evaluation day
    let day_start = as_of.date_naive().and_time(NaiveTime::MIN).and_utc();
    let observations = baselines.observations();
    let pairs: Vec<(MetricObservation, Baseline)> = computed
        .iter()
        .filter_map(|baseline| {
            let key = SeriesKey::new(&baseline.entity_id, &baseline.metric_name);
            observations
                .latest_at_or_before(&key, as_of)
                .filter(|o| o.timestamp >= day_start)
                .map(|o| (o, baseline.clone()))
        })
        .collect();

    let detector = AnomalyDetector::new(policy.zscore_threshold);
    let anomalies = tokio::task::spawn_blocking(move || detector.detect_batch(&pairs))
        .await
        .map_err(|e| EvaluationError::Worker(e.to_string()))?;

    // Scoring
    let emq = signals.emq(&scope.scope_id, as_of).await.map(|r| r.emq_score);
    let ingest_lag = observations
        .latest_timestamp(&series, as_of)
        .map(|latest| as_of - latest);
    let coefficients_of_variation = if insufficient.is_empty() && !computed.is_empty() {
        Some(computed.iter().map(Baseline::coefficient_of_variation).collect())
    } else {
        None
    };
    let inputs = HealthInputs {
        emq,
        ingest_lag,
        coefficients_of_variation,
        active_anomalies: anomalies.iter().map(ActiveAnomaly::from).collect(),
    };
    let health = HealthScorer::new(policy.weights).score(&scope.scope_id, as_of, &inputs);

    // Decision
    let decision = DecisionGate::from_policy(policy).decide(&health);

    debug!(
        scope_id = %scope.scope_id,
        series = series.len(),
        baselines = computed.len(),
        insufficient = insufficient.len(),
        anomalies = anomalies.len(),
        composite_score = health.composite_score,
        decision = %decision.decision,
        "Pipeline complete"
    );

    Ok(EvaluationOutcome {
        scope_id: scope.scope_id.clone(),
        baselines: computed,
        insufficient,
        anomalies,
        health,
        decision,
    })
}
