//! Observability infrastructure for the trust gate
//!
//! Provides:
//! - Prometheus metrics (evaluation latency, decisions, anomalies, timeouts)
//! - Structured JSON logging with tracing

use crate::models::{Anomaly, Decision, GateOutcome, HealthScore, Severity};
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, GaugeVec, Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for evaluation latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<GateMetricsInner> = OnceLock::new();

struct GateMetricsInner {
    evaluation_latency_seconds: Histogram,
    decisions_total: IntCounterVec,
    anomalies_detected_total: IntCounterVec,
    evaluation_timeouts_total: IntCounter,
    evaluation_cancellations_total: IntCounter,
    scopes_registered: IntGauge,
    composite_score: GaugeVec,
    audit_records: IntGauge,
    observations_ingested_total: IntCounter,
    observations_rejected_total: IntCounter,
}

impl GateMetricsInner {
    fn new() -> Self {
        Self {
            evaluation_latency_seconds: register_histogram!(
                "trust_gate_evaluation_latency_seconds",
                "Time spent evaluating one scope from baseline refresh to decision",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register evaluation_latency_seconds"),

            decisions_total: register_int_counter_vec!(
                "trust_gate_decisions_total",
                "Gate decisions recorded, by outcome",
                &["decision"]
            )
            .expect("Failed to register decisions_total"),

            anomalies_detected_total: register_int_counter_vec!(
                "trust_gate_anomalies_detected_total",
                "Anomalies detected, by severity",
                &["severity"]
            )
            .expect("Failed to register anomalies_detected_total"),

            evaluation_timeouts_total: register_int_counter!(
                "trust_gate_evaluation_timeouts_total",
                "Scope evaluations aborted by timeout"
            )
            .expect("Failed to register evaluation_timeouts_total"),

            evaluation_cancellations_total: register_int_counter!(
                "trust_gate_evaluation_cancellations_total",
                "Scope evaluations cancelled before completion"
            )
            .expect("Failed to register evaluation_cancellations_total"),

            scopes_registered: register_int_gauge!(
                "trust_gate_scopes_registered",
                "Number of scopes currently under evaluation"
            )
            .expect("Failed to register scopes_registered"),

            composite_score: register_gauge_vec!(
                "trust_gate_composite_score",
                "Latest composite health score per scope",
                &["scope_id"]
            )
            .expect("Failed to register composite_score"),

            audit_records: register_int_gauge!(
                "trust_gate_audit_records",
                "Decisions held in the audit log"
            )
            .expect("Failed to register audit_records"),

            observations_ingested_total: register_int_counter!(
                "trust_gate_observations_ingested_total",
                "Metric observations accepted from the ingestion feed"
            )
            .expect("Failed to register observations_ingested_total"),

            observations_rejected_total: register_int_counter!(
                "trust_gate_observations_rejected_total",
                "Metric observations rejected at ingest"
            )
            .expect("Failed to register observations_rejected_total"),
        }
    }
}

/// Gate metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance. Clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct GateMetrics {
    _private: (),
}

impl Default for GateMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GateMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(GateMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &GateMetricsInner {
        GLOBAL_METRICS.get_or_init(GateMetricsInner::new)
    }

    pub fn observe_evaluation_latency(&self, duration_secs: f64) {
        self.inner().evaluation_latency_seconds.observe(duration_secs);
    }

    pub fn inc_decision(&self, outcome: GateOutcome) {
        self.inner()
            .decisions_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    pub fn inc_anomaly(&self, severity: Severity) {
        self.inner()
            .anomalies_detected_total
            .with_label_values(&[severity.as_str()])
            .inc();
    }

    pub fn inc_evaluation_timeouts(&self) {
        self.inner().evaluation_timeouts_total.inc();
    }

    pub fn inc_evaluation_cancellations(&self) {
        self.inner().evaluation_cancellations_total.inc();
    }

    pub fn set_scopes_registered(&self, count: i64) {
        self.inner().scopes_registered.set(count);
    }

    pub fn set_composite_score(&self, scope_id: &str, score: f64) {
        self.inner()
            .composite_score
            .with_label_values(&[scope_id])
            .set(score);
    }

    /// Drop the per-scope series of a deactivated scope
    pub fn forget_scope(&self, scope_id: &str) {
        let _ = self
            .inner()
            .composite_score
            .remove_label_values(&[scope_id]);
    }

    pub fn set_audit_records(&self, count: i64) {
        self.inner().audit_records.set(count);
    }

    pub fn add_observations(&self, accepted: u64, rejected: u64) {
        self.inner().observations_ingested_total.inc_by(accepted);
        self.inner().observations_rejected_total.inc_by(rejected);
    }
}

/// Structured logger for gate events
///
/// Consistent JSON-formatted events for decisions, anomalies and
/// evaluation lifecycle.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    /// Log a recorded gate decision
    pub fn log_decision(&self, decision: &Decision, health: &HealthScore) {
        match decision.decision {
            GateOutcome::Pass => {
                info!(
                    event = "decision_recorded",
                    node = %self.node_name,
                    scope_id = %decision.scope_id,
                    decision = %decision.decision,
                    composite_score = health.composite_score,
                    status = %health.status,
                    reason = %decision.reason,
                    "Automation permitted"
                );
            }
            GateOutcome::Hold | GateOutcome::Block => {
                warn!(
                    event = "decision_recorded",
                    node = %self.node_name,
                    scope_id = %decision.scope_id,
                    decision = %decision.decision,
                    composite_score = health.composite_score,
                    status = %health.status,
                    reason = %decision.reason,
                    overriding_anomalies = decision.overriding_anomaly_ids.len(),
                    "Automation gated"
                );
            }
        }
    }

    /// Log an anomaly detection event
    pub fn log_anomaly(&self, scope_id: &str, anomaly: &Anomaly) {
        match anomaly.severity {
            Severity::Critical => {
                warn!(
                    event = "anomaly_detected",
                    node = %self.node_name,
                    scope_id = %scope_id,
                    anomaly_id = %anomaly.id,
                    entity_id = %anomaly.entity_id,
                    metric_name = %anomaly.metric_name,
                    severity = %anomaly.severity,
                    zscore = anomaly.zscore,
                    current_value = anomaly.current_value,
                    baseline_mean = anomaly.baseline_mean,
                    "Critical anomaly detected"
                );
            }
            _ => {
                info!(
                    event = "anomaly_detected",
                    node = %self.node_name,
                    scope_id = %scope_id,
                    anomaly_id = %anomaly.id,
                    entity_id = %anomaly.entity_id,
                    metric_name = %anomaly.metric_name,
                    severity = %anomaly.severity,
                    zscore = anomaly.zscore,
                    current_value = anomaly.current_value,
                    baseline_mean = anomaly.baseline_mean,
                    "Anomaly detected"
                );
            }
        }
    }

    /// Log a baseline that could not be built
    pub fn log_baseline_insufficient(&self, scope_id: &str, details: &str) {
        info!(
            event = "baseline_insufficient",
            node = %self.node_name,
            scope_id = %scope_id,
            details = %details,
            "Baseline unavailable, scope health will be unknown"
        );
    }

    /// Log an evaluation aborted by timeout
    pub fn log_evaluation_timeout(&self, scope_id: &str, timeout_ms: u128) {
        warn!(
            event = "evaluation_timeout",
            node = %self.node_name,
            scope_id = %scope_id,
            timeout_ms = timeout_ms,
            "Evaluation timed out, previous decision marked stale"
        );
    }

    /// Log a cancelled evaluation
    pub fn log_evaluation_cancelled(&self, scope_id: &str) {
        info!(
            event = "evaluation_cancelled",
            node = %self.node_name,
            scope_id = %scope_id,
            "Evaluation cancelled, partial results discarded"
        );
    }

    /// Log a policy write
    pub fn log_policy_update(&self, tenant_id: &str, accepted: bool, details: &str) {
        if accepted {
            info!(
                event = "policy_updated",
                node = %self.node_name,
                tenant_id = %tenant_id,
                "Tenant policy updated"
            );
        } else {
            warn!(
                event = "policy_rejected",
                node = %self.node_name,
                tenant_id = %tenant_id,
                details = %details,
                "Tenant policy rejected"
            );
        }
    }

    /// Log gate startup
    pub fn log_startup(&self, version: &str) {
        info!(
            event = "gate_started",
            node = %self.node_name,
            gate_version = %version,
            "Trust gate started"
        );
    }

    /// Log gate shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "gate_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Trust gate shutting down"
        );
    }
}
