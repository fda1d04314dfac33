//! Trust gate decision
//!
//! Maps a health score and its active anomalies to PASS, HOLD or BLOCK.
//! Rules are checked from most to least restrictive and the first match
//! wins, so the outcome never loosens as the score drops or severity rises.
//! An `unknown` health score always blocks.

use crate::models::{Decision, GateOutcome, HealthScore, HealthStatus, Severity};
use crate::policy::GatePolicy;
use chrono::{DateTime, Utc};

/// Decision thresholds for one tenant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionGate {
    pub block_threshold: f64,
    pub hold_threshold: f64,
}

impl Default for DecisionGate {
    fn default() -> Self {
        Self::from_policy(&GatePolicy::default())
    }
}

impl DecisionGate {
    pub fn new(block_threshold: f64, hold_threshold: f64) -> Self {
        Self {
            block_threshold,
            hold_threshold,
        }
    }

    pub fn from_policy(policy: &GatePolicy) -> Self {
        Self::new(policy.block_threshold, policy.hold_threshold)
    }

    /// Decide whether automation may run for the scope
    ///
    /// Pure: the decision timestamp is the health score's `as_of`.
    pub fn decide(&self, health: &HealthScore) -> Decision {
        let verdict = |decision: GateOutcome, reason: String, ids: Vec<String>| Decision {
            scope_id: health.scope_id.clone(),
            evaluated_at: health.as_of,
            health_score_ref: health.id.clone(),
            decision,
            reason,
            overriding_anomaly_ids: ids,
        };

        if health.status == HealthStatus::Unknown || !health.composite_score.is_finite() {
            return verdict(
                GateOutcome::Block,
                "health status unknown: signal inputs incomplete, failing closed".to_string(),
                Vec::new(),
            );
        }

        let score = health.composite_score;
        let critical = anomaly_ids(health, Severity::Critical);
        let below_block = score < self.block_threshold;

        if below_block || !critical.is_empty() {
            let mut reasons = Vec::new();
            if below_block {
                reasons.push(format!(
                    "composite score {:.2} below block threshold {:.2}",
                    score, self.block_threshold
                ));
            }
            if !critical.is_empty() {
                reasons.push(format!(
                    "{} critical anomal{} active",
                    critical.len(),
                    if critical.len() == 1 { "y" } else { "ies" }
                ));
            }
            return verdict(GateOutcome::Block, reasons.join("; "), critical);
        }

        if score < self.hold_threshold {
            let high = anomaly_ids(health, Severity::High);
            let mut reason = format!(
                "composite score {:.2} below hold threshold {:.2}",
                score, self.hold_threshold
            );
            if !high.is_empty() {
                reason.push_str(&format!(
                    "; {} high-severity anomal{} active",
                    high.len(),
                    if high.len() == 1 { "y" } else { "ies" }
                ));
            }
            return verdict(GateOutcome::Hold, reason, high);
        }

        verdict(
            GateOutcome::Pass,
            format!(
                "composite score {:.2} at or above hold threshold {:.2}, no critical anomalies",
                score, self.hold_threshold
            ),
            Vec::new(),
        )
    }
}

/// BLOCK record used when no trustworthy evaluation exists
pub fn fail_closed(scope_id: &str, at: DateTime<Utc>, reason: impl Into<String>) -> Decision {
    Decision {
        scope_id: scope_id.to_string(),
        evaluated_at: at,
        health_score_ref: String::new(),
        decision: GateOutcome::Block,
        reason: reason.into(),
        overriding_anomaly_ids: Vec::new(),
    }
}

fn anomaly_ids(health: &HealthScore, severity: Severity) -> Vec<String> {
    health
        .active_anomalies
        .iter()
        .filter(|a| a.severity == severity)
        .map(|a| a.id.clone())
        .collect()
}
