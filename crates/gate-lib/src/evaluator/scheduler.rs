//! Evaluation scheduling
//!
//! Runs the pipeline once per active scope per cycle on a bounded pool.
//! Every run carries its own timeout and a cancellation signal; results are
//! committed only when the pipeline finishes inside both.

use super::pipeline::{self, EvaluationOutcome};
use super::EvaluationError;
use crate::anomaly::AnomalyStore;
use crate::audit::{AuditError, AuditLog};
use crate::baseline::BaselineStore;
use crate::health::{components, HealthRegistry};
use crate::models::{Decision, GateOutcome, HealthScore};
use crate::observability::{GateMetrics, StructuredLogger};
use crate::policy::PolicyStore;
use crate::scope::ScopeRegistry;
use crate::signals::SignalSource;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default cadence between evaluation cycles
pub const DEFAULT_EVALUATION_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default budget for one scope's pipeline
pub const DEFAULT_EVALUATION_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Configuration for the evaluator
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Interval between scheduled cycles
    pub interval: Duration,
    /// Per-scope evaluation timeout
    pub timeout: Duration,
    /// Maximum scopes evaluated at once
    pub max_concurrency: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_EVALUATION_INTERVAL,
            timeout: DEFAULT_EVALUATION_TIMEOUT,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// Decision of record for a scope, with the health it was based on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestDecision {
    pub decision: Decision,
    pub health: HealthScore,
    /// Set when a later evaluation timed out before replacing this one
    pub stale: bool,
}

impl LatestDecision {
    /// What the automation gateway must act on; a stale decision fails closed
    pub fn effective_decision(&self) -> GateOutcome {
        if self.stale {
            GateOutcome::Block
        } else {
            self.decision.decision
        }
    }
}

/// Tally of one scheduled cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub evaluated: usize,
    pub timed_out: usize,
    pub cancelled: usize,
    /// Scopes skipped because an earlier run was still in flight
    pub skipped: usize,
    pub failed: usize,
}

/// Removes a scope's cancellation handle when its run ends, however it ends
struct InFlightGuard {
    in_flight: Arc<DashMap<String, watch::Sender<bool>>>,
    scope_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.scope_id);
    }
}

/// Resolves once cancellation is requested; never resolves otherwise
async fn cancellation(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Per-scope evaluator over shared stores
///
/// Cheap to clone; clones share stores, in-flight handles and the worker
/// pool.
#[derive(Clone)]
pub struct Evaluator {
    scopes: Arc<ScopeRegistry>,
    policies: Arc<PolicyStore>,
    baselines: Arc<BaselineStore>,
    anomalies: Arc<AnomalyStore>,
    audit: Arc<AuditLog>,
    signals: Arc<dyn SignalSource>,
    latest: Arc<DashMap<String, LatestDecision>>,
    in_flight: Arc<DashMap<String, watch::Sender<bool>>>,
    workers: Arc<Semaphore>,
    config: EvaluatorConfig,
    metrics: GateMetrics,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
}

impl Evaluator {
    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    pub fn scopes(&self) -> &Arc<ScopeRegistry> {
        &self.scopes
    }

    pub fn latest(&self, scope_id: &str) -> Option<LatestDecision> {
        self.latest.get(scope_id).map(|l| l.clone())
    }

    pub fn is_in_flight(&self, scope_id: &str) -> bool {
        self.in_flight.contains_key(scope_id)
    }

    /// Signal an in-flight run to stop; returns false if none was running
    pub fn cancel(&self, scope_id: &str) -> bool {
        match self.in_flight.get(scope_id) {
            Some(tx) => {
                let _ = tx.send(true);
                debug!(scope_id = %scope_id, "Cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Stop evaluating a scope, cancelling any run in progress
    pub fn deactivate(&self, scope_id: &str) -> bool {
        self.cancel(scope_id);
        let removed = self.scopes.deregister(scope_id).is_some();
        self.latest.remove(scope_id);
        self.metrics.forget_scope(scope_id);
        self.metrics.set_scopes_registered(self.scopes.len() as i64);
        removed
    }

    /// Deactivate every scope owned by a tenant; returns the removed scope ids
    pub fn deactivate_tenant(&self, tenant_id: &str) -> Vec<String> {
        let mut removed: Vec<String> = self
            .scopes
            .list()
            .into_iter()
            .filter(|s| s.tenant_id == tenant_id)
            .map(|s| s.scope_id)
            .filter(|scope_id| self.deactivate(scope_id))
            .collect();
        removed.sort();
        removed
    }

    /// Evaluate one scope now and commit the result
    pub async fn evaluate_scope(
        &self,
        scope_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<LatestDecision, EvaluationError> {
        let scope = self
            .scopes
            .get(scope_id)
            .ok_or_else(|| EvaluationError::UnknownScope(scope_id.to_string()))?;

        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let _guard = match self.in_flight.entry(scope_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(EvaluationError::AlreadyRunning(scope_id.to_string()))
            }
            Entry::Vacant(slot) => {
                slot.insert(cancel_tx);
                InFlightGuard {
                    in_flight: Arc::clone(&self.in_flight),
                    scope_id: scope_id.to_string(),
                }
            }
        };

        let _permit = tokio::select! {
            permit = Arc::clone(&self.workers).acquire_owned() => {
                permit.map_err(|e| EvaluationError::Worker(e.to_string()))?
            }
            _ = cancellation(&mut cancel_rx) => {
                return Err(self.cancelled(scope_id));
            }
        };

        let policy = self.policies.effective(&scope.tenant_id);
        let start = Instant::now();
        let run = pipeline::evaluate(
            &scope,
            &policy,
            as_of,
            &self.baselines,
            self.signals.as_ref(),
        );

        let outcome = tokio::select! {
            result = tokio::time::timeout(self.config.timeout, run) => match result {
                Ok(outcome) => outcome?,
                Err(_) => return Err(self.timed_out(scope_id).await),
            },
            _ = cancellation(&mut cancel_rx) => {
                return Err(self.cancelled(scope_id));
            }
        };

        let Some(committed) = self.commit_if_active(scope_id, outcome) else {
            return Err(self.cancelled(scope_id));
        };
        self.metrics
            .observe_evaluation_latency(start.elapsed().as_secs_f64());

        match committed {
            Ok(latest) => {
                if let Some(health) = &self.health {
                    health.set_healthy(components::EVALUATOR).await;
                }
                Ok(latest)
            }
            Err(e) => {
                if let (Some(health), AuditError::Persistence(_) | AuditError::Serialization(_)) =
                    (&self.health, &e)
                {
                    health
                        .set_unhealthy(components::AUDIT_LOG, e.to_string())
                        .await;
                }
                Err(e.into())
            }
        }
    }

    /// Commit a finished run unless it was cancelled or its scope deactivated
    ///
    /// The scope's in-flight entry is held exclusively for the check and the
    /// commit, so a concurrent `cancel` (and so `deactivate`) lands either
    /// before the check or after the commit, never in between. Returns
    /// `None` when the results were discarded.
    fn commit_if_active(
        &self,
        scope_id: &str,
        outcome: EvaluationOutcome,
    ) -> Option<Result<LatestDecision, AuditError>> {
        let handle = self.in_flight.get_mut(scope_id)?;
        if *handle.value().borrow() || self.scopes.get(scope_id).is_none() {
            return None;
        }
        let committed = self.commit(outcome);
        drop(handle);
        Some(committed)
    }

    /// Persist a finished run; runs without awaiting so it cannot be torn
    fn commit(&self, outcome: EvaluationOutcome) -> Result<LatestDecision, AuditError> {
        let EvaluationOutcome {
            scope_id,
            baselines,
            insufficient,
            anomalies,
            health,
            decision,
        } = outcome;

        self.audit.record(decision.clone())?;

        for baseline in baselines {
            self.baselines.record(baseline);
        }
        for error in &insufficient {
            self.logger
                .log_baseline_insufficient(&scope_id, &error.to_string());
        }
        for anomaly in &anomalies {
            if self.anomalies.record(std::slice::from_ref(anomaly)) > 0 {
                self.metrics.inc_anomaly(anomaly.severity);
                self.logger.log_anomaly(&scope_id, anomaly);
            }
        }

        self.metrics.inc_decision(decision.decision);
        self.metrics
            .set_composite_score(&scope_id, health.composite_score);
        self.metrics.set_audit_records(self.audit.len() as i64);
        self.logger.log_decision(&decision, &health);

        let latest = LatestDecision {
            decision,
            health,
            stale: false,
        };
        self.latest.insert(scope_id, latest.clone());
        Ok(latest)
    }

    async fn timed_out(&self, scope_id: &str) -> EvaluationError {
        if let Some(mut previous) = self.latest.get_mut(scope_id) {
            previous.stale = true;
        }
        self.metrics.inc_evaluation_timeouts();
        self.logger
            .log_evaluation_timeout(scope_id, self.config.timeout.as_millis());
        if let Some(health) = &self.health {
            health
                .set_degraded(
                    components::EVALUATOR,
                    format!("Evaluation of {scope_id} timed out"),
                )
                .await;
        }
        EvaluationError::Timeout {
            scope_id: scope_id.to_string(),
            after: self.config.timeout,
        }
    }

    fn cancelled(&self, scope_id: &str) -> EvaluationError {
        self.metrics.inc_evaluation_cancellations();
        self.logger.log_evaluation_cancelled(scope_id);
        EvaluationError::Cancelled {
            scope_id: scope_id.to_string(),
        }
    }

    /// Evaluate every active scope once, one task per scope
    pub async fn run_cycle(&self, as_of: DateTime<Utc>) -> CycleReport {
        let scopes = self.scopes.list();
        self.metrics.set_scopes_registered(scopes.len() as i64);

        let mut report = CycleReport::default();
        let mut tasks = JoinSet::new();
        for scope in scopes {
            if self.is_in_flight(&scope.scope_id) {
                report.skipped += 1;
                continue;
            }
            let evaluator = self.clone();
            tasks.spawn(async move { evaluator.evaluate_scope(&scope.scope_id, as_of).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(_)) => report.evaluated += 1,
                Ok(Err(EvaluationError::Timeout { .. })) => report.timed_out += 1,
                Ok(Err(EvaluationError::Cancelled { .. })) => report.cancelled += 1,
                Ok(Err(EvaluationError::AlreadyRunning(_))) => report.skipped += 1,
                Ok(Err(EvaluationError::UnknownScope(scope_id))) => {
                    debug!(scope_id = %scope_id, "Scope deactivated before its run started");
                    report.cancelled += 1;
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Scope evaluation failed");
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Evaluation task panicked");
                    report.failed += 1;
                }
            }
        }

        let pruned_observations = self.baselines.observations().prune(as_of);
        let pruned_anomalies = self.anomalies.prune(as_of);
        if pruned_observations > 0 || pruned_anomalies > 0 {
            debug!(
                observations = pruned_observations,
                anomalies = pruned_anomalies,
                "Pruned expired data"
            );
        }

        report
    }

    /// Run scheduled cycles until shutdown
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            timeout_ms = self.config.timeout.as_millis() as u64,
            max_concurrency = self.config.max_concurrency,
            "Starting evaluation loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    let report = self.run_cycle(Utc::now()).await;
                    info!(
                        evaluated = report.evaluated,
                        timed_out = report.timed_out,
                        cancelled = report.cancelled,
                        skipped = report.skipped,
                        failed = report.failed,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Evaluation cycle complete"
                    );
                }
                _ = shutdown.recv() => {
                    info!("Shutting down evaluation loop");
                    for handle in self.in_flight.iter() {
                        let _ = handle.value().send(true);
                    }
                    break;
                }
            }
        }
    }
}

/// Builder for the evaluator
pub struct EvaluatorBuilder {
    scopes: Option<Arc<ScopeRegistry>>,
    policies: Option<Arc<PolicyStore>>,
    baselines: Option<Arc<BaselineStore>>,
    anomalies: Option<Arc<AnomalyStore>>,
    audit: Option<Arc<AuditLog>>,
    signals: Option<Arc<dyn SignalSource>>,
    health: Option<HealthRegistry>,
    node_name: String,
    config: EvaluatorConfig,
}

impl Default for EvaluatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EvaluatorBuilder {
    pub fn new() -> Self {
        Self {
            scopes: None,
            policies: None,
            baselines: None,
            anomalies: None,
            audit: None,
            signals: None,
            health: None,
            node_name: "trust-gate".to_string(),
            config: EvaluatorConfig::default(),
        }
    }

    pub fn scopes(mut self, scopes: Arc<ScopeRegistry>) -> Self {
        self.scopes = Some(scopes);
        self
    }

    pub fn policies(mut self, policies: Arc<PolicyStore>) -> Self {
        self.policies = Some(policies);
        self
    }

    pub fn baselines(mut self, baselines: Arc<BaselineStore>) -> Self {
        self.baselines = Some(baselines);
        self
    }

    /// Optional; a fresh store with default retention is used otherwise
    pub fn anomalies(mut self, anomalies: Arc<AnomalyStore>) -> Self {
        self.anomalies = Some(anomalies);
        self
    }

    /// Optional; an in-memory log is used otherwise
    pub fn audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn signals(mut self, signals: Arc<dyn SignalSource>) -> Self {
        self.signals = Some(signals);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn node_name(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = node_name.into();
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.config.max_concurrency = max_concurrency;
        self
    }

    pub fn build(self) -> Result<Evaluator> {
        if self.config.max_concurrency == 0 {
            return Err(anyhow!("max_concurrency must be at least 1"));
        }
        if self.config.timeout.is_zero() {
            return Err(anyhow!("evaluation timeout must be positive"));
        }

        Ok(Evaluator {
            scopes: self.scopes.ok_or_else(|| anyhow!("Scope registry is required"))?,
            policies: self.policies.ok_or_else(|| anyhow!("Policy store is required"))?,
            baselines: self
                .baselines
                .ok_or_else(|| anyhow!("Baseline store is required"))?,
            anomalies: self.anomalies.unwrap_or_default(),
            audit: self.audit.unwrap_or_default(),
            signals: self.signals.ok_or_else(|| anyhow!("Signal source is required"))?,
            latest: Arc::new(DashMap::new()),
            in_flight: Arc::new(DashMap::new()),
            workers: Arc::new(Semaphore::new(self.config.max_concurrency)),
            metrics: GateMetrics::new(),
            logger: StructuredLogger::new(self.node_name),
            health: self.health,
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::TimeRange;
    use crate::baseline::ObservationStore;
    use crate::models::{MetricObservation, ScopeDefinition};
    use crate::signals::{EmqReport, InMemorySignals};
    use async_trait::async_trait;
    use chrono::TimeZone;

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
    }

    fn scope(id: &str, entity: &str) -> ScopeDefinition {
        ScopeDefinition {
            scope_id: id.to_string(),
            tenant_id: "tenant-a".to_string(),
            entities: vec![entity.to_string()],
            metrics: vec!["spend".to_string()],
        }
    }

    fn observations(entities: &[&str]) -> Arc<ObservationStore> {
        let store = Arc::new(ObservationStore::default());
        for entity in entities {
            for day in 1..=7 {
                let value = if day % 2 == 0 { 95.0 } else { 105.0 };
                store
                    .ingest(MetricObservation::new(
                        *entity,
                        "spend",
                        as_of() - chrono::Duration::days(day),
                        value,
                    ))
                    .unwrap();
            }
            store
                .ingest(MetricObservation::new(
                    *entity,
                    "spend",
                    as_of() - chrono::Duration::minutes(5),
                    100.0,
                ))
                .unwrap();
        }
        store
    }

    fn emq_for(ids: &[&str]) -> InMemorySignals {
        let signals = InMemorySignals::new();
        for id in ids {
            signals.report_emq(
                id,
                EmqReport {
                    emq_score: 95.0,
                    reported_at: as_of() - chrono::Duration::hours(1),
                },
            );
        }
        signals
    }

    /// Answers after a fixed delay
    struct SlowSignals {
        delay: Duration,
        inner: InMemorySignals,
    }

    #[async_trait]
    impl SignalSource for SlowSignals {
        async fn emq(&self, scope_id: &str, as_of: DateTime<Utc>) -> Option<EmqReport> {
            tokio::time::sleep(self.delay).await;
            self.inner.emq(scope_id, as_of).await
        }
    }

    fn evaluator(signals: Arc<dyn SignalSource>, timeout: Duration) -> (Evaluator, Arc<AuditLog>) {
        let scopes = Arc::new(ScopeRegistry::new());
        scopes.register(scope("campaign-1", "ad-1"));
        scopes.register(scope("campaign-2", "ad-2"));
        let audit = Arc::new(AuditLog::new());
        let evaluator = EvaluatorBuilder::new()
            .scopes(scopes)
            .policies(Arc::new(PolicyStore::new()))
            .baselines(Arc::new(BaselineStore::new(observations(&["ad-1", "ad-2"]))))
            .audit(Arc::clone(&audit))
            .signals(signals)
            .timeout(timeout)
            .max_concurrency(2)
            .build()
            .unwrap();
        (evaluator, audit)
    }

    #[tokio::test]
    async fn test_evaluate_scope_commits_decision() {
        let (evaluator, audit) = evaluator(
            Arc::new(emq_for(&["campaign-1", "campaign-2"])),
            Duration::from_secs(5),
        );

        let latest = evaluator.evaluate_scope("campaign-1", as_of()).await.unwrap();
        assert_eq!(latest.decision.decision, GateOutcome::Pass);
        assert_eq!(latest.effective_decision(), GateOutcome::Pass);
        assert!(!latest.stale);

        assert_eq!(audit.scope_len("campaign-1"), 1);
        assert_eq!(audit.scope_len("campaign-2"), 0);
        assert!(evaluator.latest("campaign-1").is_some());
        assert!(!evaluator.is_in_flight("campaign-1"));
    }

    #[tokio::test]
    async fn test_unknown_scope() {
        let (evaluator, _) = evaluator(Arc::new(InMemorySignals::new()), Duration::from_secs(5));
        let err = evaluator.evaluate_scope("nope", as_of()).await.unwrap_err();
        assert!(matches!(err, EvaluationError::UnknownScope(_)));
    }

    #[tokio::test]
    async fn test_timeout_marks_previous_decision_stale() {
        let signals = Arc::new(SlowSignals {
            delay: Duration::from_millis(0),
            inner: emq_for(&["campaign-1"]),
        });
        let (fast, audit) = evaluator(signals, Duration::from_secs(5));
        fast.evaluate_scope("campaign-1", as_of()).await.unwrap();

        // Same stores, but a signal source too slow for the budget
        let slow = Evaluator {
            signals: Arc::new(SlowSignals {
                delay: Duration::from_millis(500),
                inner: emq_for(&["campaign-1"]),
            }),
            config: EvaluatorConfig {
                timeout: Duration::from_millis(20),
                ..fast.config.clone()
            },
            ..fast.clone()
        };

        let err = slow
            .evaluate_scope("campaign-1", as_of() + chrono::Duration::hours(1))
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::Timeout { .. }));

        let latest = fast.latest("campaign-1").unwrap();
        assert!(latest.stale);
        assert_eq!(latest.decision.decision, GateOutcome::Pass);
        assert_eq!(latest.effective_decision(), GateOutcome::Block);
        assert_eq!(audit.scope_len("campaign-1"), 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_records_nothing() {
        let signals = Arc::new(SlowSignals {
            delay: Duration::from_millis(500),
            inner: emq_for(&["campaign-1"]),
        });
        let (evaluator, audit) = evaluator(signals, Duration::from_secs(5));

        let runner = evaluator.clone();
        let handle =
            tokio::spawn(async move { runner.evaluate_scope("campaign-1", as_of()).await });

        while !evaluator.is_in_flight("campaign-1") {
            tokio::task::yield_now().await;
        }
        assert!(evaluator.cancel("campaign-1"));

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, EvaluationError::Cancelled { .. }));
        assert_eq!(audit.scope_len("campaign-1"), 0);
        assert!(evaluator.latest("campaign-1").is_none());
        assert_eq!(
            audit.history("campaign-1", TimeRange::all()).count(),
            0
        );
    }

    #[tokio::test]
    async fn test_concurrent_run_on_same_scope_is_rejected() {
        let signals = Arc::new(SlowSignals {
            delay: Duration::from_millis(200),
            inner: emq_for(&["campaign-1"]),
        });
        let (evaluator, _) = evaluator(signals, Duration::from_secs(5));

        let runner = evaluator.clone();
        let first = tokio::spawn(async move { runner.evaluate_scope("campaign-1", as_of()).await });
        while !evaluator.is_in_flight("campaign-1") {
            tokio::task::yield_now().await;
        }

        let err = evaluator
            .evaluate_scope("campaign-1", as_of())
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::AlreadyRunning(_)));
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_cycle_evaluates_scopes_independently() {
        let signals = Arc::new(SlowSignals {
            delay: Duration::from_millis(50),
            inner: emq_for(&["campaign-1", "campaign-2"]),
        });
        let (evaluator, audit) = evaluator(signals, Duration::from_secs(5));

        let report = evaluator.run_cycle(as_of()).await;
        assert_eq!(report.evaluated, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(audit.scope_len("campaign-1"), 1);
        assert_eq!(audit.scope_len("campaign-2"), 1);
    }

    #[tokio::test]
    async fn test_deactivate_cancels_and_forgets() {
        let signals = Arc::new(SlowSignals {
            delay: Duration::from_millis(500),
            inner: emq_for(&["campaign-1"]),
        });
        let (evaluator, audit) = evaluator(signals, Duration::from_secs(5));

        let runner = evaluator.clone();
        let handle =
            tokio::spawn(async move { runner.evaluate_scope("campaign-1", as_of()).await });
        while !evaluator.is_in_flight("campaign-1") {
            tokio::task::yield_now().await;
        }

        assert!(evaluator.deactivate("campaign-1"));
        assert!(handle.await.unwrap().is_err());
        assert_eq!(audit.scope_len("campaign-1"), 0);
        assert!(evaluator.scopes().get("campaign-1").is_none());
    }

    async fn finished_run(evaluator: &Evaluator, scope_id: &str) -> EvaluationOutcome {
        let scope = evaluator.scopes().get(scope_id).unwrap();
        let policy = evaluator.policies.effective(&scope.tenant_id);
        pipeline::evaluate(
            &scope,
            &policy,
            as_of(),
            &evaluator.baselines,
            evaluator.signals.as_ref(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_cancel_after_pipeline_discards_results() {
        let (evaluator, audit) = evaluator(Arc::new(emq_for(&["campaign-1"])), Duration::from_secs(5));
        let outcome = finished_run(&evaluator, "campaign-1").await;

        let (tx, _rx) = watch::channel(false);
        evaluator.in_flight.insert("campaign-1".to_string(), tx);
        assert!(evaluator.cancel("campaign-1"));

        assert!(evaluator.commit_if_active("campaign-1", outcome).is_none());
        assert_eq!(audit.scope_len("campaign-1"), 0);
        assert!(evaluator.latest("campaign-1").is_none());
    }

    #[tokio::test]
    async fn test_deactivated_scope_is_not_committed() {
        let (evaluator, audit) = evaluator(Arc::new(emq_for(&["campaign-1"])), Duration::from_secs(5));
        let outcome = finished_run(&evaluator, "campaign-1").await;

        let (tx, _rx) = watch::channel(false);
        evaluator.in_flight.insert("campaign-1".to_string(), tx);
        evaluator.scopes().deregister("campaign-1");

        assert!(evaluator.commit_if_active("campaign-1", outcome).is_none());
        assert_eq!(audit.scope_len("campaign-1"), 0);
        assert!(evaluator.latest("campaign-1").is_none());
    }

    #[tokio::test]
    async fn test_scope_removed_mid_run_records_nothing() {
        let signals = Arc::new(SlowSignals {
            delay: Duration::from_millis(200),
            inner: emq_for(&["campaign-1"]),
        });
        let (evaluator, audit) = evaluator(signals, Duration::from_secs(5));

        let runner = evaluator.clone();
        let handle =
            tokio::spawn(async move { runner.evaluate_scope("campaign-1", as_of()).await });
        while !evaluator.is_in_flight("campaign-1") {
            tokio::task::yield_now().await;
        }

        // Removed from the registry without signalling the run
        evaluator.scopes().deregister("campaign-1");

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, EvaluationError::Cancelled { .. }));
        assert_eq!(audit.scope_len("campaign-1"), 0);
        assert!(evaluator.latest("campaign-1").is_none());
    }

    #[tokio::test]
    async fn test_deactivate_tenant() {
        let (evaluator, _) = evaluator(Arc::new(InMemorySignals::new()), Duration::from_secs(5));
        assert_eq!(
            evaluator.deactivate_tenant("tenant-a"),
            vec!["campaign-1".to_string(), "campaign-2".to_string()]
        );
        assert!(evaluator.scopes().is_empty());
        assert!(evaluator.deactivate_tenant("tenant-a").is_empty());
    }

    #[test]
    fn test_builder_requires_stores() {
        assert!(EvaluatorBuilder::new().build().is_err());
        assert!(EvaluatorBuilder::new()
            .scopes(Arc::new(ScopeRegistry::new()))
            .policies(Arc::new(PolicyStore::new()))
            .baselines(Arc::new(BaselineStore::new(Arc::new(
                ObservationStore::default()
            ))))
            .signals(Arc::new(InMemorySignals::new()))
            .max_concurrency(0)
            .build()
            .is_err());
    }
}
