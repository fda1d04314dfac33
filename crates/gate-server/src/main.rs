//! Trust gate - fail-closed health gate for ad-platform automation
//!
//! Ingests metric observations, evaluates every registered scope on a
//! fixed cadence and serves the latest PASS / HOLD / BLOCK decision.

use anyhow::{Context, Result};
use gate_lib::{
    anomaly::AnomalyStore,
    audit::AuditLog,
    baseline::{BaselineStore, ObservationStore},
    evaluator::EvaluatorBuilder,
    health::{components, HealthRegistry},
    observability::{GateMetrics, StructuredLogger},
    policy::PolicyStore,
    scope::ScopeRegistry,
    signals::InMemorySignals,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use trust_gate::{api, config::GateConfig};

const GATE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting trust-gate");

    let config = GateConfig::load()?;
    info!(
        node_name = %config.node_name,
        api_port = config.api_port,
        interval_secs = config.evaluation_interval_secs,
        timeout_secs = config.evaluation_timeout_secs,
        max_concurrency = config.max_concurrent_evaluations,
        "Trust gate configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::INGEST).await;
    health_registry.register(components::BASELINE_STORE).await;
    health_registry.register(components::EVALUATOR).await;
    health_registry.register(components::AUDIT_LOG).await;

    let metrics = GateMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);
    logger.log_startup(GATE_VERSION);

    let audit = match &config.audit_log_path {
        Some(path) => AuditLog::with_persistence(path)
            .with_context(|| format!("Failed to open audit log at {}", path.display()))?,
        None => {
            warn!("No audit log path configured, decisions are kept in memory only");
            AuditLog::new()
        }
    };
    let audit = Arc::new(audit);
    metrics.set_audit_records(audit.len() as i64);

    let observations = Arc::new(ObservationStore::new(config.observation_retention_days));
    let baselines = Arc::new(BaselineStore::new(Arc::clone(&observations)));
    let anomalies = Arc::new(AnomalyStore::new(config.observation_retention_days));
    let policies = Arc::new(PolicyStore::new());
    let signals = Arc::new(InMemorySignals::new());

    let evaluator = EvaluatorBuilder::new()
        .scopes(Arc::new(ScopeRegistry::new()))
        .policies(Arc::clone(&policies))
        .baselines(baselines)
        .anomalies(Arc::clone(&anomalies))
        .audit(Arc::clone(&audit))
        .signals(signals.clone())
        .health(health_registry.clone())
        .node_name(&config.node_name)
        .interval(config.evaluation_interval())
        .timeout(config.evaluation_timeout())
        .max_concurrency(config.max_concurrent_evaluations)
        .build()?;

    let app_state = Arc::new(api::AppState {
        health_registry: health_registry.clone(),
        metrics,
        logger: logger.clone(),
        evaluator: evaluator.clone(),
        observations,
        anomalies,
        audit,
        policies,
        signals,
    });

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let evaluator_handle = tokio::spawn(evaluator.run(shutdown_tx.subscribe()));
    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    // Mark gate as ready after initialization
    health_registry.set_ready(true).await;

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    let _ = shutdown_tx.send(());

    if let Err(e) = evaluator_handle.await {
        warn!(error = %e, "Evaluation loop ended abnormally");
    }
    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server ended with error"),
        Err(e) => warn!(error = %e, "API server task failed"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}
