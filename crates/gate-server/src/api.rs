//! HTTP API: decision read surface, ingestion, tenant policy, health and metrics

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use gate_lib::{
    anomaly::{AnomalyQuery, AnomalyStore, AnomalySummary},
    audit::{AuditError, AuditLog, TimeRange},
    baseline::{IngestSummary, ObservationStore},
    evaluator::{EvaluationError, Evaluator, LatestDecision},
    gate::fail_closed,
    health::{ComponentStatus, HealthRegistry},
    models::{
        Anomaly, Decision, GateOutcome, HealthComponents, HealthStatus, MetricObservation,
        ScopeDefinition,
    },
    observability::{GateMetrics, StructuredLogger},
    policy::{GatePolicy, PolicyStore, MAX_WINDOW_DAYS, MIN_WINDOW_DAYS},
    signals::{EmqReport, InMemorySignals},
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

/// Default and maximum page size for decision history
const DEFAULT_HISTORY_LIMIT: usize = 100;
const MAX_HISTORY_LIMIT: usize = 1000;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: GateMetrics,
    pub logger: StructuredLogger,
    pub evaluator: Evaluator,
    pub observations: Arc<ObservationStore>,
    pub anomalies: Arc<AnomalyStore>,
    pub audit: Arc<AuditLog>,
    pub policies: Arc<PolicyStore>,
    pub signals: Arc<InMemorySignals>,
}

/// Error body returned by every failing route
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<EvaluationError> for ApiError {
    fn from(e: EvaluationError) -> Self {
        let status = match &e {
            EvaluationError::UnknownScope(_) => StatusCode::NOT_FOUND,
            EvaluationError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            EvaluationError::Cancelled { .. } | EvaluationError::AlreadyRunning(_) => {
                StatusCode::CONFLICT
            }
            EvaluationError::Audit(AuditError::OutOfOrder { .. }) => StatusCode::CONFLICT,
            EvaluationError::Audit(_) | EvaluationError::Worker(_) => {
                error!(error = %e, "Evaluation failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, e.to_string())
    }
}

/// What the automation gateway reads before acting
#[derive(Debug, Serialize, Deserialize)]
pub struct LatestDecisionResponse {
    pub scope_id: String,
    /// Decision to act on; BLOCK whenever the record is stale or missing
    pub decision: GateOutcome,
    pub recorded_decision: Option<GateOutcome>,
    pub stale: bool,
    pub composite_score: Option<f64>,
    pub status: HealthStatus,
    pub components: Option<HealthComponents>,
    pub reason: String,
    pub overriding_anomaly_ids: Vec<String>,
    pub as_of: Option<DateTime<Utc>>,
}

impl From<LatestDecision> for LatestDecisionResponse {
    fn from(latest: LatestDecision) -> Self {
        let decision = latest.effective_decision();
        let reason = if latest.stale {
            format!(
                "latest evaluation timed out, failing closed; last recorded: {}",
                latest.decision.reason
            )
        } else {
            latest.decision.reason
        };
        Self {
            scope_id: latest.decision.scope_id,
            decision,
            recorded_decision: Some(latest.decision.decision),
            stale: latest.stale,
            composite_score: Some(latest.health.composite_score),
            status: latest.health.status,
            components: Some(latest.health.components),
            reason,
            overriding_anomaly_ids: latest.decision.overriding_anomaly_ids,
            as_of: Some(latest.health.as_of),
        }
    }
}

impl LatestDecisionResponse {
    /// A decision from the audit log whose health score is no longer held
    fn from_record(record: Decision) -> Self {
        Self {
            scope_id: record.scope_id,
            decision: GateOutcome::Block,
            recorded_decision: Some(record.decision),
            stale: true,
            composite_score: None,
            status: HealthStatus::Unknown,
            components: None,
            reason: format!(
                "not re-evaluated since restart, failing closed; last recorded: {}",
                record.reason
            ),
            overriding_anomaly_ids: record.overriding_anomaly_ids,
            as_of: Some(record.evaluated_at),
        }
    }

    fn absent(scope_id: &str) -> Self {
        let blocked = fail_closed(scope_id, Utc::now(), "no decision on record, failing closed");
        Self {
            scope_id: blocked.scope_id,
            decision: blocked.decision,
            recorded_decision: None,
            stale: false,
            composite_score: None,
            status: HealthStatus::Unknown,
            components: None,
            reason: blocked.reason,
            overriding_anomaly_ids: Vec::new(),
            as_of: None,
        }
    }
}

async fn latest_decision(
    State(state): State<Arc<AppState>>,
    Path(scope_id): Path<String>,
) -> Json<LatestDecisionResponse> {
    let response = match state.evaluator.latest(&scope_id) {
        Some(latest) => latest.into(),
        None => match state.audit.latest(&scope_id) {
            Some(record) => LatestDecisionResponse::from_record(record),
            None => LatestDecisionResponse::absent(&scope_id),
        },
    };
    Json(response)
}

#[derive(Debug, Deserialize)]
pub struct AnomalyParams {
    pub window_days: Option<u32>,
    pub zscore_threshold: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnomaliesResponse {
    pub scope_id: String,
    pub window_days: u32,
    pub zscore_threshold: f64,
    pub anomalies: Vec<Anomaly>,
    pub summary: AnomalySummary,
}

async fn scope_anomalies(
    State(state): State<Arc<AppState>>,
    Path(scope_id): Path<String>,
    Query(params): Query<AnomalyParams>,
) -> Result<Json<AnomaliesResponse>, ApiError> {
    let scope = state
        .evaluator
        .scopes()
        .get(&scope_id)
        .ok_or_else(|| ApiError::not_found(format!("unknown scope {scope_id}")))?;
    let policy = state.policies.effective(&scope.tenant_id);

    let window_days = params.window_days.unwrap_or(policy.window_days);
    if !(MIN_WINDOW_DAYS..=MAX_WINDOW_DAYS).contains(&window_days) {
        return Err(ApiError::bad_request(format!(
            "window_days {window_days} outside [{MIN_WINDOW_DAYS}, {MAX_WINDOW_DAYS}]"
        )));
    }
    let zscore_threshold = params.zscore_threshold.unwrap_or(policy.zscore_threshold);
    if !zscore_threshold.is_finite() || zscore_threshold < 0.0 {
        return Err(ApiError::bad_request(format!(
            "zscore_threshold {zscore_threshold} must be a non-negative number"
        )));
    }

    let query = AnomalyQuery::window(Utc::now(), window_days).with_min_abs_zscore(zscore_threshold);
    let anomalies = state.anomalies.query(&scope.series(), &query);
    let summary = AnomalySummary::from_anomalies(&anomalies);

    Ok(Json(AnomaliesResponse {
        scope_id,
        window_days,
        zscore_threshold,
        anomalies,
        summary,
    }))
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub scope_id: String,
    pub items: Vec<Decision>,
    /// Pass back as `offset` to continue; absent once exhausted
    pub next_offset: Option<usize>,
}

async fn decision_history(
    State(state): State<Arc<AppState>>,
    Path(scope_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Json<HistoryResponse> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let range = TimeRange {
        from: params.from,
        to: params.to,
    };

    let mut history = state
        .audit
        .history_from(&scope_id, range, params.offset.unwrap_or(0));
    let items: Vec<Decision> = history.by_ref().take(limit).collect();
    let next_offset = history.has_more().then(|| history.offset());

    Json(HistoryResponse {
        scope_id,
        items,
        next_offset,
    })
}

async fn evaluate_now(
    State(state): State<Arc<AppState>>,
    Path(scope_id): Path<String>,
) -> Result<Json<LatestDecisionResponse>, ApiError> {
    let latest = state.evaluator.evaluate_scope(&scope_id, Utc::now()).await?;
    Ok(Json(latest.into()))
}

#[derive(Debug, Deserialize)]
pub struct ScopeRequest {
    pub tenant_id: String,
    pub entities: Vec<String>,
    pub metrics: Vec<String>,
}

async fn register_scope(
    State(state): State<Arc<AppState>>,
    Path(scope_id): Path<String>,
    Json(request): Json<ScopeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.tenant_id.is_empty() || request.entities.is_empty() || request.metrics.is_empty() {
        return Err(ApiError::bad_request(
            "tenant_id, entities and metrics must be non-empty",
        ));
    }

    let scope = ScopeDefinition {
        scope_id,
        tenant_id: request.tenant_id,
        entities: request.entities,
        metrics: request.metrics,
    };
    let scopes = state.evaluator.scopes();
    let is_new = scopes.register(scope.clone());
    state.metrics.set_scopes_registered(scopes.len() as i64);

    let status = if is_new {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(scope)))
}

async fn deactivate_scope(
    State(state): State<Arc<AppState>>,
    Path(scope_id): Path<String>,
) -> StatusCode {
    if state.evaluator.deactivate(&scope_id) {
        state.signals.forget(&scope_id);
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[derive(Debug, Serialize)]
pub struct TenantDeactivation {
    pub tenant_id: String,
    pub deactivated: Vec<String>,
}

/// Deactivate every scope of a tenant, cancelling runs in progress
async fn deactivate_tenant(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> Json<TenantDeactivation> {
    let deactivated = state.evaluator.deactivate_tenant(&tenant_id);
    for scope_id in &deactivated {
        state.signals.forget(scope_id);
    }
    info!(tenant_id = %tenant_id, scopes = deactivated.len(), "Deactivated tenant");
    Json(TenantDeactivation {
        tenant_id,
        deactivated,
    })
}

#[derive(Debug, Deserialize)]
pub struct SignalsRequest {
    pub emq_score: f64,
    pub reported_at: Option<DateTime<Utc>>,
}

async fn report_signals(
    State(state): State<Arc<AppState>>,
    Path(scope_id): Path<String>,
    Json(request): Json<SignalsRequest>,
) -> Result<StatusCode, ApiError> {
    if !request.emq_score.is_finite() || !(0.0..=100.0).contains(&request.emq_score) {
        return Err(ApiError::bad_request(format!(
            "emq_score {} outside [0, 100]",
            request.emq_score
        )));
    }
    state.signals.report_emq(
        &scope_id,
        EmqReport {
            emq_score: request.emq_score,
            reported_at: request.reported_at.unwrap_or_else(Utc::now),
        },
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn ingest_observations(
    State(state): State<Arc<AppState>>,
    Json(observations): Json<Vec<MetricObservation>>,
) -> Json<IngestSummary> {
    let summary = state.observations.ingest_batch(observations);
    state
        .metrics
        .add_observations(summary.accepted as u64, summary.rejected as u64);
    Json(summary)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PolicyResponse {
    pub tenant_id: String,
    /// False when the tenant runs on the default policy
    pub overridden: bool,
    pub policy: GatePolicy,
}

async fn get_policy(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> Json<PolicyResponse> {
    Json(PolicyResponse {
        overridden: state.policies.has_override(&tenant_id),
        policy: state.policies.effective(&tenant_id),
        tenant_id,
    })
}

async fn put_policy(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<PolicyResponse>, ApiError> {
    let policy: GatePolicy = match serde_json::from_value(body) {
        Ok(policy) => policy,
        Err(e) => {
            let message = format!("invalid policy: {e}");
            state.logger.log_policy_update(&tenant_id, false, &message);
            return Err(ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, message));
        }
    };
    if let Err(e) = state.policies.set_override(&tenant_id, policy) {
        state
            .logger
            .log_policy_update(&tenant_id, false, &e.to_string());
        return Err(ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()));
    }
    state.logger.log_policy_update(&tenant_id, true, "");
    Ok(Json(PolicyResponse {
        tenant_id,
        overridden: true,
        policy,
    }))
}

async fn delete_policy(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> StatusCode {
    if state.policies.clear_override(&tenant_id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still serving decisions
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/scope/:id", put(register_scope).delete(deactivate_scope))
        .route("/scope/:id/decision/latest", get(latest_decision))
        .route("/scope/:id/anomalies", get(scope_anomalies))
        .route("/scope/:id/decisions", get(decision_history))
        .route("/scope/:id/evaluate", post(evaluate_now))
        .route("/scope/:id/signals", put(report_signals))
        .route("/observations", post(ingest_observations))
        .route(
            "/tenant/:id/policy",
            get(get_policy).put(put_policy).delete(delete_policy),
        )
        .route("/tenant/:id/scopes", delete(deactivate_tenant))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server, stopping on shutdown
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
