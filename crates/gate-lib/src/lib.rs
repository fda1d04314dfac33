//! Trust gate library
//!
//! This crate provides the core functionality for:
//! - Per-series statistical baselines over ingested observations
//! - Z-score anomaly detection with tiered severity
//! - Composite signal health scoring
//! - The PASS / HOLD / BLOCK decision gate and its audit log
//! - Bounded, cancellable per-scope evaluation
//! - Health checks and observability

pub mod anomaly;
pub mod audit;
pub mod baseline;
pub mod evaluator;
pub mod gate;
pub mod health;
pub mod models;
pub mod observability;
pub mod policy;
pub mod scope;
pub mod scoring;
pub mod signals;

pub use anomaly::{AnomalyDetector, AnomalyQuery, AnomalyStore, AnomalySummary};
pub use audit::{AuditError, AuditLog, DecisionHistory, TimeRange};
pub use baseline::{BaselineError, BaselineStore, ObservationStore};
pub use evaluator::{EvaluationError, Evaluator, EvaluatorBuilder, LatestDecision};
pub use gate::DecisionGate;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{GateMetrics, StructuredLogger};
pub use policy::{ComponentWeights, ConfigError, GatePolicy, PolicyStore};
pub use scope::ScopeRegistry;
pub use scoring::{HealthInputs, HealthScorer};
pub use signals::{EmqReport, InMemorySignals, SignalSource};
