//! Per-scope evaluation
//!
//! Each scope is evaluated independently: one task per scope per cycle on a
//! bounded pool, each with its own timeout and cancellation signal.

mod pipeline;
mod scheduler;

pub use pipeline::{evaluate, EvaluationOutcome};
pub use scheduler::{
    CycleReport, Evaluator, EvaluatorBuilder, EvaluatorConfig, LatestDecision,
    DEFAULT_EVALUATION_INTERVAL, DEFAULT_EVALUATION_TIMEOUT, DEFAULT_MAX_CONCURRENCY,
};

use crate::audit::AuditError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("evaluation of {scope_id} timed out after {after:?}")]
    Timeout { scope_id: String, after: Duration },
    #[error("evaluation of {scope_id} was cancelled")]
    Cancelled { scope_id: String },
    #[error("unknown scope {0}")]
    UnknownScope(String),
    #[error("evaluation of {0} is already in flight")]
    AlreadyRunning(String),
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error("evaluation worker failed: {0}")]
    Worker(String),
}
