//! Per-series baseline statistics
//!
//! This module provides:
//! - An in-memory observation store fed by the upstream ingestion pipeline
//! - Rolling baseline snapshots over a lookback window that excludes the
//!   evaluation day itself

mod observations;
mod store;

pub use observations::{IngestError, IngestSummary, ObservationStore};
pub use store::{
    summarize, BaselineError, BaselineSnapshot, BaselineStore, MIN_BASELINE_SAMPLES,
    SUPPORTED_WINDOWS,
};
