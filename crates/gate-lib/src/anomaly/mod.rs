//! Anomaly detection against per-series baselines
//!
//! This module provides:
//! - Z-score detection with an ordered severity tier table
//! - Parallel batch detection across independent series
//! - Retention and read-time filtering of detected anomalies

mod detector;
mod store;

pub use detector::{anomaly_id, zscore, AnomalyDetector, DEFAULT_ZSCORE_THRESHOLD, SEVERITY_TIERS};
pub use store::{AnomalyQuery, AnomalyStore, AnomalySummary};
