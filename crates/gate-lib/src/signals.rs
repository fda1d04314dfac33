//! Platform signal sources
//!
//! Event match quality is reported by the ad platform rather than derived
//! from observations, so it arrives through a pluggable source.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Latest EMQ report for a scope
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmqReport {
    pub emq_score: f64,
    pub reported_at: DateTime<Utc>,
}

/// Supplier of per-scope platform signals
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Most recent EMQ report at or before `as_of`, if any
    async fn emq(&self, scope_id: &str, as_of: DateTime<Utc>) -> Option<EmqReport>;
}

/// Signal source backed by reports pushed into memory
#[derive(Debug, Default)]
pub struct InMemorySignals {
    emq: DashMap<String, Vec<EmqReport>>,
}

impl InMemorySignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an EMQ report; reports are kept in `reported_at` order
    pub fn report_emq(&self, scope_id: &str, report: EmqReport) {
        let mut reports = self.emq.entry(scope_id.to_string()).or_default();
        let at = reports.partition_point(|r| r.reported_at <= report.reported_at);
        reports.insert(at, report);
    }

    pub fn forget(&self, scope_id: &str) {
        self.emq.remove(scope_id);
    }
}

#[async_trait]
impl SignalSource for InMemorySignals {
    async fn emq(&self, scope_id: &str, as_of: DateTime<Utc>) -> Option<EmqReport> {
        let reports = self.emq.get(scope_id)?;
        let idx = reports.partition_point(|r| r.reported_at <= as_of);
        idx.checked_sub(1).map(|i| reports[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_latest_report_as_of() {
        let signals = InMemorySignals::new();
        signals.report_emq(
            "campaign-1",
            EmqReport {
                emq_score: 80.0,
                reported_at: at(8),
            },
        );
        signals.report_emq(
            "campaign-1",
            EmqReport {
                emq_score: 60.0,
                reported_at: at(12),
            },
        );

        assert_eq!(signals.emq("campaign-1", at(10)).await.unwrap().emq_score, 80.0);
        assert_eq!(signals.emq("campaign-1", at(13)).await.unwrap().emq_score, 60.0);
        assert!(signals.emq("campaign-1", at(7)).await.is_none());
        assert!(signals.emq("campaign-2", at(13)).await.is_none());
    }

    #[tokio::test]
    async fn test_forget_scope() {
        let signals = InMemorySignals::new();
        signals.report_emq(
            "campaign-1",
            EmqReport {
                emq_score: 80.0,
                reported_at: at(8),
            },
        );
        signals.forget("campaign-1");
        assert!(signals.emq("campaign-1", at(9)).await.is_none());
    }
}
