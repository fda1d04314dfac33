//! API client for the trust gate HTTP surface

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// API client for the trust gate
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Invalid API URL: {}", base_url);
        }

        Ok(Self { client, base_url })
    }

    /// Build an endpoint URL from path segments and query pairs
    fn endpoint(&self, segments: &[&str], query: &[(&str, String)]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("API URL cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await.context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            anyhow::bail!("API error ({}): {}", status, message);
        }

        response.json().await.context("Failed to parse response")
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client.request(method, url)
    }

    pub async fn latest_decision(&self, scope_id: &str) -> Result<LatestDecision> {
        let url = self.endpoint(&["scope", scope_id, "decision", "latest"], &[])?;
        self.send(self.request(Method::GET, url)).await
    }

    pub async fn anomalies(
        &self,
        scope_id: &str,
        window_days: Option<u32>,
        zscore_threshold: Option<f64>,
    ) -> Result<AnomalyList> {
        let mut query = Vec::new();
        if let Some(days) = window_days {
            query.push(("window_days", days.to_string()));
        }
        if let Some(threshold) = zscore_threshold {
            query.push(("zscore_threshold", threshold.to_string()));
        }
        let url = self.endpoint(&["scope", scope_id, "anomalies"], &query)?;
        self.send(self.request(Method::GET, url)).await
    }

    pub async fn decisions(
        &self,
        scope_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        offset: Option<usize>,
        limit: Option<usize>,
    ) -> Result<DecisionPage> {
        let mut query = Vec::new();
        if let Some(from) = from {
            query.push(("from", from.to_rfc3339()));
        }
        if let Some(to) = to {
            query.push(("to", to.to_rfc3339()));
        }
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        let url = self.endpoint(&["scope", scope_id, "decisions"], &query)?;
        self.send(self.request(Method::GET, url)).await
    }

    pub async fn evaluate(&self, scope_id: &str) -> Result<LatestDecision> {
        let url = self.endpoint(&["scope", scope_id, "evaluate"], &[])?;
        self.send(self.request(Method::POST, url)).await
    }

    pub async fn policy(&self, tenant_id: &str) -> Result<TenantPolicy> {
        let url = self.endpoint(&["tenant", tenant_id, "policy"], &[])?;
        self.send(self.request(Method::GET, url)).await
    }

    pub async fn set_policy(&self, tenant_id: &str, policy: &serde_json::Value) -> Result<TenantPolicy> {
        let url = self.endpoint(&["tenant", tenant_id, "policy"], &[])?;
        self.send(self.request(Method::PUT, url).json(policy)).await
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Components {
    pub emq_score: f64,
    pub freshness_score: f64,
    pub variance_score: f64,
    pub anomaly_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestDecision {
    pub scope_id: String,
    pub decision: String,
    pub recorded_decision: Option<String>,
    pub stale: bool,
    pub composite_score: Option<f64>,
    pub status: String,
    pub components: Option<Components>,
    pub reason: String,
    #[serde(default)]
    pub overriding_anomaly_ids: Vec<String>,
    pub as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: String,
    pub entity_id: String,
    pub metric_name: String,
    pub detected_at: DateTime<Utc>,
    pub current_value: f64,
    pub baseline_mean: f64,
    pub baseline_stddev: f64,
    pub zscore: f64,
    pub severity: String,
    pub direction: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeveritySummary {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    pub critical: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyList {
    pub scope_id: String,
    pub window_days: u32,
    pub zscore_threshold: f64,
    pub anomalies: Vec<Anomaly>,
    pub summary: SeveritySummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub scope_id: String,
    pub evaluated_at: DateTime<Utc>,
    pub health_score_ref: String,
    pub decision: String,
    pub reason: String,
    #[serde(default)]
    pub overriding_anomaly_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionPage {
    pub scope_id: String,
    pub items: Vec<Decision>,
    pub next_offset: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantPolicy {
    pub tenant_id: String,
    pub overridden: bool,
    /// Kept loosely typed so new policy fields pass through untouched
    pub policy: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision_body() -> String {
        serde_json::json!({
            "scope_id": "campaign-1",
            "decision": "HOLD",
            "recorded_decision": "HOLD",
            "stale": false,
            "composite_score": 72.0,
            "status": "fair",
            "components": {
                "emq_score": 70.0,
                "freshness_score": 80.0,
                "variance_score": 60.0,
                "anomaly_score": 90.0
            },
            "reason": "composite score 72.00 below hold threshold 85.00",
            "overriding_anomaly_ids": [],
            "as_of": "2024-05-10T12:00:00Z"
        })
        .to_string()
    }

    #[test]
    fn test_endpoint_encodes_segments_and_query() {
        let client = ApiClient::new("http://localhost:8080/gate/").unwrap();
        let url = client
            .endpoint(
                &["scope", "campaign 1", "anomalies"],
                &[("window_days", "7".to_string())],
            )
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/gate/scope/campaign%201/anomalies?window_days=7"
        );
    }

    #[test]
    fn test_rejects_invalid_url() {
        assert!(ApiClient::new("not a url").is_err());
        assert!(ApiClient::new("mailto:ops@example.com").is_err());
    }

    #[tokio::test]
    async fn test_latest_decision() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/scope/campaign-1/decision/latest")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(decision_body())
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let decision = client.latest_decision("campaign-1").await.unwrap();

        mock.assert_async().await;
        assert_eq!(decision.decision, "HOLD");
        assert_eq!(decision.composite_score, Some(72.0));
        assert_eq!(decision.components.unwrap().emq_score, 70.0);
    }

    #[tokio::test]
    async fn test_anomaly_query_parameters() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/scope/campaign-1/anomalies")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("window_days".into(), "14".into()),
                mockito::Matcher::UrlEncoded("zscore_threshold".into(), "3".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "scope_id": "campaign-1",
                    "window_days": 14,
                    "zscore_threshold": 3.0,
                    "anomalies": [],
                    "summary": { "low": 0, "medium": 0, "high": 0, "critical": 0, "total": 0 }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let list = client
            .anomalies("campaign-1", Some(14), Some(3.0))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(list.window_days, 14);
        assert_eq!(list.summary.total, 0);
    }

    #[tokio::test]
    async fn test_policy_rejection_surfaces_error_text() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/tenant/tenant-a/policy")
            .with_status(422)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"component weights must sum to 1.0, got 1.1"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client
            .set_policy("tenant-a", &serde_json::json!({ "weights": {} }))
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("422"));
        assert!(message.contains("must sum to 1.0"));
    }
}
