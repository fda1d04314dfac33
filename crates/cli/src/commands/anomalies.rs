//! Anomaly listing

use anyhow::Result;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_severity, format_time, print_json, print_success, truncate_id, OutputFormat,
};

/// Row for the anomalies table
#[derive(Tabled)]
struct AnomalyRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Detected")]
    detected_at: String,
    #[tabled(rename = "Entity")]
    entity: String,
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Baseline")]
    baseline: String,
    #[tabled(rename = "Z")]
    zscore: String,
    #[tabled(rename = "Severity")]
    severity: String,
}

/// List anomalies for a scope over a lookback window
pub async fn list_anomalies(
    client: &ApiClient,
    scope_id: &str,
    window_days: Option<u32>,
    zscore_threshold: Option<f64>,
    format: OutputFormat,
) -> Result<()> {
    let list = client
        .anomalies(scope_id, window_days, zscore_threshold)
        .await?;

    if format == OutputFormat::Json {
        return print_json(&list);
    }

    if list.anomalies.is_empty() {
        print_success(&format!(
            "No anomalies for {} in the last {} days above |z| {}",
            list.scope_id, list.window_days, list.zscore_threshold
        ));
        return Ok(());
    }

    let rows: Vec<AnomalyRow> = list
        .anomalies
        .iter()
        .map(|a| AnomalyRow {
            id: truncate_id(&a.id),
            detected_at: format_time(&a.detected_at),
            entity: a.entity_id.clone(),
            metric: a.metric_name.clone(),
            value: format!("{:.2}", a.current_value),
            baseline: format!("{:.2} ± {:.2}", a.baseline_mean, a.baseline_stddev),
            zscore: format!("{:+.2}", a.zscore),
            severity: color_severity(&a.severity),
        })
        .collect();

    let table = tabled::Table::new(rows)
        .with(tabled::settings::Style::rounded())
        .to_string();
    println!("{}", table);

    let s = &list.summary;
    println!(
        "\nTotal: {} ({} critical, {} high, {} medium, {} low)",
        s.total, s.critical, s.high, s.medium, s.low
    );

    Ok(())
}
