//! Decision audit history

use anyhow::Result;
use chrono::{DateTime, Utc};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{color_decision, format_time, print_info, print_json, print_warning, OutputFormat};

/// Row for the history table
#[derive(Tabled)]
struct DecisionRow {
    #[tabled(rename = "Evaluated")]
    evaluated_at: String,
    #[tabled(rename = "Decision")]
    decision: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Show recorded decisions for a scope, oldest first
pub async fn show_history(
    client: &ApiClient,
    scope_id: &str,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    offset: Option<usize>,
    limit: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let page = client.decisions(scope_id, from, to, offset, limit).await?;

    if format == OutputFormat::Json {
        return print_json(&page);
    }

    if page.items.is_empty() {
        print_warning(&format!("No decisions recorded for {}", scope_id));
        return Ok(());
    }

    let rows: Vec<DecisionRow> = page
        .items
        .iter()
        .map(|d| DecisionRow {
            evaluated_at: format_time(&d.evaluated_at),
            decision: color_decision(&d.decision),
            reason: d.reason.clone(),
        })
        .collect();

    let table = tabled::Table::new(rows)
        .with(tabled::settings::Style::rounded())
        .to_string();
    println!("{}", table);

    if let Some(next) = page.next_offset {
        print_info(&format!("More decisions available: --offset {}", next));
    }

    Ok(())
}
