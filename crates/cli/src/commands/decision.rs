//! Latest decision and on-demand evaluation

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, LatestDecision};
use crate::output::{
    color_decision, color_status, format_score, print_info, print_json, print_warning,
    OutputFormat,
};

/// Row for the component breakdown table
#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    component: &'static str,
    #[tabled(rename = "Score")]
    score: String,
}

/// Show the decision the automation gateway would act on
pub async fn show_decision(client: &ApiClient, scope_id: &str, format: OutputFormat) -> Result<()> {
    let decision = client.latest_decision(scope_id).await?;
    render(&decision, format)
}

/// Evaluate a scope immediately and show the resulting decision
pub async fn evaluate(client: &ApiClient, scope_id: &str, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Table {
        print_info(&format!("Evaluating {}...", scope_id));
    }
    let decision = client.evaluate(scope_id).await?;
    render(&decision, format)
}

fn render(decision: &LatestDecision, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(decision);
    }

    println!("Scope:     {}", decision.scope_id);
    println!("Decision:  {}", color_decision(&decision.decision));
    if let Some(recorded) = &decision.recorded_decision {
        if recorded != &decision.decision {
            println!("Recorded:  {}", color_decision(recorded));
        }
    }
    println!("Status:    {}", color_status(&decision.status));
    println!("Composite: {}", format_score(decision.composite_score));
    if let Some(as_of) = &decision.as_of {
        println!("As of:     {}", as_of.to_rfc3339());
    }
    println!("Reason:    {}", decision.reason);

    if decision.stale {
        print_warning("Latest evaluation timed out; previous decision is stale");
    }

    if let Some(components) = &decision.components {
        let rows = vec![
            ComponentRow {
                component: "EMQ",
                score: format_score(Some(components.emq_score)),
            },
            ComponentRow {
                component: "Freshness",
                score: format_score(Some(components.freshness_score)),
            },
            ComponentRow {
                component: "Variance",
                score: format_score(Some(components.variance_score)),
            },
            ComponentRow {
                component: "Anomaly",
                score: format_score(Some(components.anomaly_score)),
            },
        ];
        let table = tabled::Table::new(rows)
            .with(tabled::settings::Style::rounded())
            .to_string();
        println!("\n{}", table);
    }

    if !decision.overriding_anomaly_ids.is_empty() {
        println!("\nOverriding anomalies:");
        for id in &decision.overriding_anomaly_ids {
            println!("  {}", id);
        }
    }

    Ok(())
}
