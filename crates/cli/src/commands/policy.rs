//! Tenant policy commands

use anyhow::{Context, Result};
use std::path::Path;
use tabled::Tabled;

use crate::client::{ApiClient, TenantPolicy};
use crate::output::{print_json, print_success, OutputFormat};

/// Row for the policy table
#[derive(Tabled)]
struct PolicyRow {
    #[tabled(rename = "Setting")]
    setting: String,
    #[tabled(rename = "Value")]
    value: String,
}

/// Show the policy in force for a tenant
pub async fn get_policy(client: &ApiClient, tenant_id: &str, format: OutputFormat) -> Result<()> {
    let policy = client.policy(tenant_id).await?;
    render(&policy, format)
}

/// Replace a tenant's policy override with the contents of a JSON file
pub async fn set_policy(
    client: &ApiClient,
    tenant_id: &str,
    file: &Path,
    format: OutputFormat,
) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read policy file {}", file.display()))?;
    let body: serde_json::Value =
        serde_json::from_str(&content).context("Policy file is not valid JSON")?;

    let policy = client.set_policy(tenant_id, &body).await?;
    if format == OutputFormat::Table {
        print_success(&format!("Policy updated for tenant {}", tenant_id));
    }
    render(&policy, format)
}

fn render(policy: &TenantPolicy, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(policy);
    }

    let mut rows = Vec::new();
    for (key, value) in &policy.policy {
        match value.as_object() {
            Some(nested) => {
                for (inner, v) in nested {
                    rows.push(PolicyRow {
                        setting: format!("{}.{}", key, inner),
                        value: v.to_string(),
                    });
                }
            }
            None => rows.push(PolicyRow {
                setting: key.clone(),
                value: value.to_string(),
            }),
        }
    }

    println!(
        "Tenant: {} ({})",
        policy.tenant_id,
        if policy.overridden { "override" } else { "default policy" }
    );
    let table = tabled::Table::new(rows)
        .with(tabled::settings::Style::rounded())
        .to_string();
    println!("{}", table);

    Ok(())
}
