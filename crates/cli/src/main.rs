//! Trust gate CLI
//!
//! A command-line tool for reading gate decisions, inspecting anomalies
//! and decision history, and managing tenant policy.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use commands::{anomalies, decision, history, policy};
use std::path::PathBuf;

/// Trust gate CLI
#[derive(Parser)]
#[command(name = "tgctl")]
#[command(author, version, about = "CLI for the trust gate", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via TG_API_URL env var)
    #[arg(long, env = "TG_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the latest gate decision for a scope
    Decision {
        /// Scope ID
        scope: String,
    },

    /// List anomalies for a scope
    Anomalies {
        /// Scope ID
        scope: String,

        /// Lookback in days (1-90)
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=90))]
        window_days: Option<u32>,

        /// Only show anomalies with |z| above this value
        #[arg(long)]
        zscore_threshold: Option<f64>,
    },

    /// Show recorded decisions for a scope
    History {
        /// Scope ID
        scope: String,

        /// Start of range (RFC 3339, inclusive)
        #[arg(long)]
        from: Option<DateTime<Utc>>,

        /// End of range (RFC 3339, exclusive)
        #[arg(long)]
        to: Option<DateTime<Utc>>,

        /// Resume from a previous page
        #[arg(long)]
        offset: Option<usize>,

        /// Maximum decisions to show
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Evaluate a scope now
    Evaluate {
        /// Scope ID
        scope: String,
    },

    /// Tenant policy management
    #[command(subcommand)]
    Policy(PolicyCommands),
}

#[derive(Subcommand)]
pub enum PolicyCommands {
    /// Show the policy in force for a tenant
    Get {
        /// Tenant ID
        tenant: String,
    },

    /// Set a tenant's policy override from a JSON file
    Set {
        /// Tenant ID
        tenant: String,

        /// Path to the policy JSON
        #[arg(long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = config::Config::load()?;
    let format = settings.format(cli.format);
    let client = client::ApiClient::new(&settings.api_url(cli.api_url.as_deref()))?;

    match cli.command {
        Commands::Decision { scope } => {
            decision::show_decision(&client, &scope, format).await?;
        }
        Commands::Anomalies {
            scope,
            window_days,
            zscore_threshold,
        } => {
            anomalies::list_anomalies(&client, &scope, window_days, zscore_threshold, format)
                .await?;
        }
        Commands::History {
            scope,
            from,
            to,
            offset,
            limit,
        } => {
            history::show_history(&client, &scope, from, to, offset, limit, format).await?;
        }
        Commands::Evaluate { scope } => {
            decision::evaluate(&client, &scope, format).await?;
        }
        Commands::Policy(policy_cmd) => match policy_cmd {
            PolicyCommands::Get { tenant } => {
                policy::get_policy(&client, &tenant, format).await?;
            }
            PolicyCommands::Set { tenant, file } => {
                policy::set_policy(&client, &tenant, &file, format).await?;
            }
        },
    }

    Ok(())
}
