//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::{Deserialize, Serialize};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print any response as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Color a gate decision
pub fn color_decision(decision: &str) -> String {
    match decision.to_uppercase().as_str() {
        "PASS" => decision.green().bold().to_string(),
        "HOLD" => decision.yellow().bold().to_string(),
        "BLOCK" => decision.red().bold().to_string(),
        _ => decision.to_string(),
    }
}

/// Color a health status
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "healthy" => status.green().to_string(),
        "fair" => status.blue().to_string(),
        "degraded" => status.yellow().to_string(),
        "critical" => status.red().to_string(),
        "unknown" => status.dimmed().to_string(),
        _ => status.to_string(),
    }
}

/// Color an anomaly severity
pub fn color_severity(severity: &str) -> String {
    match severity.to_lowercase().as_str() {
        "critical" => severity.red().bold().to_string(),
        "high" => severity.red().to_string(),
        "medium" => severity.yellow().to_string(),
        "low" => severity.blue().to_string(),
        _ => severity.to_string(),
    }
}

/// Format a 0-100 score, or a dash when absent
pub fn format_score(score: Option<f64>) -> String {
    match score {
        Some(score) => format!("{:.2}", score),
        None => "-".to_string(),
    }
}

/// Format a timestamp for tables
pub fn format_time(at: &chrono::DateTime<chrono::Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Shorten long identifiers for table display
pub fn truncate_id(id: &str) -> String {
    if id.chars().count() > 16 {
        let head: String = id.chars().take(16).collect();
        format!("{}…", head)
    } else {
        id.to_string()
    }
}
