//! Subcommand implementations

pub mod anomalies;
pub mod decision;
pub mod history;
pub mod policy;
