//! Session inspection commands: `conductor status`, `sessions`, `prune`.

use anyhow::Result;
use conductor::config::Config;
use conductor::session::SessionStore;
use serde_json::json;

use super::print_json;

pub fn cmd_status(config: &Config, session_id: Option<&str>) -> Result<bool> {
    let coordinator = config.coordinator()?;
    let report = coordinator.status(session_id)?;
    print_json(&report)?;
    Ok(true)
}

pub fn cmd_sessions(config: &Config) -> Result<bool> {
    let sessions = config.session_store().list()?;
    print_json(&json!({
        "count": sessions.len(),
        "sessions": sessions,
    }))?;
    Ok(true)
}

pub fn cmd_prune(config: &Config, days: Option<u32>) -> Result<bool> {
    let days = days.unwrap_or_else(|| config.conductor_config().retention_days());
    let report = config.session_store().prune(days)?;
    eprintln!(
        "{} {} session(s) older than {} day(s)",
        console::style("Pruned").bold(),
        report.removed_sessions.len(),
        days
    );
    print_json(&json!({
        "max_age_days": days,
        "removed_sessions": report.removed_sessions,
        "removed_artifact_dirs": report.removed_artifact_dirs,
    }))?;
    Ok(true)
}
