//! Configuration view and validation commands: `conductor config`.

use anyhow::{Result, bail};
use conductor::conductor_config::ConductorToml;
use conductor::config::Config;
use serde_json::json;

use super::super::ConfigCommands;
use super::print_json;

pub fn cmd_config(config: &Config, command: Option<ConfigCommands>) -> Result<bool> {
    let conductor = config.conductor_config();

    match command {
        None | Some(ConfigCommands::Show) => {
            let timeout = conductor.timeout();
            print_json(&json!({
                "config_file": config.config_file,
                "config_file_exists": config.config_file.exists(),
                "file": conductor.toml,
                "effective": {
                    "program": conductor.program(),
                    "workflows_dir": conductor.workflows_dir(),
                    "max_retries": conductor.max_retries(),
                    "retry_delay_secs": conductor.retry_delay().as_secs(),
                    "timeout_minutes": timeout.as_secs() / 60,
                    "auto_recovery": conductor.auto_recovery(),
                    "retention_days": conductor.retention_days(),
                    "thresholds": conductor.toml.thresholds(),
                },
            }))?;
            Ok(true)
        }
        Some(ConfigCommands::Validate) => {
            let warnings = conductor.validate();
            let registry = config.registry();
            let registry_error = registry.as_ref().err().map(|e| format!("{:#}", e));
            let valid = warnings.is_empty() && registry_error.is_none();
            print_json(&json!({
                "valid": valid,
                "warnings": warnings,
                "phases": registry.as_ref().map(|r| r.len()).ok(),
                "phases_error": registry_error,
            }))?;
            Ok(valid)
        }
        Some(ConfigCommands::Init) => {
            if config.config_file.exists() {
                bail!("Config file already exists: {}", config.config_file.display());
            }
            std::fs::create_dir_all(&config.conductor_dir)?;
            ConductorToml::default().save(&config.config_file)?;
            print_json(&json!({ "created": config.config_file }))?;
            Ok(true)
        }
    }
}
