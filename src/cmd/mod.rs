//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled                  |
//! |-----------|-----------------------------------|
//! | `run`     | `Execute`, `Resume`, `Phase`      |
//! | `session` | `Status`, `Sessions`, `Prune`     |
//! | `config`  | `Config`                          |
//!
//! Every command writes exactly one JSON document to stdout and returns
//! whether it succeeded; `main` maps `false` to exit code 1.

pub mod config;
pub mod run;
pub mod session;

pub use config::cmd_config;
pub use run::{cmd_execute, cmd_phase, cmd_resume};
pub use session::{cmd_prune, cmd_sessions, cmd_status};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Parse the optional `[context]` argument.
///
/// A value starting with `{` must be a JSON object; anything else is taken
/// as the project path.
pub fn parse_context(raw: Option<&str>) -> Result<BTreeMap<String, Value>> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(BTreeMap::new());
    };

    if raw.starts_with('{') {
        let value: Value = serde_json::from_str(raw).context("Context is not valid JSON")?;
        let Value::Object(map) = value else {
            bail!("Context must be a JSON object");
        };
        return Ok(map.into_iter().collect());
    }

    Ok(BTreeMap::from([(
        conductor::phase::PROJECT_PATH_KEY.to_string(),
        Value::String(raw.to_string()),
    )]))
}

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize result")?;
    println!("{}", json);
    Ok(())
}
