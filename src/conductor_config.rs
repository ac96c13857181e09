//! Project configuration read from `.conductor/conductor.toml`.
//!
//! Settings are layered: file, then environment, then CLI flags.
//!
//! ```toml
//! [workflow]
//! max_retries = 3
//! retry_delay_secs = 5
//! timeout_minutes = 30
//! auto_recovery = true
//!
//! [quality]
//! default_threshold = 0.75
//!
//! [quality.thresholds]
//! "4" = 0.90
//!
//! [sessions]
//! retention_days = 7
//!
//! [executor]
//! program = "python"
//! workflows_dir = "workflows"
//! ```
//!
//! Environment overrides: `CONDUCTOR_PROGRAM`, `CONDUCTOR_MAX_RETRIES`,
//! `CONDUCTOR_TIMEOUT_MINUTES`, `CONDUCTOR_AUTO_RECOVERY`.

use crate::gates::{QualityGateEvaluator, default_thresholds};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "conductor.toml";

/// Retry, timeout and recovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,
    #[serde(default = "default_auto_recovery")]
    pub auto_recovery: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_timeout_minutes() -> u64 {
    30
}

fn default_auto_recovery() -> bool {
    true
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            timeout_minutes: default_timeout_minutes(),
            auto_recovery: default_auto_recovery(),
        }
    }
}

/// Quality gate thresholds. Keys of `thresholds` are phase ordinals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualitySection {
    #[serde(default = "default_threshold")]
    pub default_threshold: f64,
    #[serde(default)]
    pub thresholds: BTreeMap<String, f64>,
}

fn default_threshold() -> f64 {
    crate::gates::DEFAULT_THRESHOLD
}

impl Default for QualitySection {
    fn default() -> Self {
        Self {
            default_threshold: default_threshold(),
            thresholds: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsSection {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_retention_days() -> u32 {
    7
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

/// How phase scripts are launched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorSection {
    /// Interpreter for phase scripts (default: "python")
    #[serde(default)]
    pub program: Option<String>,
    /// Directory holding phase scripts, relative to the project
    #[serde(default)]
    pub workflows_dir: Option<PathBuf>,
}

/// The complete conductor.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConductorToml {
    #[serde(default)]
    pub workflow: WorkflowSection,
    #[serde(default)]
    pub quality: QualitySection,
    #[serde(default)]
    pub sessions: SessionsSection,
    #[serde(default)]
    pub executor: ExecutorSection,
}

impl ConductorToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse conductor.toml")
    }

    /// Load `.conductor/conductor.toml`, or defaults when it is absent.
    pub fn load_or_default(conductor_dir: &Path) -> Result<Self> {
        let config_path = conductor_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize conductor.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Executor program (env overrides file).
    pub fn program(&self) -> String {
        std::env::var("CONDUCTOR_PROGRAM")
            .ok()
            .filter(|p| !p.is_empty())
            .or_else(|| self.executor.program.clone())
            .unwrap_or_else(|| "python".to_string())
    }

    pub fn max_retries(&self) -> u32 {
        env_parse("CONDUCTOR_MAX_RETRIES").unwrap_or(self.workflow.max_retries)
    }

    pub fn timeout_minutes(&self) -> u64 {
        env_parse("CONDUCTOR_TIMEOUT_MINUTES").unwrap_or(self.workflow.timeout_minutes)
    }

    pub fn auto_recovery(&self) -> bool {
        match std::env::var("CONDUCTOR_AUTO_RECOVERY") {
            Ok(value) => value != "false" && value != "0",
            Err(_) => self.workflow.auto_recovery,
        }
    }

    /// Threshold table: built-in defaults overlaid with configured ones.
    /// Keys that are not ordinals are ignored (`validate` reports them).
    pub fn thresholds(&self) -> BTreeMap<u32, f64> {
        let mut table = default_thresholds();
        for (key, value) in &self.quality.thresholds {
            if let Ok(ordinal) = key.trim().parse::<u32>() {
                table.insert(ordinal, *value);
            }
        }
        table
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if !(0.0..=1.0).contains(&self.quality.default_threshold) {
            warnings.push(format!(
                "Invalid default_threshold {}: should be between 0.0 and 1.0",
                self.quality.default_threshold
            ));
        }

        for (key, value) in &self.quality.thresholds {
            if key.trim().parse::<u32>().is_err() {
                warnings.push(format!(
                    "Invalid threshold key '{}': should be a phase number",
                    key
                ));
            }
            if !(0.0..=1.0).contains(value) {
                warnings.push(format!(
                    "Invalid threshold {} for phase {}: should be between 0.0 and 1.0",
                    value, key
                ));
            }
        }

        if self.workflow.timeout_minutes == 0 {
            warnings.push("timeout_minutes is 0: every phase will time out".to_string());
        }

        warnings
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Values passed on the command line; `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub max_retries: Option<u32>,
    pub retry_delay_secs: Option<u64>,
    pub timeout_minutes: Option<u64>,
    pub no_recovery: bool,
}

/// Unified configuration for a project directory.
#[derive(Debug, Clone)]
pub struct ConductorConfig {
    pub project_dir: PathBuf,
    pub conductor_dir: PathBuf,
    pub toml: ConductorToml,
    pub cli: CliOverrides,
}

impl ConductorConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        Self::with_cli_args(project_dir, CliOverrides::default())
    }

    pub fn with_cli_args(project_dir: PathBuf, cli: CliOverrides) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let conductor_dir = project_dir.join(".conductor");
        let toml = ConductorToml::load_or_default(&conductor_dir)?;

        Ok(Self {
            project_dir,
            conductor_dir,
            toml,
            cli,
        })
    }

    /// CLI → env → file → default.
    pub fn max_retries(&self) -> u32 {
        self.cli.max_retries.unwrap_or_else(|| self.toml.max_retries())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(
            self.cli
                .retry_delay_secs
                .unwrap_or(self.toml.workflow.retry_delay_secs),
        )
    }

    pub fn timeout(&self) -> Duration {
        let minutes = self
            .cli
            .timeout_minutes
            .unwrap_or_else(|| self.toml.timeout_minutes());
        Duration::from_secs(minutes.saturating_mul(60))
    }

    pub fn auto_recovery(&self) -> bool {
        !self.cli.no_recovery && self.toml.auto_recovery()
    }

    pub fn program(&self) -> String {
        self.toml.program()
    }

    pub fn workflows_dir(&self) -> PathBuf {
        let dir = self
            .toml
            .executor
            .workflows_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("workflows"));
        if dir.is_absolute() {
            dir
        } else {
            self.project_dir.join(dir)
        }
    }

    pub fn retention_days(&self) -> u32 {
        self.toml.sessions.retention_days
    }

    pub fn quality_evaluator(&self) -> QualityGateEvaluator {
        QualityGateEvaluator::new(self.toml.thresholds(), self.toml.quality.default_threshold)
    }

    pub fn config_file(&self) -> PathBuf {
        self.conductor_dir.join(CONFIG_FILE)
    }

    pub fn phases_file(&self) -> PathBuf {
        self.conductor_dir.join("phases.json")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.conductor_dir.join("sessions")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.conductor_dir.join("artifacts")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.conductor_dir.join("logs")
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
