use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::conductor_config::{CliOverrides, ConductorConfig};
use crate::orchestrator::{CoordinatorSettings, ProcessExecutor, WorkflowCoordinator};
use crate::phase::{PhaseRegistry, load_registry_or_default};
use crate::session::FileSessionStore;

/// Runtime configuration for a conductor invocation.
///
/// Resolves the `.conductor/` layout of a project and builds the pieces
/// the coordinator needs from the layered `ConductorConfig`.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub conductor_dir: PathBuf,
    pub sessions_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub log_dir: PathBuf,
    pub phases_file: PathBuf,
    pub config_file: PathBuf,
    pub verbose: bool,
    conductor_config: ConductorConfig,
}

/// Coordinator wired to the process executor and file store.
pub type ProjectCoordinator = WorkflowCoordinator<ProcessExecutor, FileSessionStore>;

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool, cli: CliOverrides) -> Result<Self> {
        let conductor_config = ConductorConfig::with_cli_args(project_dir, cli)?;

        Ok(Self {
            project_dir: conductor_config.project_dir.clone(),
            conductor_dir: conductor_config.conductor_dir.clone(),
            sessions_dir: conductor_config.sessions_dir(),
            artifacts_dir: conductor_config.artifacts_dir(),
            log_dir: conductor_config.log_dir(),
            phases_file: conductor_config.phases_file(),
            config_file: conductor_config.config_file(),
            verbose,
            conductor_config,
        })
    }

    pub fn conductor_config(&self) -> &ConductorConfig {
        &self.conductor_config
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.sessions_dir)
            .context("Failed to create sessions directory")?;
        std::fs::create_dir_all(&self.artifacts_dir)
            .context("Failed to create artifacts directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            max_retries: self.conductor_config.max_retries(),
            retry_delay: self.conductor_config.retry_delay(),
            timeout: self.conductor_config.timeout(),
            auto_recovery: self.conductor_config.auto_recovery(),
            project_dir: self.project_dir.clone(),
        }
    }

    /// Pipeline from `.conductor/phases.json`, or the built-in one.
    pub fn registry(&self) -> Result<PhaseRegistry> {
        load_registry_or_default(Some(&self.phases_file))
    }

    pub fn session_store(&self) -> FileSessionStore {
        FileSessionStore::new(&self.sessions_dir, &self.artifacts_dir)
    }

    pub fn executor(&self) -> ProcessExecutor {
        ProcessExecutor::new(
            self.conductor_config.program(),
            self.conductor_config.workflows_dir(),
            &self.project_dir,
        )
    }

    pub fn coordinator(&self) -> Result<ProjectCoordinator> {
        Ok(WorkflowCoordinator::new(
            self.registry()?,
            self.executor(),
            self.session_store(),
            self.coordinator_settings(),
        )
        .with_evaluator(self.conductor_config.quality_evaluator()))
    }
}
