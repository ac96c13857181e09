//! Phase catalogue for the conductor.
//!
//! This module provides:
//! - `PhaseDescriptor` describing one ordinal step of the pipeline
//! - `PhaseRegistry`, the validated, ordered catalogue the coordinator runs
//! - `PhasesFile` for JSON-based pipeline definitions (`.conductor/phases.json`)
//! - The default eight-phase pipeline as a fallback

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Context key holding the task identifier.
pub const TASK_ID_KEY: &str = "task_id";
/// Context key holding the resolved project path.
pub const PROJECT_PATH_KEY: &str = "project_path";

/// Which value an executor receives as its positional argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseArgument {
    TaskId,
    #[default]
    ProjectPath,
}

/// Immutable description of a single phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseDescriptor {
    /// Ordinal, 1..N; equals execution order
    pub ordinal: u32,
    /// Human-readable name of the phase
    pub name: String,
    /// Executor reference (script path relative to the workflows directory)
    pub executor: String,
    /// Positional argument handed to the executor
    #[serde(default)]
    pub argument: PhaseArgument,
    /// Names of inputs that must be available before the phase runs
    #[serde(default)]
    pub required_inputs: Vec<String>,
    /// Names of outputs this phase produces
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Quality-check identifiers evaluated after the phase succeeds
    #[serde(default)]
    pub quality_checks: Vec<String>,
    /// Output name -> artifact file pattern written by the executor
    #[serde(default)]
    pub artifacts: BTreeMap<String, String>,
}

impl PhaseDescriptor {
    pub fn new(ordinal: u32, name: &str, executor: &str) -> Self {
        Self {
            ordinal,
            name: name.to_string(),
            executor: executor.to_string(),
            argument: PhaseArgument::default(),
            required_inputs: Vec::new(),
            outputs: Vec::new(),
            quality_checks: Vec::new(),
            artifacts: BTreeMap::new(),
        }
    }

    pub fn with_argument(mut self, argument: PhaseArgument) -> Self {
        self.argument = argument;
        self
    }

    pub fn with_inputs(mut self, inputs: &[&str]) -> Self {
        self.required_inputs = inputs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_outputs(mut self, outputs: &[&str]) -> Self {
        self.outputs = outputs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_checks(mut self, checks: &[&str]) -> Self {
        self.quality_checks = checks.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Declare the artifact pattern for one of this phase's outputs.
    pub fn with_artifact(mut self, output: &str, pattern: &str) -> Self {
        self.artifacts.insert(output.to_string(), pattern.to_string());
        self
    }

    /// Artifact pattern for a declared output, if it is written to disk.
    pub fn artifact_pattern(&self, output: &str) -> Option<&str> {
        self.artifacts.get(output).map(String::as_str)
    }

    pub fn declares_output(&self, output: &str) -> bool {
        self.outputs.iter().any(|o| o == output)
    }
}

/// Whether an input name is satisfied from context instead of a prior phase.
pub fn is_well_known_input(name: &str) -> bool {
    name == TASK_ID_KEY || name == PROJECT_PATH_KEY
}

/// Validated, ordered catalogue of phases.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseRegistry {
    phases: Vec<PhaseDescriptor>,
}

impl PhaseRegistry {
    /// Build a registry, checking ordinals are 1..N with no gaps and
    /// that names and output names are unique.
    pub fn new(phases: Vec<PhaseDescriptor>) -> Result<Self> {
        if phases.is_empty() {
            bail!("Phase registry must contain at least one phase");
        }

        let mut names = HashSet::new();
        let mut outputs = HashSet::new();
        for (index, phase) in phases.iter().enumerate() {
            let expected = index as u32 + 1;
            if phase.ordinal != expected {
                bail!(
                    "Phase '{}' has ordinal {} but position {} requires ordinal {}",
                    phase.name,
                    phase.ordinal,
                    index + 1,
                    expected
                );
            }
            if !names.insert(phase.name.as_str()) {
                bail!("Duplicate phase name '{}'", phase.name);
            }
            for output in &phase.outputs {
                if !outputs.insert(output.as_str()) {
                    bail!(
                        "Output '{}' is declared by more than one phase (again by phase {})",
                        output,
                        phase.ordinal
                    );
                }
            }
            for output in phase.artifacts.keys() {
                if !phase.declares_output(output) {
                    bail!(
                        "Phase {} declares an artifact for undeclared output '{}'",
                        phase.ordinal,
                        output
                    );
                }
            }
        }

        Ok(Self { phases })
    }

    /// The default eight-phase issue-to-documentation pipeline.
    pub fn default_pipeline() -> Self {
        Self {
            phases: default_phases(),
        }
    }

    pub fn phases(&self) -> &[PhaseDescriptor] {
        &self.phases
    }

    pub fn len(&self) -> u32 {
        self.phases.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn get(&self, ordinal: u32) -> Option<&PhaseDescriptor> {
        if ordinal == 0 {
            return None;
        }
        self.phases.get(ordinal as usize - 1)
    }

    /// Phases with `start <= ordinal <= end`, in order.
    pub fn range(&self, start: u32, end: u32) -> impl Iterator<Item = &PhaseDescriptor> {
        self.phases
            .iter()
            .filter(move |p| p.ordinal >= start && p.ordinal <= end)
    }

    /// The phase that declares `output`, if any.
    pub fn owner_of_output(&self, output: &str) -> Option<&PhaseDescriptor> {
        self.phases.iter().find(|p| p.declares_output(output))
    }
}

/// JSON pipeline definition (`.conductor/phases.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhasesFile {
    pub phases: Vec<PhaseDescriptor>,
}

impl PhasesFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read phases file: {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse phases JSON: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize phases to JSON")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write phases file: {}", path.display()))
    }

    pub fn into_registry(self) -> Result<PhaseRegistry> {
        PhaseRegistry::new(self.phases)
    }
}

/// Load a registry from `phases_file` when it exists, else the default pipeline.
pub fn load_registry_or_default(phases_file: Option<&Path>) -> Result<PhaseRegistry> {
    match phases_file {
        Some(path) if path.exists() => PhasesFile::load(path)?.into_registry(),
        _ => Ok(PhaseRegistry::default_pipeline()),
    }
}

fn default_phases() -> Vec<PhaseDescriptor> {
    vec![
        PhaseDescriptor::new(
            1,
            "Issue Intelligence & Project Discovery",
            "phase1-issue-discovery.py",
        )
        .with_argument(PhaseArgument::TaskId)
        .with_inputs(&[TASK_ID_KEY])
        .with_outputs(&["issue_data", PROJECT_PATH_KEY])
        .with_checks(&["issue_validity", "project_detection"])
        .with_artifact("issue_data", "agent_issue_*.json"),
        PhaseDescriptor::new(2, "Project Context Analysis", "phase2-project-analysis.py")
            .with_inputs(&[PROJECT_PATH_KEY])
            .with_outputs(&["project_analysis"])
            .with_checks(&["structure_analysis", "dependency_check"])
            .with_artifact("project_analysis", "phase2_analysis_*.json"),
        PhaseDescriptor::new(
            3,
            "Issue Requirements Analysis",
            "phase3-requirements-analysis.py",
        )
        .with_inputs(&[PROJECT_PATH_KEY, "issue_data"])
        .with_outputs(&["requirements_result"])
        .with_checks(&["requirements_completeness", "impact_assessment"])
        .with_artifact("requirements_result", "phase3_requirements_*.json"),
        PhaseDescriptor::new(4, "Strategic Planning", "phase4-strategic-planning.py")
            .with_inputs(&[PROJECT_PATH_KEY, "requirements_result"])
            .with_outputs(&["strategic_plan"])
            .with_checks(&["strategic_completeness", "mcp_integration"])
            .with_artifact("strategic_plan", "phase4_strategy_*.json"),
        PhaseDescriptor::new(
            5,
            "Report Generation & Tracker Integration",
            "phase5-report-generation.py",
        )
        .with_inputs(&["strategic_plan"])
        .with_outputs(&["comprehensive_report"])
        .with_checks(&["report_quality", "linear_integration"])
        .with_artifact("comprehensive_report", "phase5_report_*.json"),
        PhaseDescriptor::new(6, "Review & Decision Engine", "phase6-review-engine.py")
            .with_inputs(&["comprehensive_report"])
            .with_outputs(&["review_result"])
            .with_checks(&["review_consensus", "technical_rationality"])
            .with_artifact("review_result", "phase6_review_*.json"),
        PhaseDescriptor::new(7, "Implementation Execution", "phase7-implementation.py")
            .with_inputs(&["review_result"])
            .with_outputs(&["implementation_status"])
            .with_checks(&["implementation_quality", "test_execution", "security_scan"])
            .with_artifact("implementation_status", "phase7_implementation_*.json"),
        PhaseDescriptor::new(8, "Documentation & Continuity", "phase8-documentation.py")
            .with_inputs(&["implementation_status"])
            .with_outputs(&["final_report", "next_session_context"])
            .with_checks(&["documentation_completeness", "continuity_assurance"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    // =========================================
    // Default pipeline tests
    // =========================================

    #[test]
    fn test_default_pipeline_shape() {
        let registry = PhaseRegistry::default_pipeline();
        assert_eq!(registry.len(), 8);
        assert_eq!(registry.get(1).unwrap().argument, PhaseArgument::TaskId);
        assert_eq!(registry.get(2).unwrap().argument, PhaseArgument::ProjectPath);
        assert_eq!(registry.get(8).unwrap().name, "Documentation & Continuity");
        assert!(
            registry
                .get(7)
                .unwrap()
                .quality_checks
                .contains(&"test_execution".to_string())
        );
        assert!(registry.get(0).is_none());
        assert!(registry.get(9).is_none());
    }

    #[test]
    fn test_default_pipeline_passes_validation() {
        let phases = PhaseRegistry::default_pipeline().phases().to_vec();
        assert!(PhaseRegistry::new(phases).is_ok());
    }

    #[test]
    fn test_owner_of_output() {
        let registry = PhaseRegistry::default_pipeline();
        assert_eq!(registry.owner_of_output("issue_data").unwrap().ordinal, 1);
        assert_eq!(registry.owner_of_output("strategic_plan").unwrap().ordinal, 4);
        assert!(registry.owner_of_output("nonexistent").is_none());
    }

    #[test]
    fn test_range_is_inclusive() {
        let registry = PhaseRegistry::default_pipeline();
        let ordinals: Vec<u32> = registry.range(3, 5).map(|p| p.ordinal).collect();
        assert_eq!(ordinals, vec![3, 4, 5]);
        assert_eq!(registry.range(9, 12).count(), 0);
    }

    #[test]
    fn test_artifact_pattern_lookup() {
        let registry = PhaseRegistry::default_pipeline();
        let phase1 = registry.get(1).unwrap();
        assert_eq!(phase1.artifact_pattern("issue_data"), Some("agent_issue_*.json"));
        assert_eq!(phase1.artifact_pattern(PROJECT_PATH_KEY), None);
    }

    #[test]
    fn test_well_known_inputs() {
        assert!(is_well_known_input("task_id"));
        assert!(is_well_known_input("project_path"));
        assert!(!is_well_known_input("issue_data"));
    }

    // =========================================
    // Registry validation tests
    // =========================================

    #[test]
    fn test_registry_rejects_gap() {
        let result = PhaseRegistry::new(vec![
            PhaseDescriptor::new(1, "One", "one.sh"),
            PhaseDescriptor::new(3, "Three", "three.sh"),
        ]);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("requires ordinal 2"), "got: {err}");
    }

    #[test]
    fn test_registry_rejects_duplicate_ordinal() {
        let result = PhaseRegistry::new(vec![
            PhaseDescriptor::new(1, "One", "one.sh"),
            PhaseDescriptor::new(1, "Other", "other.sh"),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_registry_rejects_empty() {
        assert!(PhaseRegistry::new(Vec::new()).is_err());
    }

    #[test]
    fn test_registry_rejects_duplicate_output() {
        let result = PhaseRegistry::new(vec![
            PhaseDescriptor::new(1, "One", "one.sh").with_outputs(&["data"]),
            PhaseDescriptor::new(2, "Two", "two.sh").with_outputs(&["data"]),
        ]);
        assert!(result.unwrap_err().to_string().contains("more than one phase"));
    }

    #[test]
    fn test_registry_rejects_artifact_for_undeclared_output() {
        let result = PhaseRegistry::new(vec![
            PhaseDescriptor::new(1, "One", "one.sh").with_artifact("ghost", "ghost_*.json"),
        ]);
        assert!(result.unwrap_err().to_string().contains("undeclared output"));
    }

    // =========================================
    // PhasesFile tests
    // =========================================

    fn create_test_phases_json() -> String {
        r#"{
            "phases": [
                {
                    "ordinal": 1,
                    "name": "Discover",
                    "executor": "discover.sh",
                    "argument": "task_id",
                    "required_inputs": ["task_id"],
                    "outputs": ["issue_data"],
                    "quality_checks": ["issue_validity"],
                    "artifacts": {"issue_data": "issue_*.json"}
                },
                {
                    "ordinal": 2,
                    "name": "Plan",
                    "executor": "plan.sh",
                    "required_inputs": ["issue_data"]
                }
            ]
        }"#
        .to_string()
    }

    #[test]
    fn test_phases_file_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("phases.json");
        fs::write(&path, create_test_phases_json()).unwrap();

        let registry = PhasesFile::load(&path).unwrap().into_registry().unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(1).unwrap().argument, PhaseArgument::TaskId);
        // Missing optional fields get defaults
        let plan = registry.get(2).unwrap();
        assert_eq!(plan.argument, PhaseArgument::ProjectPath);
        assert!(plan.outputs.is_empty());
        assert!(plan.quality_checks.is_empty());
    }

    #[test]
    fn test_phases_file_load_invalid_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("phases.json");
        fs::write(&path, "{ invalid json }").unwrap();

        let err = PhasesFile::load(&path).unwrap_err().to_string();
        assert!(err.contains("Failed to parse phases JSON"));
    }

    #[test]
    fn test_phases_file_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("phases.json");
        let pf = PhasesFile {
            phases: PhaseRegistry::default_pipeline().phases().to_vec(),
        };
        pf.save(&path).unwrap();

        let loaded = PhasesFile::load(&path).unwrap();
        assert_eq!(loaded.phases, pf.phases);
    }

    #[test]
    fn test_load_registry_or_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("phases.json");

        // Missing file falls back to the default pipeline
        let registry = load_registry_or_default(Some(&path)).unwrap();
        assert_eq!(registry.len(), 8);
        assert_eq!(load_registry_or_default(None).unwrap().len(), 8);

        fs::write(&path, create_test_phases_json()).unwrap();
        let registry = load_registry_or_default(Some(&path)).unwrap();
        assert_eq!(registry.len(), 2);
    }
}
