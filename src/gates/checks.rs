//! Quality check implementations.
//!
//! A check inspects one phase's outcome (and the artifacts it recorded) and
//! returns `Ok(CheckScore)` or `Err(reason)`. An `Err` is converted by the
//! evaluator into a failed check with score 0; it never aborts the gate.

use super::project::{BasicValidationCheck, DependencyCheck, SecurityScanCheck, TestExecutionCheck};
use crate::orchestrator::state::{PhaseOutcome, WorkflowState};
use crate::phase::{PROJECT_PATH_KEY, PhaseDescriptor};
use serde_json::Value;
use std::path::Path;

/// Everything a check may look at.
pub struct CheckContext<'a> {
    pub phase: &'a PhaseDescriptor,
    pub outcome: &'a PhaseOutcome,
    pub state: &'a WorkflowState,
}

/// Score reported by a single check, on a 0-100 scale.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckScore {
    pub passed: bool,
    pub score: f64,
    pub details: String,
}

impl CheckScore {
    pub fn pass(details: impl Into<String>) -> Self {
        Self {
            passed: true,
            score: 100.0,
            details: details.into(),
        }
    }

    pub fn fail(details: impl Into<String>) -> Self {
        Self {
            passed: false,
            score: 0.0,
            details: details.into(),
        }
    }

    /// Partial credit; passes only at 100.
    pub fn partial(score: f64, details: impl Into<String>) -> Self {
        let score = score.clamp(0.0, 100.0);
        Self {
            passed: score >= 100.0,
            score,
            details: details.into(),
        }
    }
}

/// A named quality check.
pub trait QualityCheck: Send + Sync {
    fn evaluate(&self, ctx: &CheckContext<'_>) -> Result<CheckScore, String>;
}

/// Fallback for unknown check names: scores the executor's own verdict.
pub struct OutcomeCheck;

impl QualityCheck for OutcomeCheck {
    fn evaluate(&self, ctx: &CheckContext<'_>) -> Result<CheckScore, String> {
        if ctx.outcome.success {
            Ok(CheckScore::pass("Phase executor reported success"))
        } else {
            Ok(CheckScore::fail("Phase executor reported failure"))
        }
    }
}

/// Passes when the resolved project path is present and exists on disk.
pub struct ProjectDetectionCheck;

impl QualityCheck for ProjectDetectionCheck {
    fn evaluate(&self, ctx: &CheckContext<'_>) -> Result<CheckScore, String> {
        let Some(path) = ctx.state.context_str(PROJECT_PATH_KEY) else {
            return Ok(CheckScore::fail("No project path in context"));
        };
        if Path::new(path).exists() {
            Ok(CheckScore::pass(format!("Project detected at {path}")))
        } else {
            Ok(CheckScore::fail(format!("Project path {path} does not exist")))
        }
    }
}

/// Reads a recorded JSON artifact and checks that `section` contains
/// every field in `fields` with a non-empty value.
pub struct ArtifactFieldsCheck {
    pub output: &'static str,
    pub section: &'static str,
    pub fields: &'static [&'static str],
}

impl ArtifactFieldsCheck {
    fn load(&self, ctx: &CheckContext<'_>) -> Result<Value, String> {
        let handle = ctx
            .state
            .artifacts
            .get(self.output)
            .ok_or_else(|| format!("No artifact recorded for output '{}'", self.output))?;
        let content = std::fs::read_to_string(&handle.path)
            .map_err(|e| format!("Failed to read {}: {}", handle.path.display(), e))?;
        serde_json::from_str(&content)
            .map_err(|e| format!("Artifact {} is not valid JSON: {}", handle.path.display(), e))
    }
}

impl QualityCheck for ArtifactFieldsCheck {
    fn evaluate(&self, ctx: &CheckContext<'_>) -> Result<CheckScore, String> {
        if self.fields.is_empty() {
            return Ok(CheckScore::pass("No fields required"));
        }
        let document = self.load(ctx)?;
        let section = document
            .get(self.section)
            .ok_or_else(|| format!("Artifact has no '{}' section", self.section))?;

        let missing: Vec<&str> = self
            .fields
            .iter()
            .copied()
            .filter(|field| !is_present(section.get(*field)))
            .collect();

        let present = self.fields.len() - missing.len();
        let score = present as f64 / self.fields.len() as f64 * 100.0;
        if missing.is_empty() {
            Ok(CheckScore::pass(format!(
                "{}.{} complete",
                self.output, self.section
            )))
        } else {
            Ok(CheckScore::partial(
                score,
                format!("{} missing fields: {}", self.output, missing.join(", ")),
            ))
        }
    }
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(_) => true,
    }
}

/// Built-in checks keyed by identifier.
pub fn builtin_checks() -> Vec<(&'static str, Box<dyn QualityCheck>)> {
    let basic_validation: Box<dyn QualityCheck> = Box::new(BasicValidationCheck);
    let dependency_check: Box<dyn QualityCheck> = Box::new(DependencyCheck);
    let security_scan: Box<dyn QualityCheck> = Box::new(SecurityScanCheck);
    let test_execution: Box<dyn QualityCheck> = Box::new(TestExecutionCheck::default());
    let project_detection: Box<dyn QualityCheck> = Box::new(ProjectDetectionCheck);
    let issue_validity: Box<dyn QualityCheck> = Box::new(ArtifactFieldsCheck {
        output: "issue_data",
        section: "issue_data",
        fields: &["title", "id"],
    });
    let strategic_completeness: Box<dyn QualityCheck> = Box::new(ArtifactFieldsCheck {
        output: "strategic_plan",
        section: "strategic_plan",
        fields: &["strategic_analysis", "implementation_plan"],
    });
    let report_quality: Box<dyn QualityCheck> = Box::new(ArtifactFieldsCheck {
        output: "comprehensive_report",
        section: "comprehensive_report",
        fields: &["analysis_section", "strategy_section", "technical_section"],
    });

    vec![
        ("basic_validation", basic_validation),
        ("dependency_check", dependency_check),
        ("security_scan", security_scan),
        ("test_execution", test_execution),
        ("project_detection", project_detection),
        ("issue_validity", issue_validity),
        ("strategic_completeness", strategic_completeness),
        ("report_quality", report_quality),
    ]
}
