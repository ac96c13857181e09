//! Checks that inspect the project on disk rather than phase artifacts.
//!
//! - `basic_validation`: the project path exists
//! - `dependency_check`: declared Node dependencies are installed
//! - `security_scan`: hard-coded secrets and unsafe calls in source files
//! - `test_execution`: the project's own test suite passes
//!
//! Every check resolves the project from the `project_path` context entry.

use super::checks::{CheckContext, CheckScore, QualityCheck};
use crate::artifacts::glob_under;
use crate::phase::PROJECT_PATH_KEY;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tracing::debug;

/// Upper bound on files read by the security scan.
const MAX_SCANNED_FILES: usize = 20;

const SCANNED_EXTENSIONS: &[&str] = &["js", "py", "html"];

const NPM_TEST_ARGS: &[&str] = &["test", "--", "--passWithNoTests"];
const PYTEST_ARGS: &[&str] = &["-m", "pytest", "--tb=short"];

static SECURITY_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r#"(?i)password\s*=\s*['"].*['"]"#, "hard-coded password"),
        (r#"(?i)api_key\s*=\s*['"].*['"]"#, "hard-coded API key"),
        (r#"(?i)secret\s*=\s*['"].*['"]"#, "hard-coded secret"),
        (r"(?i)eval\s*\(", "eval call"),
        (r"(?i)innerHTML\s*=", "innerHTML assignment"),
    ]
    .into_iter()
    .map(|(pattern, label)| (Regex::new(pattern).expect("valid security pattern"), label))
    .collect()
});

fn project_path(ctx: &CheckContext<'_>) -> Result<PathBuf, String> {
    ctx.state
        .context_str(PROJECT_PATH_KEY)
        .map(PathBuf::from)
        .ok_or_else(|| "No project path in context".to_string())
}

/// Passes when the project path exists.
pub struct BasicValidationCheck;

impl QualityCheck for BasicValidationCheck {
    fn evaluate(&self, ctx: &CheckContext<'_>) -> Result<CheckScore, String> {
        let path = project_path(ctx)?;
        if path.exists() {
            Ok(CheckScore::pass("Basic validation complete"))
        } else {
            Ok(CheckScore::fail(format!(
                "Project path {} is invalid",
                path.display()
            )))
        }
    }
}

/// Deducts 30 when `package.json` is present without `node_modules`.
pub struct DependencyCheck;

impl QualityCheck for DependencyCheck {
    fn evaluate(&self, ctx: &CheckContext<'_>) -> Result<CheckScore, String> {
        let path = project_path(ctx)?;
        if !path.exists() {
            return Err(format!("Project path {} does not exist", path.display()));
        }

        let mut issues = Vec::new();
        let mut score = 100.0;
        if path.join("package.json").exists() && !path.join("node_modules").exists() {
            issues.push("node_modules is missing");
            score -= 30.0;
        }

        if issues.is_empty() {
            Ok(CheckScore::pass("Dependency issues: 0"))
        } else {
            Ok(CheckScore::partial(
                score,
                format!("Dependency issues: {}", issues.join(", ")),
            ))
        }
    }
}

/// Scans up to 20 source files; each pattern hit costs 15 points.
pub struct SecurityScanCheck;

impl SecurityScanCheck {
    fn source_files(root: &Path) -> Vec<PathBuf> {
        SCANNED_EXTENSIONS
            .iter()
            .filter_map(|ext| glob::glob(&glob_under(root, &format!("**/*.{ext}"))).ok())
            .flat_map(|paths| paths.filter_map(Result::ok))
            .filter(|p| !p.components().any(|c| c.as_os_str() == "node_modules"))
            .take(MAX_SCANNED_FILES)
            .collect()
    }
}

impl QualityCheck for SecurityScanCheck {
    fn evaluate(&self, ctx: &CheckContext<'_>) -> Result<CheckScore, String> {
        let root = project_path(ctx)?;
        let mut issues = Vec::new();

        for file in Self::source_files(&root) {
            let Ok(bytes) = std::fs::read(&file) else {
                continue;
            };
            let content = String::from_utf8_lossy(&bytes);
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            for (pattern, label) in SECURITY_PATTERNS.iter() {
                if pattern.is_match(&content) {
                    issues.push(format!("{label}: {name}"));
                }
            }
        }

        if issues.is_empty() {
            return Ok(CheckScore::pass("Security issues: 0"));
        }
        let score = (100.0 - 15.0 * issues.len() as f64).max(0.0);
        Ok(CheckScore::partial(
            score,
            format!("Security issues: {}", issues.join("; ")),
        ))
    }
}

/// Runs the project's test suite: `npm test` for Node projects,
/// `pytest` when `requirements.txt` exists. Projects with neither pass.
///
/// The suite runs synchronously on the calling thread.
pub struct TestExecutionCheck {
    pub timeout: Duration,
}

impl Default for TestExecutionCheck {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
        }
    }
}

impl TestExecutionCheck {
    fn suite_for(root: &Path) -> Option<(&'static str, &'static [&'static str], &'static str)> {
        if root.join("package.json").exists() {
            Some(("npm", NPM_TEST_ARGS, "npm test"))
        } else if root.join("requirements.txt").exists() {
            Some(("python", PYTEST_ARGS, "pytest"))
        } else {
            None
        }
    }

    /// Run one suite command and score it: exit 0 passes, a non-zero exit
    /// scores 50, a timeout 70 and a suite that cannot start 80.
    pub fn run_suite(
        &self,
        root: &Path,
        program: &str,
        args: &[&str],
        label: &str,
    ) -> CheckScore {
        let child = Command::new(program)
            .args(args)
            .current_dir(root)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                debug!(%program, error = %e, "test suite could not start");
                return CheckScore::partial(80.0, format!("{label} could not be run"));
            }
        };

        let started = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => {
                    return CheckScore::pass(format!("{label} passed"));
                }
                Ok(Some(status)) => {
                    return CheckScore::partial(
                        50.0,
                        format!("{label} failed ({status})"),
                    );
                }
                Ok(None) if started.elapsed() >= self.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return CheckScore::partial(
                        70.0,
                        format!("{label} timed out after {}s", self.timeout.as_secs()),
                    );
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(50)),
                Err(e) => {
                    return CheckScore::partial(80.0, format!("{label} could not be run: {e}"));
                }
            }
        }
    }
}

impl QualityCheck for TestExecutionCheck {
    fn evaluate(&self, ctx: &CheckContext<'_>) -> Result<CheckScore, String> {
        let root = project_path(ctx)?;
        match Self::suite_for(&root) {
            Some((program, args, label)) => Ok(self.run_suite(&root, program, args, label)),
            None => Ok(CheckScore::pass("No test suite detected")),
        }
    }
}
