//! Quality gates evaluated after each successful phase.
//!
//! A gate is advisory: the coordinator logs a failing verdict as a warning
//! and keeps going. Each declared check produces a 0-100 score; the gate
//! score is their mean expressed as a fraction, compared against a
//! phase-specific threshold.

pub mod checks;
pub mod project;

use crate::orchestrator::state::{PhaseOutcome, WorkflowState};
use crate::phase::PhaseDescriptor;
use chrono::{DateTime, Utc};
use checks::{CheckContext, OutcomeCheck, QualityCheck, builtin_checks};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Threshold used for phases without an entry in the table.
pub const DEFAULT_THRESHOLD: f64 = 0.75;

/// Default ordinal -> threshold table.
pub fn default_thresholds() -> BTreeMap<u32, f64> {
    BTreeMap::from([
        (1, 0.80),
        (2, 0.75),
        (3, 0.80),
        (4, 0.90),
        (5, 0.85),
        (6, 0.85),
        (7, 0.80),
        (8, 0.80),
    ])
}

/// Result of a single check inside a gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub check: String,
    pub passed: bool,
    /// 0-100
    pub score: f64,
    pub details: String,
}

/// Verdict of one phase's quality gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGateResult {
    pub ordinal: u32,
    pub checks: Vec<CheckOutcome>,
    /// Mean check score as a fraction in [0, 1]
    pub score: f64,
    pub threshold: f64,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
}

impl QualityGateResult {
    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

/// Aggregate over every evaluated gate in a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualitySummary {
    pub mean_score: f64,
    pub phases_passed: usize,
    pub phases_evaluated: usize,
    pub pass_rate: f64,
}

impl QualitySummary {
    pub fn from_gates(gates: &BTreeMap<u32, QualityGateResult>) -> Self {
        if gates.is_empty() {
            return Self::default();
        }
        let evaluated = gates.len();
        let passed = gates.values().filter(|g| g.passed).count();
        let mean = gates.values().map(|g| g.score).sum::<f64>() / evaluated as f64;
        Self {
            mean_score: mean,
            phases_passed: passed,
            phases_evaluated: evaluated,
            pass_rate: passed as f64 / evaluated as f64,
        }
    }
}

/// Evaluates quality gates against a registry of named checks.
pub struct QualityGateEvaluator {
    checks: HashMap<String, Box<dyn QualityCheck>>,
    fallback: Box<dyn QualityCheck>,
    thresholds: BTreeMap<u32, f64>,
    default_threshold: f64,
}

impl Default for QualityGateEvaluator {
    fn default() -> Self {
        Self::new(default_thresholds(), DEFAULT_THRESHOLD)
    }
}

impl QualityGateEvaluator {
    /// Evaluator with the built-in checks and the given threshold table.
    pub fn new(thresholds: BTreeMap<u32, f64>, default_threshold: f64) -> Self {
        let checks = builtin_checks()
            .into_iter()
            .map(|(name, check)| (name.to_string(), check))
            .collect();
        Self {
            checks,
            fallback: Box::new(OutcomeCheck),
            thresholds,
            default_threshold,
        }
    }

    /// Register (or replace) a named check.
    pub fn register(&mut self, name: &str, check: Box<dyn QualityCheck>) {
        self.checks.insert(name.to_string(), check);
    }

    pub fn threshold_for(&self, ordinal: u32) -> f64 {
        self.thresholds
            .get(&ordinal)
            .copied()
            .unwrap_or(self.default_threshold)
    }

    /// Run every check the phase declares and compute the verdict.
    ///
    /// A check returning `Err` counts as failed with score 0. With no
    /// declared checks the score is 1.0 and the gate passes.
    pub fn evaluate(
        &self,
        phase: &PhaseDescriptor,
        outcome: &PhaseOutcome,
        state: &WorkflowState,
    ) -> QualityGateResult {
        let ctx = CheckContext {
            phase,
            outcome,
            state,
        };

        let results: Vec<CheckOutcome> = phase
            .quality_checks
            .iter()
            .map(|name| {
                let check = self.checks.get(name).unwrap_or(&self.fallback);
                match check.evaluate(&ctx) {
                    Ok(score) => {
                        debug!(
                            ordinal = phase.ordinal,
                            check = %name,
                            score = score.score,
                            passed = score.passed,
                            "quality check evaluated"
                        );
                        CheckOutcome {
                            check: name.clone(),
                            passed: score.passed,
                            score: score.score.clamp(0.0, 100.0),
                            details: score.details,
                        }
                    }
                    Err(reason) => {
                        warn!(ordinal = phase.ordinal, check = %name, %reason, "quality check errored");
                        CheckOutcome {
                            check: name.clone(),
                            passed: false,
                            score: 0.0,
                            details: reason,
                        }
                    }
                }
            })
            .collect();

        let threshold = self.threshold_for(phase.ordinal);
        let score = if results.is_empty() {
            1.0
        } else {
            results.iter().map(|r| r.score).sum::<f64>() / results.len() as f64 / 100.0
        };
        let passed = score >= threshold && results.iter().all(|r| r.passed);

        QualityGateResult {
            ordinal: phase.ordinal,
            recommendations: recommendations(&results),
            checks: results,
            score,
            threshold,
            passed,
            evaluated_at: Utc::now(),
        }
    }
}

fn recommendations(results: &[CheckOutcome]) -> Vec<String> {
    results
        .iter()
        .filter(|r| !r.passed)
        .filter_map(|r| {
            if r.score < 50.0 {
                Some(format!("priority fix: {}", r.check))
            } else if r.score < 75.0 {
                Some(format!("improve: {}", r.check))
            } else {
                None
            }
        })
        .collect()
}
