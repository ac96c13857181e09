//! Bounded retry of a failed phase invocation.
//!
//! Retries run at a uniform interval with no backoff or jitter.

use crate::errors::PhaseError;
use crate::orchestrator::state::PhaseOutcome;
use crate::phase::PhaseDescriptor;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct RecoveryManager {
    /// Retries after the original attempt.
    pub max_retries: u32,
    pub delay: Duration,
}

impl RecoveryManager {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Invoke `invoke(attempt)` until it succeeds or the retry budget runs
    /// out. `attempt` is 1-based; at most `max_retries + 1` calls are made.
    ///
    /// Failures whose kind is not retryable end the loop immediately. When
    /// every attempt fails the last outcome is returned with its error
    /// rewritten to a "recovery exhausted" message.
    pub async fn attempt<F, Fut>(&self, phase: &PhaseDescriptor, mut invoke: F) -> PhaseOutcome
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = PhaseOutcome>,
    {
        let max_attempts = self.max_retries.saturating_add(1);
        let mut attempt = 1;

        loop {
            let mut outcome = invoke(attempt).await;
            outcome.attempts = attempt;

            if outcome.success {
                if attempt > 1 {
                    info!(ordinal = phase.ordinal, attempt, "Phase recovered");
                }
                return outcome;
            }

            let retryable = outcome.error_kind.is_some_and(|k| k.is_retryable());
            if !retryable || attempt >= max_attempts {
                if retryable && self.max_retries > 0 {
                    let err = PhaseError::RecoveryExhausted {
                        ordinal: phase.ordinal,
                        attempts: attempt,
                        last_error: outcome.error.clone().unwrap_or_default(),
                    };
                    warn!(ordinal = phase.ordinal, attempts = attempt, "Recovery exhausted");
                    outcome.error = Some(err.to_string());
                }
                return outcome;
            }

            warn!(
                ordinal = phase.ordinal,
                attempt,
                max_attempts,
                error = outcome.error.as_deref().unwrap_or(""),
                delay_ms = self.delay.as_millis() as u64,
                "Phase attempt failed, retrying"
            );
            tokio::time::sleep(self.delay).await;
            attempt += 1;
        }
    }
}
