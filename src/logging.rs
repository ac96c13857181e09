//! Tracing setup for the conductor binary.
//!
//! Stdout carries the JSON result of each command, so every log line goes
//! to stderr and, when a log directory is available, to a daily rolling
//! file under `.conductor/logs/`.

use anyhow::Result;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "conductor=info";
const VERBOSE_LOG_FILTER: &str = "conductor=debug";
const LOG_FILE_NAME: &str = "conductor.log";

pub struct LogOptions {
    pub verbose: bool,
    /// Emit stderr logs as JSON lines.
    pub json: bool,
    pub log_dir: Option<PathBuf>,
}

fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            VERBOSE_LOG_FILTER
        } else {
            DEFAULT_LOG_FILTER
        })
    })
}

/// Install the global subscriber. Keep the returned guard alive until exit
/// so buffered file logs are flushed.
pub fn init(options: LogOptions) -> Result<Option<WorkerGuard>> {
    let mut guard = None;
    let file_layer = match options.log_dir.as_ref().map(std::fs::create_dir_all) {
        Some(Ok(())) => {
            let dir = options.log_dir.clone().unwrap_or_default();
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (writer, worker_guard) = tracing_appender::non_blocking(appender);
            guard = Some(worker_guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(env_filter(options.verbose)),
            )
        }
        Some(Err(err)) => {
            eprintln!("Warning: failed to create log directory: {}", err);
            None
        }
        None => None,
    };

    let (json_layer, text_layer) = if options.json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(env_filter(options.verbose));
        (Some(layer), None)
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(env_filter(options.verbose));
        (None, Some(layer))
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(json_layer)
        .with(text_layer)
        .try_init()?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_init_creates_log_dir_and_only_installs_once() {
        let dir = tempdir().unwrap();
        let log_dir = dir.path().join("logs");

        let first = init(LogOptions {
            verbose: true,
            json: false,
            log_dir: Some(log_dir.clone()),
        });
        assert!(log_dir.is_dir());
        assert!(first.unwrap().is_some());

        let second = init(LogOptions {
            verbose: false,
            json: true,
            log_dir: None,
        });
        assert!(second.is_err());
    }
}
