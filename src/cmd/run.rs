//! Workflow execution commands: `conductor execute`, `resume` and `phase`.

use anyhow::Result;
use conductor::config::Config;
use conductor::orchestrator::{PartialResult, WorkflowResult, WorkflowStatus};

use super::{parse_context, print_json};

pub async fn cmd_execute(config: &Config, task_id: &str, context: Option<&str>) -> Result<bool> {
    let context = parse_context(context)?;
    config.ensure_directories()?;
    let coordinator = config.coordinator()?;

    let result = coordinator.execute(task_id, context).await?;
    print_summary(&result);
    print_json(&result)?;
    Ok(result.is_success())
}

pub async fn cmd_resume(config: &Config, session_id: &str, from: Option<u32>) -> Result<bool> {
    config.ensure_directories()?;
    let coordinator = config.coordinator()?;

    let result = coordinator.resume(session_id, from).await?;
    print_summary(&result);
    print_json(&result)?;
    Ok(result.is_success())
}

pub async fn cmd_phase(
    config: &Config,
    start: u32,
    end: u32,
    context: Option<&str>,
    session: Option<&str>,
) -> Result<bool> {
    let context = parse_context(context)?;
    let task_id = context
        .get(conductor::phase::TASK_ID_KEY)
        .and_then(|v| v.as_str())
        .unwrap_or("manual")
        .to_string();
    config.ensure_directories()?;
    let coordinator = config.coordinator()?;

    let partial = coordinator
        .run_phases(session, &task_id, start, end, context)
        .await?;
    print_partial_summary(&partial);
    print_json(&partial)?;
    Ok(partial.success)
}

fn print_summary(result: &WorkflowResult) {
    match result.status {
        WorkflowStatus::Completed => eprintln!(
            "{} {} ({}/{} phases, quality {:.0}%)",
            console::style("✓ Workflow completed").green().bold(),
            result.session_id,
            result.phases_completed,
            result.total_phases,
            result.quality_summary.mean_score * 100.0
        ),
        _ => {
            eprintln!(
                "{} {} at phase {}",
                console::style(format!("✗ Workflow {}", result.status)).red().bold(),
                result.session_id,
                result
                    .failed_phase
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
            if let Some(hint) = &result.recovery {
                eprintln!("  {} {}", console::style("Resume:").dim(), hint.command);
            }
        }
    }
}

fn print_partial_summary(partial: &PartialResult) {
    if partial.success {
        eprintln!(
            "{} phases {}-{} ({})",
            console::style("✓ Completed").green().bold(),
            partial.start,
            partial.end,
            partial.session_id
        );
    } else {
        eprintln!(
            "{} phase {} ({})",
            console::style("✗ Failed").red().bold(),
            partial
                .failed_phase
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
            partial.session_id
        );
    }
}
