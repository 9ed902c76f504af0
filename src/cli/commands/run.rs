//! `maestro run` - execute a workflow to completion.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::cli::exit_codes;
use crate::domain::models::WorkflowState;
use crate::infrastructure::agents::{build_agents, AgentFactory};
use crate::infrastructure::config::WorkflowLoader;
use crate::services::event_bus::{EventBus, EventPayload};
use crate::services::runner::WorkflowRunner;

pub async fn handle_run(config: &Path) -> Result<i32> {
    let spec = match WorkflowLoader::load_from_file(config) {
        Ok(spec) => spec,
        Err(err) => {
            tracing::error!(error = %err, "invalid workflow configuration");
            return Ok(exit_codes::CONFIG_INVALID);
        }
    };

    let factory = AgentFactory::new();
    let agents = match build_agents(&spec, &factory) {
        Ok(agents) => agents,
        Err(err) => {
            tracing::error!(error = %err, "agent construction failed");
            return Ok(exit_codes::CONFIG_INVALID);
        }
    };
    let runner_bus = Arc::new(EventBus::with_defaults());

    // Mirror every event into the log before handing the bus to the run.
    let mut events = runner_bus.subscribe("cli");
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match &event.payload {
                EventPayload::Task { new_state, attempt, error, .. } => {
                    tracing::info!(
                        event = %event.kind,
                        task = event.task_name.as_deref().unwrap_or(""),
                        state = %new_state,
                        attempt,
                        error = error.as_ref().map(|e| e.message.as_str()).unwrap_or(""),
                        "task event"
                    );
                }
                EventPayload::Workflow { state, completed, failed, cancelled, total } => {
                    tracing::info!(
                        event = %event.kind,
                        state = %state,
                        completed,
                        failed,
                        cancelled,
                        total,
                        "workflow event"
                    );
                }
                EventPayload::Breaker { agent } => {
                    tracing::info!(event = %event.kind, agent = %agent, "breaker event");
                }
            }
        }
    });

    let runner = match WorkflowRunner::new(spec, agents, Arc::clone(&runner_bus)) {
        Ok(runner) => runner,
        Err(err) => {
            tracing::error!(error = %err, "invalid workflow configuration");
            printer.abort();
            return Ok(exit_codes::CONFIG_INVALID);
        }
    };

    // Ctrl-C requests cancellation; the run winds down and reports.
    let handle = runner.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling workflow");
            handle.cancel();
        }
    });

    let record = match runner.run().await {
        Ok(record) => record,
        Err(err) => {
            tracing::error!(error = %err, "workflow rejected");
            printer.abort();
            return Ok(exit_codes::CONFIG_INVALID);
        }
    };

    // Let the printer drain, then stop it.
    drop(runner_bus);
    let _ = printer.await;

    println!(
        "{}",
        serde_json::to_string_pretty(&record).context("failed to render workflow result")?
    );

    let code = match record.state {
        WorkflowState::Completed => exit_codes::COMPLETED,
        WorkflowState::PartiallyCompleted => exit_codes::PARTIALLY_COMPLETED,
        WorkflowState::Cancelled => exit_codes::CANCELLED,
        _ => exit_codes::FAILED,
    };
    Ok(code)
}
