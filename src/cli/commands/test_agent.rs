//! `maestro test-agent` - one-shot agent invocation.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::cli::exit_codes;
use crate::infrastructure::agents::AgentFactory;
use crate::infrastructure::config::WorkflowLoader;

pub async fn handle_test_agent(
    config: &Path,
    agent_name: &str,
    action: &str,
    params: Option<&str>,
) -> Result<i32> {
    let spec = match WorkflowLoader::load_from_file(config) {
        Ok(spec) => spec,
        Err(err) => {
            eprintln!("configuration invalid: {err}");
            return Ok(exit_codes::CONFIG_INVALID);
        }
    };

    let Some(agent_spec) = spec.agent(agent_name) else {
        eprintln!("configuration invalid: no agent named '{agent_name}'");
        return Ok(exit_codes::CONFIG_INVALID);
    };

    let params: HashMap<String, Value> = match params {
        None => HashMap::new(),
        Some(text) => serde_json::from_str(text).context("params must be a JSON object")?,
    };

    let factory = AgentFactory::new();
    let agent = factory.build(agent_spec)?;

    let outcome =
        tokio::time::timeout(agent_spec.timeout(), agent.invoke_raw(action, &params)).await;

    match outcome {
        Ok(Ok(response)) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(exit_codes::COMPLETED)
        }
        Ok(Err(err)) => {
            eprintln!("invocation failed ({}): {err}", err.code());
            Ok(exit_codes::FAILED)
        }
        Err(_) => {
            eprintln!("invocation timed out after {}s", agent_spec.timeout_secs);
            Ok(exit_codes::FAILED)
        }
    }
}
