//! `maestro validate` - check a workflow document without running it.

use std::path::Path;

use anyhow::Result;

use crate::cli::exit_codes;
use crate::infrastructure::config::WorkflowLoader;

pub fn handle_validate(config: &Path) -> Result<i32> {
    match WorkflowLoader::load_from_file(config) {
        Ok(spec) => {
            println!(
                "configuration valid: workflow '{}' with {} agent(s) and {} task(s)",
                spec.name,
                spec.agents.len(),
                spec.tasks.len()
            );
            Ok(exit_codes::COMPLETED)
        }
        Err(err) => {
            eprintln!("configuration invalid: {err}");
            Ok(exit_codes::CONFIG_INVALID)
        }
    }
}
