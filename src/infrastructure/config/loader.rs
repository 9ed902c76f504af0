//! Workflow document loader.
//!
//! Reads a workflow descriptor from YAML or JSON (chosen by file
//! extension), merges `MAESTRO_`-prefixed environment overrides, and
//! validates the result before handing it to the scheduler.

use std::path::Path;

use figment::providers::{Env, Format, Json, Yaml};
use figment::Figment;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::WorkflowSpec;

/// Loader for workflow configuration documents.
pub struct WorkflowLoader;

impl WorkflowLoader {
    /// Load and validate a workflow descriptor from a file.
    ///
    /// Environment variables win over file values, e.g.
    /// `MAESTRO_PARALLEL_EXECUTION=true` or
    /// `MAESTRO_GLOBAL_TIMEOUT_SECS=120`.
    pub fn load_from_file(path: impl AsRef<Path>) -> DomainResult<WorkflowSpec> {
        let path = path.as_ref();
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let figment = if is_json {
            Figment::new().merge(Json::file(path))
        } else {
            Figment::new().merge(Yaml::file(path))
        };

        let spec: WorkflowSpec = figment
            .merge(Env::prefixed("MAESTRO_").split("__"))
            .extract()
            .map_err(|e| {
                DomainError::ConfigInvalid(format!("failed to read {}: {e}", path.display()))
            })?;

        spec.validate()?;
        Ok(spec)
    }

    /// Validate a workflow descriptor submitted as a JSON value (the REST
    /// submission path).
    pub fn load_from_value(value: serde_json::Value) -> DomainResult<WorkflowSpec> {
        let spec: WorkflowSpec = serde_json::from_value(value)
            .map_err(|e| DomainError::ConfigInvalid(format!("malformed workflow document: {e}")))?;
        spec.validate()?;
        Ok(spec)
    }
}
