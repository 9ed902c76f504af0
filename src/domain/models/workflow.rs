//! Workflow and task descriptors plus configuration validation.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::agent::{AgentSpec, RetryConfig};
use crate::domain::models::graph::TaskGraph;

/// Workflow-level policy controlling what happens after a task fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStrategy {
    /// Cancel everything still pending and fail the workflow.
    StopOnFirstFailure,
    /// Cancel the failed task's dependents; independent tasks proceed.
    ContinueOnFailure,
    /// Like `ContinueOnFailure`, but the workflow may end partially
    /// completed when at least one task succeeded.
    PartialCompletionAllowed,
}

impl Default for FailureStrategy {
    fn default() -> Self {
        Self::StopOnFirstFailure
    }
}

impl FailureStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StopOnFirstFailure => "stop_on_first_failure",
            Self::ContinueOnFailure => "continue_on_failure",
            Self::PartialCompletionAllowed => "partial_completion_allowed",
        }
    }
}

/// Immutable task descriptor from the workflow configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Unique name within the workflow.
    pub name: String,
    /// Name of the agent that executes this task.
    pub agent: String,
    /// Action string, opaque to the scheduler and meaningful to the
    /// agent variant (chat action, RPC method, ...).
    pub action: String,
    /// Parameters handed to the agent; string values may reference
    /// upstream results as `${tasks.<name>.result}`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, Value>,
    /// Names of tasks that must complete before this one becomes ready.
    #[serde(default, skip_serializing_if = "Vec::is_empty", alias = "dependencies")]
    pub depends_on: Vec<String>,
    /// Override of the agent's request deadline.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "timeout")]
    pub timeout_secs: Option<u64>,
    /// Complete override of the agent's retry policy.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "retry_config")]
    pub retry: Option<RetryConfig>,
    /// When true, a failure of this task does not cascade cancellation
    /// to its dependents.
    #[serde(default)]
    pub continue_on_failure: bool,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Immutable workflow descriptor: a named DAG of tasks over a set of
/// configured agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
    /// Dispatch the entire ready set concurrently when true; one task at
    /// a time otherwise.
    #[serde(default)]
    pub parallel_execution: bool,
    #[serde(default)]
    pub failure_strategy: FailureStrategy,
    /// Deadline for the whole run; on expiry the workflow fails and
    /// non-terminal tasks are cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "global_timeout")]
    pub global_timeout_secs: Option<u64>,
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

impl WorkflowSpec {
    pub fn agent(&self, name: &str) -> Option<&AgentSpec> {
        self.agents.iter().find(|a| a.name == name)
    }

    pub fn task(&self, name: &str) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Validate the descriptor before any task runs.
    ///
    /// Checks name uniqueness, agent and dependency references, policy
    /// fields, and graph acyclicity. The first violation is returned as
    /// `DomainError::ConfigInvalid`.
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::ConfigInvalid(
                "workflow name must not be empty".into(),
            ));
        }

        let mut agent_names = HashSet::new();
        for agent in &self.agents {
            if agent.name.trim().is_empty() {
                return Err(DomainError::ConfigInvalid(
                    "agent name must not be empty".into(),
                ));
            }
            if !agent_names.insert(agent.name.as_str()) {
                return Err(DomainError::ConfigInvalid(format!(
                    "duplicate agent name: {}",
                    agent.name
                )));
            }
            if agent.endpoint.trim().is_empty() {
                return Err(DomainError::ConfigInvalid(format!(
                    "agent '{}' has an empty endpoint",
                    agent.name
                )));
            }
            validate_retry(&agent.name, &agent.retry)?;
            if agent.breaker.failure_threshold == 0 {
                return Err(DomainError::ConfigInvalid(format!(
                    "agent '{}': breaker failure_threshold must be at least 1",
                    agent.name
                )));
            }
            if agent.max_concurrency == Some(0) {
                return Err(DomainError::ConfigInvalid(format!(
                    "agent '{}': max_concurrency must be at least 1",
                    agent.name
                )));
            }
        }

        let mut task_names = HashSet::new();
        for task in &self.tasks {
            if task.name.trim().is_empty() {
                return Err(DomainError::ConfigInvalid(
                    "task name must not be empty".into(),
                ));
            }
            if !task_names.insert(task.name.as_str()) {
                return Err(DomainError::ConfigInvalid(format!(
                    "duplicate task name: {}",
                    task.name
                )));
            }
            if !agent_names.contains(task.agent.as_str()) {
                return Err(DomainError::ConfigInvalid(format!(
                    "task '{}' references unknown agent '{}'",
                    task.name, task.agent
                )));
            }
            if let Some(retry) = &task.retry {
                validate_retry(&task.name, retry)?;
            }
            if task.timeout_secs == Some(0) {
                return Err(DomainError::ConfigInvalid(format!(
                    "task '{}': timeout_secs must be at least 1",
                    task.name
                )));
            }
        }

        for task in &self.tasks {
            for dep in &task.depends_on {
                if dep == &task.name {
                    return Err(DomainError::ConfigInvalid(format!(
                        "task '{}' depends on itself",
                        task.name
                    )));
                }
                if !task_names.contains(dep.as_str()) {
                    return Err(DomainError::ConfigInvalid(format!(
                        "task '{}' depends on unknown task '{}'",
                        task.name, dep
                    )));
                }
            }
        }

        // Cycle detection over the validated reference set.
        let graph = TaskGraph::from_specs(&self.tasks)?;
        if let Some(name) = graph.find_cycle_member() {
            return Err(DomainError::ConfigInvalid(format!(
                "dependency cycle detected involving task '{name}'"
            )));
        }

        Ok(())
    }
}

fn validate_retry(owner: &str, retry: &RetryConfig) -> DomainResult<()> {
    if retry.max_attempts == 0 {
        return Err(DomainError::ConfigInvalid(format!(
            "'{owner}': retry max_attempts must be at least 1"
        )));
    }
    if retry.backoff_base <= 1.0 {
        return Err(DomainError::ConfigInvalid(format!(
            "'{owner}': retry backoff_base must be greater than 1"
        )));
    }
    if retry.initial_delay_ms > retry.max_delay_ms {
        return Err(DomainError::ConfigInvalid(format!(
            "'{owner}': retry initial_delay_ms must not exceed max_delay_ms"
        )));
    }
    Ok(())
}
