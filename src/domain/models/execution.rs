//! Mutable run-state: the per-task state machine and the workflow
//! execution record handed back to the caller.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult, InvokeError};

/// Per-task execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Declared, dependencies not yet satisfied.
    Pending,
    /// All dependencies satisfied; eligible for dispatch.
    Ready,
    /// An invocation attempt is in flight.
    Running,
    /// Waiting out a retry backoff between attempts.
    Retrying,
    /// Agent returned success.
    Completed,
    /// Retry exhausted, breaker open, timeout, or non-retryable error.
    Failed,
    /// Workflow cancellation or upstream-failure cascade.
    Cancelled,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Permitted transitions; everything else is an invariant violation.
    pub fn valid_transitions(&self) -> &'static [TaskState] {
        match self {
            Self::Pending => &[Self::Ready, Self::Cancelled],
            Self::Ready => &[Self::Running, Self::Cancelled],
            Self::Running => &[Self::Retrying, Self::Completed, Self::Failed, Self::Cancelled],
            Self::Retrying => &[Self::Running, Self::Cancelled],
            Self::Completed | Self::Failed | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: TaskState) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal error recorded on a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    /// Machine-readable code from the invocation taxonomy.
    pub code: String,
    pub message: String,
}

impl From<&InvokeError> for TaskError {
    fn from(err: &InvokeError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Mutable run-state of a single task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskExecution {
    pub name: String,
    pub state: TaskState,
    /// Invocation attempts performed so far.
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Result payload, set on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Last error, set on failure or cancellation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    pub workflow_id: Uuid,
}

impl TaskExecution {
    pub fn new(name: impl Into<String>, workflow_id: Uuid) -> Self {
        Self {
            name: name.into(),
            state: TaskState::Pending,
            attempts: 0,
            started_at: None,
            ended_at: None,
            result: None,
            error: None,
            workflow_id,
        }
    }

    /// Apply a state transition, stamping timestamps.
    pub fn transition_to(&mut self, next: TaskState) -> DomainResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }

        match next {
            TaskState::Running if self.started_at.is_none() => {
                self.started_at = Some(Utc::now());
            }
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled => {
                self.ended_at = Some(Utc::now());
            }
            _ => {}
        }

        self.state = next;
        Ok(())
    }
}

/// Aggregate workflow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Pending,
    Running,
    Completed,
    PartiallyCompleted,
    Failed,
    Cancelled,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::PartiallyCompleted => "partially_completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::PartiallyCompleted | Self::Failed | Self::Cancelled
        )
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable run-state of a workflow; returned to the caller once terminal.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_name: String,
    pub state: WorkflowState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub total_tasks: usize,
    pub tasks: HashMap<String, TaskExecution>,
}

impl WorkflowExecution {
    pub fn new(id: Uuid, workflow_name: impl Into<String>, task_names: &[String]) -> Self {
        let tasks = task_names
            .iter()
            .map(|name| (name.clone(), TaskExecution::new(name.clone(), id)))
            .collect::<HashMap<_, _>>();
        Self {
            id,
            workflow_name: workflow_name.into(),
            state: WorkflowState::Pending,
            started_at: None,
            ended_at: None,
            total_tasks: task_names.len(),
            tasks,
        }
    }

    pub fn count_in(&self, state: TaskState) -> usize {
        self.tasks.values().filter(|t| t.state == state).count()
    }

    pub fn completed_tasks(&self) -> usize {
        self.count_in(TaskState::Completed)
    }

    pub fn failed_tasks(&self) -> usize {
        self.count_in(TaskState::Failed)
    }

    pub fn cancelled_tasks(&self) -> usize {
        self.count_in(TaskState::Cancelled)
    }

    pub fn terminal_tasks(&self) -> usize {
        self.tasks.values().filter(|t| t.state.is_terminal()).count()
    }

    /// Completion percentage over terminal tasks, in [0, 100].
    pub fn progress_percent(&self) -> u8 {
        if self.total_tasks == 0 {
            return 100;
        }
        ((self.terminal_tasks() * 100) / self.total_tasks) as u8
    }

    /// Name of some currently running task, if any.
    pub fn current_task(&self) -> Option<&str> {
        self.tasks
            .values()
            .find(|t| matches!(t.state, TaskState::Running | TaskState::Retrying))
            .map(|t| t.name.as_str())
    }

    /// Results of completed tasks, keyed by task name.
    pub fn results(&self) -> HashMap<&str, &Value> {
        self.tasks
            .values()
            .filter_map(|t| t.result.as_ref().map(|r| (t.name.as_str(), r)))
            .collect()
    }

    /// Errors of failed and cancelled tasks, keyed by task name.
    pub fn errors(&self) -> HashMap<&str, &TaskError> {
        self.tasks
            .values()
            .filter_map(|t| t.error.as_ref().map(|e| (t.name.as_str(), e)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_lifecycle_walk() {
        let mut task = TaskExecution::new("t1", Uuid::new_v4());
        task.transition_to(TaskState::Ready).unwrap();
        task.transition_to(TaskState::Running).unwrap();
        assert!(task.started_at.is_some());
        task.transition_to(TaskState::Retrying).unwrap();
        task.transition_to(TaskState::Running).unwrap();
        task.transition_to(TaskState::Completed).unwrap();
        assert!(task.ended_at.is_some());
        assert!(task.state.is_terminal());
    }

    #[test]
    fn terminal_states_are_final() {
        let mut task = TaskExecution::new("t1", Uuid::new_v4());
        task.transition_to(TaskState::Ready).unwrap();
        task.transition_to(TaskState::Running).unwrap();
        task.transition_to(TaskState::Failed).unwrap();
        let err = task.transition_to(TaskState::Running).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
    }

    #[test]
    fn pending_cannot_run_directly() {
        let mut task = TaskExecution::new("t1", Uuid::new_v4());
        assert!(task.transition_to(TaskState::Running).is_err());
    }

    #[test]
    fn cancellation_from_any_non_terminal() {
        for setup in [
            vec![],
            vec![TaskState::Ready],
            vec![TaskState::Ready, TaskState::Running],
            vec![TaskState::Ready, TaskState::Running, TaskState::Retrying],
        ] {
            let mut task = TaskExecution::new("t1", Uuid::new_v4());
            for state in setup {
                task.transition_to(state).unwrap();
            }
            task.transition_to(TaskState::Cancelled).unwrap();
            assert!(task.ended_at.is_some());
        }
    }

    #[test]
    fn terminal_counts_sum_to_total() {
        let id = Uuid::new_v4();
        let names: Vec<String> = vec!["t1".into(), "t2".into(), "t3".into()];
        let mut record = WorkflowExecution::new(id, "wf", &names);

        for (name, terminal) in [
            ("t1", TaskState::Completed),
            ("t2", TaskState::Failed),
            ("t3", TaskState::Cancelled),
        ] {
            let task = record.tasks.get_mut(name).unwrap();
            if terminal != TaskState::Cancelled {
                task.transition_to(TaskState::Ready).unwrap();
                task.transition_to(TaskState::Running).unwrap();
            }
            task.transition_to(terminal).unwrap();
        }

        assert_eq!(
            record.completed_tasks() + record.failed_tasks() + record.cancelled_tasks(),
            record.total_tasks
        );
        assert_eq!(record.progress_percent(), 100);
    }

    #[test]
    fn progress_is_partial_mid_run() {
        let id = Uuid::new_v4();
        let names: Vec<String> = vec!["t1".into(), "t2".into()];
        let mut record = WorkflowExecution::new(id, "wf", &names);
        let task = record.tasks.get_mut("t1").unwrap();
        task.transition_to(TaskState::Ready).unwrap();
        task.transition_to(TaskState::Running).unwrap();
        task.transition_to(TaskState::Completed).unwrap();

        assert_eq!(record.progress_percent(), 50);
        assert_eq!(record.results().len(), 1);
        assert!(record.errors().is_empty());
    }
}
