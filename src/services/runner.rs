//! The workflow scheduler.
//!
//! `WorkflowRunner` drives a validated workflow to a terminal state. It is
//! the single owner of the state machine: workers run as spawned tasks and
//! report outcomes over one completion channel, never mutating task state
//! themselves. Dispatch is batch-oriented (the whole ready set at once
//! under `parallel_execution`, one task at a time otherwise) and a new
//! batch starts only when the previous one has fully drained.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult, InvokeError};
use crate::domain::models::execution::{TaskError, TaskExecution, TaskState, WorkflowExecution, WorkflowState};
use crate::domain::models::workflow::FailureStrategy;
use crate::domain::models::{AgentResponse, TaskGraph, WorkflowSpec};
use crate::domain::ports::Agent;
use crate::services::binding::bind_parameters;
use crate::services::circuit_breaker::BreakerRegistry;
use crate::services::event_bus::{EventBus, WorkflowEvent};
use crate::services::resilience::ResiliencePipeline;
use crate::services::retry::RetryNotice;

/// Message from a worker back to the scheduler.
#[derive(Debug)]
enum WorkerMessage {
    /// Retry backoff started before the given attempt.
    Backoff { task: String, next_attempt: u32, delay_ms: u64 },
    /// A retry attempt is starting after backoff.
    Attempt { task: String, attempt: u32 },
    /// The worker finished with a terminal outcome.
    Finished { task: String, outcome: Result<AgentResponse, InvokeError> },
}

/// Shared read/cancel view of a running workflow.
#[derive(Clone)]
pub struct WorkflowHandle {
    pub id: Uuid,
    pub workflow_name: String,
    record: Arc<RwLock<WorkflowExecution>>,
    cancel: CancellationToken,
}

impl WorkflowHandle {
    /// A point-in-time copy of the execution record.
    pub async fn snapshot(&self) -> WorkflowExecution {
        self.record.read().await.clone()
    }

    /// Request cancellation; in-flight workers stop promptly and pending
    /// tasks are cancelled.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

struct AgentHandle {
    agent: Arc<dyn Agent>,
    semaphore: Option<Arc<Semaphore>>,
}

/// Executes one workflow run to completion.
pub struct WorkflowRunner {
    spec: WorkflowSpec,
    graph: TaskGraph,
    agents: HashMap<String, AgentHandle>,
    breakers: BreakerRegistry,
    bus: Arc<EventBus>,
    record: Arc<RwLock<WorkflowExecution>>,
    cancel: CancellationToken,
    id: Uuid,
}

impl WorkflowRunner {
    /// Build a runner from a descriptor and pre-constructed agents (one
    /// per agent descriptor, as produced by the agent factory).
    ///
    /// Fails with `ConfigInvalid` before any task runs when the descriptor
    /// is malformed or an agent instance is missing.
    pub fn new(
        spec: WorkflowSpec,
        agents: HashMap<String, Arc<dyn Agent>>,
        bus: Arc<EventBus>,
    ) -> DomainResult<Self> {
        spec.validate()?;
        let graph = TaskGraph::from_specs(&spec.tasks)?;
        let id = Uuid::new_v4();

        let mut handles = HashMap::new();
        for agent_spec in &spec.agents {
            let Some(agent) = agents.get(&agent_spec.name) else {
                return Err(DomainError::ConfigInvalid(format!(
                    "no agent instance constructed for '{}'",
                    agent_spec.name
                )));
            };
            handles.insert(
                agent_spec.name.clone(),
                AgentHandle {
                    agent: Arc::clone(agent),
                    semaphore: agent_spec
                        .max_concurrency
                        .map(|cap| Arc::new(Semaphore::new(cap))),
                },
            );
        }

        let breakers = BreakerRegistry::from_specs(&spec.agents, &bus, id);
        let record = WorkflowExecution::new(id, &spec.name, graph.declaration_order());

        Ok(Self {
            spec,
            graph,
            agents: handles,
            breakers,
            bus,
            record: Arc::new(RwLock::new(record)),
            cancel: CancellationToken::new(),
            id,
        })
    }

    /// Shared view for observers (REST status, cancellation).
    pub fn handle(&self) -> WorkflowHandle {
        WorkflowHandle {
            id: self.id,
            workflow_name: self.spec.name.clone(),
            record: Arc::clone(&self.record),
            cancel: self.cancel.clone(),
        }
    }

    /// Run the workflow to a terminal state.
    ///
    /// Returns only when every task is terminal. Agent failures never
    /// escape; they are recorded on the per-task execution records and the
    /// returned record carries the aggregate outcome.
    pub async fn run(self) -> DomainResult<WorkflowExecution> {
        {
            let mut record = self.record.write().await;
            record.state = WorkflowState::Running;
            record.started_at = Some(Utc::now());
        }
        self.bus
            .publish(WorkflowEvent::workflow_started(self.id, self.spec.tasks.len()));
        tracing::info!(
            workflow = %self.spec.name,
            workflow_id = %self.id,
            total_tasks = self.spec.tasks.len(),
            parallel = self.spec.parallel_execution,
            strategy = self.spec.failure_strategy.as_str(),
            "workflow started"
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<WorkerMessage>();
        let deadline = self
            .spec
            .global_timeout_secs
            .map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));

        let mut in_flight: HashSet<String> = HashSet::new();
        let mut halted = false;
        let mut deadline_hit = false;
        let mut externally_cancelled = false;

        loop {
            if in_flight.is_empty() {
                if !halted {
                    let mut batch = self.ready_tasks().await;
                    if !self.spec.parallel_execution {
                        batch.truncate(1);
                    }
                    for name in batch {
                        self.dispatch(&name, &tx, &mut in_flight).await;
                    }
                }

                if in_flight.is_empty() {
                    // Nothing dispatchable: finished, halted, or stuck on
                    // upstream failures.
                    break;
                }
            }

            tokio::select! {
                maybe_msg = rx.recv() => {
                    if let Some(msg) = maybe_msg {
                        self.handle_message(msg, &mut in_flight, &mut halted).await;
                    }
                }
                () = async { tokio::time::sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now)).await },
                    if deadline.is_some() && !deadline_hit =>
                {
                    tracing::warn!(workflow_id = %self.id, "global deadline elapsed, cancelling run");
                    deadline_hit = true;
                    halted = true;
                    self.cancel.cancel();
                }
                () = self.cancel.cancelled(), if !externally_cancelled && !halted => {
                    tracing::info!(workflow_id = %self.id, "cancellation requested");
                    externally_cancelled = true;
                    halted = true;
                }
            }
        }

        let reason = if deadline_hit {
            "global deadline elapsed"
        } else if externally_cancelled {
            "workflow cancelled"
        } else if halted {
            "workflow stopped on first failure"
        } else {
            "upstream dependency failed"
        };
        self.cancel_pending(reason).await;

        let final_record = self.finalize(deadline_hit, externally_cancelled).await;
        self.bus.publish(WorkflowEvent::workflow_finished(&final_record));
        tracing::info!(
            workflow_id = %self.id,
            state = %final_record.state,
            completed = final_record.completed_tasks(),
            failed = final_record.failed_tasks(),
            cancelled = final_record.cancelled_tasks(),
            "workflow finished"
        );
        Ok(final_record)
    }

    /// Pending tasks whose dependencies are all satisfied, in declaration
    /// order. A FAILED dependency with `continue_on_failure` counts as
    /// satisfied; its dependents observe a missing result.
    async fn ready_tasks(&self) -> Vec<String> {
        let record = self.record.read().await;
        self.graph
            .declaration_order()
            .iter()
            .filter(|name| {
                let Some(task) = record.tasks.get(name.as_str()) else {
                    return false;
                };
                if task.state != TaskState::Pending {
                    return false;
                }
                self.graph.dependencies_of(name).iter().all(|dep| {
                    let Some(dep_exec) = record.tasks.get(dep) else {
                        return false;
                    };
                    match dep_exec.state {
                        TaskState::Completed => true,
                        TaskState::Failed => self
                            .spec
                            .task(dep)
                            .is_some_and(|spec| spec.continue_on_failure),
                        _ => false,
                    }
                })
            })
            .cloned()
            .collect()
    }

    /// Transition `name` through READY into RUNNING and spawn its worker.
    async fn dispatch(
        &self,
        name: &str,
        tx: &mpsc::UnboundedSender<WorkerMessage>,
        in_flight: &mut HashSet<String>,
    ) {
        let Some(task_spec) = self.spec.task(name) else {
            return;
        };
        let Some(handle) = self.agents.get(&task_spec.agent) else {
            return;
        };
        let Some(breaker) = self.breakers.for_agent(&task_spec.agent) else {
            return;
        };
        let Some(agent_spec) = self.spec.agent(&task_spec.agent) else {
            return;
        };

        self.transition(name, TaskState::Ready, None, |_| {}).await;
        self.transition(name, TaskState::Running, None, |t| t.attempts = 1)
            .await;
        in_flight.insert(name.to_string());

        // Task overrides replace the agent defaults wholesale.
        let retry = task_spec.retry.clone().unwrap_or_else(|| agent_spec.retry.clone());
        let timeout = task_spec
            .timeout_secs
            .map_or_else(|| agent_spec.timeout(), Duration::from_secs);

        let params = {
            let record = self.record.read().await;
            bind_parameters(&task_spec.parameters, &record.tasks)
        };

        let pipeline = ResiliencePipeline::new(Arc::clone(&handle.agent), breaker, retry, timeout);
        let action = task_spec.action.clone();
        let semaphore = handle.semaphore.clone();
        let cancel = self.cancel.clone();
        let task_name = name.to_string();
        let tx = tx.clone();

        tracing::debug!(task = %task_name, agent = %task_spec.agent, "dispatching task");

        tokio::spawn(async move {
            let _permit = match semaphore {
                Some(sem) => sem.acquire_owned().await.ok(),
                None => None,
            };

            let notify_tx = tx.clone();
            let notify_name = task_name.clone();
            let outcome = pipeline
                .invoke(&action, &params, &cancel, move |notice| {
                    let msg = match notice {
                        RetryNotice::Backoff { next_attempt, delay_ms } => WorkerMessage::Backoff {
                            task: notify_name.clone(),
                            next_attempt,
                            delay_ms,
                        },
                        RetryNotice::Attempt { attempt } => WorkerMessage::Attempt {
                            task: notify_name.clone(),
                            attempt,
                        },
                    };
                    let _ = notify_tx.send(msg);
                })
                .await;

            let _ = tx.send(WorkerMessage::Finished { task: task_name, outcome });
        });
    }

    async fn handle_message(
        &self,
        msg: WorkerMessage,
        in_flight: &mut HashSet<String>,
        halted: &mut bool,
    ) {
        match msg {
            WorkerMessage::Backoff { task, next_attempt, delay_ms } => {
                tracing::debug!(task = %task, next_attempt, delay_ms, "task backing off");
                self.transition(&task, TaskState::Retrying, Some(delay_ms), |_| {})
                    .await;
            }
            WorkerMessage::Attempt { task, attempt } => {
                self.transition(&task, TaskState::Running, None, |t| t.attempts = attempt)
                    .await;
            }
            WorkerMessage::Finished { task, outcome } => {
                in_flight.remove(&task);
                match outcome {
                    Ok(response) => {
                        self.transition(&task, TaskState::Completed, None, |t| {
                            t.result = Some(response.result);
                        })
                        .await;
                        tracing::info!(task = %task, "task completed");
                    }
                    Err(err) if matches!(err, InvokeError::Cancelled(_)) => {
                        self.transition(&task, TaskState::Cancelled, None, |t| {
                            t.error = Some(TaskError::from(&err));
                        })
                        .await;
                        tracing::info!(task = %task, "task cancelled");
                    }
                    Err(err) => {
                        self.transition(&task, TaskState::Failed, None, |t| {
                            t.error = Some(TaskError::from(&err));
                        })
                        .await;
                        tracing::warn!(task = %task, error = %err, "task failed");
                        self.apply_failure_policy(&task, halted).await;
                    }
                }
            }
        }
    }

    /// Workflow-level reaction to a FAILED task.
    async fn apply_failure_policy(&self, failed_task: &str, halted: &mut bool) {
        match self.spec.failure_strategy {
            FailureStrategy::StopOnFirstFailure => {
                *halted = true;
                // In-flight workers stop retrying and report; nothing new
                // is dispatched.
                self.cancel.cancel();
                self.cancel_pending("workflow stopped on first failure").await;
            }
            FailureStrategy::ContinueOnFailure | FailureStrategy::PartialCompletionAllowed => {
                let tolerated = self
                    .spec
                    .task(failed_task)
                    .is_some_and(|spec| spec.continue_on_failure);
                if tolerated {
                    return;
                }
                let dependents = self.graph.transitive_dependents(failed_task);
                for name in dependents {
                    self.cancel_if_pending(&name, "upstream task failed").await;
                }
            }
        }
    }

    /// Cancel every task still PENDING.
    async fn cancel_pending(&self, reason: &str) {
        let pending: Vec<String> = {
            let record = self.record.read().await;
            record
                .tasks
                .values()
                .filter(|t| t.state == TaskState::Pending)
                .map(|t| t.name.clone())
                .collect()
        };
        for name in pending {
            self.cancel_if_pending(&name, reason).await;
        }
    }

    async fn cancel_if_pending(&self, name: &str, reason: &str) {
        let is_pending = {
            let record = self.record.read().await;
            record
                .tasks
                .get(name)
                .is_some_and(|t| t.state == TaskState::Pending)
        };
        if is_pending {
            let error = TaskError {
                code: "cancelled".to_string(),
                message: reason.to_string(),
            };
            self.transition(name, TaskState::Cancelled, None, |t| {
                t.error = Some(error);
            })
            .await;
            tracing::info!(task = %name, reason, "task cancelled");
        }
    }

    /// Apply a state transition under the write lock and publish the
    /// corresponding event. Violations are logged, never propagated: a
    /// stale worker message must not poison the run.
    async fn transition(
        &self,
        name: &str,
        next: TaskState,
        backoff_ms: Option<u64>,
        update: impl FnOnce(&mut TaskExecution),
    ) {
        let event = {
            let mut record = self.record.write().await;
            let Some(task) = record.tasks.get_mut(name) else {
                tracing::warn!(task = %name, "transition for unknown task ignored");
                return;
            };
            let old_state = task.state;
            if !old_state.can_transition_to(next) {
                tracing::warn!(
                    task = %name,
                    from = %old_state,
                    to = %next,
                    "ignoring invalid transition"
                );
                return;
            }
            update(task);
            if let Err(err) = task.transition_to(next) {
                tracing::warn!(task = %name, error = %err, "ignoring invalid transition");
                return;
            }
            WorkflowEvent::task_transition(task, old_state, backoff_ms)
        };
        self.bus.publish(event);
    }

    /// Compute and record the terminal workflow state.
    async fn finalize(&self, deadline_hit: bool, externally_cancelled: bool) -> WorkflowExecution {
        let mut record = self.record.write().await;
        let completed = record.completed_tasks();
        let failed = record.failed_tasks();

        let state = if completed == record.total_tasks {
            WorkflowState::Completed
        } else if deadline_hit {
            WorkflowState::Failed
        } else if externally_cancelled {
            WorkflowState::Cancelled
        } else if self.spec.failure_strategy == FailureStrategy::PartialCompletionAllowed
            && completed > 0
            && failed > 0
        {
            WorkflowState::PartiallyCompleted
        } else {
            WorkflowState::Failed
        };

        record.state = state;
        record.ended_at = Some(Utc::now());
        record.clone()
    }
}
