//! Event bus for workflow observers.
//!
//! Fan-out to subscribers registered on a per-run bus. Dispatch order
//! follows registration order; each subscriber owns a bounded queue and a
//! slow subscriber loses events (with a logged warning) rather than
//! blocking the scheduler.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::models::execution::{TaskError, TaskExecution, TaskState, WorkflowExecution, WorkflowState};

/// Kind of an observer event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    WorkflowStarted,
    WorkflowCompleted,
    WorkflowFailed,
    TaskReady,
    TaskStarted,
    TaskRetrying,
    TaskCompleted,
    TaskFailed,
    TaskCancelled,
    BreakerOpened,
    BreakerHalfOpen,
    BreakerClosed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkflowStarted => "workflow_started",
            Self::WorkflowCompleted => "workflow_completed",
            Self::WorkflowFailed => "workflow_failed",
            Self::TaskReady => "task_ready",
            Self::TaskStarted => "task_started",
            Self::TaskRetrying => "task_retrying",
            Self::TaskCompleted => "task_completed",
            Self::TaskFailed => "task_failed",
            Self::TaskCancelled => "task_cancelled",
            Self::BreakerOpened => "breaker_opened",
            Self::BreakerHalfOpen => "breaker_half_open",
            Self::BreakerClosed => "breaker_closed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed event payload.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    Workflow {
        state: WorkflowState,
        completed: usize,
        failed: usize,
        cancelled: usize,
        total: usize,
    },
    Task {
        old_state: TaskState,
        new_state: TaskState,
        attempt: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<TaskError>,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        backoff_ms: Option<u64>,
    },
    Breaker { agent: String },
}

/// Event envelope delivered to observers.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowEvent {
    #[serde(rename = "event_type")]
    pub kind: EventKind,
    /// Bus-assigned monotonic sequence number.
    pub sequence: u64,
    pub workflow_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl WorkflowEvent {
    fn new(kind: EventKind, workflow_id: Uuid, task_name: Option<String>, payload: EventPayload) -> Self {
        Self {
            kind,
            sequence: 0,
            workflow_id,
            task_name,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Workflow entered RUNNING.
    pub fn workflow_started(workflow_id: Uuid, total_tasks: usize) -> Self {
        Self::new(
            EventKind::WorkflowStarted,
            workflow_id,
            None,
            EventPayload::Workflow {
                state: WorkflowState::Running,
                completed: 0,
                failed: 0,
                cancelled: 0,
                total: total_tasks,
            },
        )
    }

    /// Workflow reached a terminal state.
    pub fn workflow_finished(record: &WorkflowExecution) -> Self {
        let kind = match record.state {
            WorkflowState::Completed | WorkflowState::PartiallyCompleted => EventKind::WorkflowCompleted,
            _ => EventKind::WorkflowFailed,
        };
        Self::new(
            kind,
            record.id,
            None,
            EventPayload::Workflow {
                state: record.state,
                completed: record.completed_tasks(),
                failed: record.failed_tasks(),
                cancelled: record.cancelled_tasks(),
                total: record.total_tasks,
            },
        )
    }

    /// A task state transition; the kind is derived from the new state.
    pub fn task_transition(
        task: &TaskExecution,
        old_state: TaskState,
        backoff_ms: Option<u64>,
    ) -> Self {
        let kind = match task.state {
            TaskState::Ready => EventKind::TaskReady,
            TaskState::Running => EventKind::TaskStarted,
            TaskState::Retrying => EventKind::TaskRetrying,
            TaskState::Completed => EventKind::TaskCompleted,
            TaskState::Failed => EventKind::TaskFailed,
            TaskState::Pending | TaskState::Cancelled => EventKind::TaskCancelled,
        };
        Self::new(
            kind,
            task.workflow_id,
            Some(task.name.clone()),
            EventPayload::Task {
                old_state,
                new_state: task.state,
                attempt: task.attempts,
                error: task.error.clone(),
                result: task.result.clone(),
                backoff_ms,
            },
        )
    }

    /// A circuit breaker state change for an agent.
    pub fn breaker(workflow_id: Uuid, agent: &str, kind: EventKind) -> Self {
        Self::new(
            kind,
            workflow_id,
            None,
            EventPayload::Breaker { agent: agent.to_string() },
        )
    }
}

struct Subscriber {
    name: String,
    tx: mpsc::Sender<WorkflowEvent>,
}

/// Configuration for the event bus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Queue capacity per subscriber.
    pub queue_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { queue_capacity: 256 }
    }
}

/// Per-run event bus.
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    sequence: AtomicU64,
    queue_capacity: usize,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            sequence: AtomicU64::new(0),
            queue_capacity: config.queue_capacity,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(EventBusConfig::default())
    }

    /// Register an observer; events arrive on the returned receiver in
    /// publication order.
    pub fn subscribe(&self, name: impl Into<String>) -> mpsc::Receiver<WorkflowEvent> {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subs.push(Subscriber { name: name.into(), tx });
        rx
    }

    /// Deliver an event to every subscriber in registration order.
    ///
    /// Never blocks: a full queue drops the event for that subscriber.
    pub fn publish(&self, mut event: WorkflowEvent) {
        event.sequence = self.sequence.fetch_add(1, Ordering::SeqCst);

        let subs = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
        for sub in subs.iter() {
            match sub.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        subscriber = %sub.name,
                        event = %event.kind,
                        sequence = event.sequence,
                        "subscriber queue full, dropping event"
                    );
                }
                // Receiver dropped; nothing to deliver to.
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_publication_order() {
        let bus = EventBus::with_defaults();
        let mut rx = bus.subscribe("observer");
        let id = Uuid::new_v4();

        bus.publish(WorkflowEvent::workflow_started(id, 2));
        bus.publish(WorkflowEvent::breaker(id, "a1", EventKind::BreakerOpened));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.kind, EventKind::WorkflowStarted);
        assert_eq!(second.kind, EventKind::BreakerOpened);
        assert!(first.sequence < second.sequence);
    }

    #[tokio::test]
    async fn all_subscribers_receive_each_event() {
        let bus = EventBus::with_defaults();
        let mut rx1 = bus.subscribe("one");
        let mut rx2 = bus.subscribe("two");
        let id = Uuid::new_v4();

        bus.publish(WorkflowEvent::workflow_started(id, 1));

        assert_eq!(rx1.recv().await.unwrap().kind, EventKind::WorkflowStarted);
        assert_eq!(rx2.recv().await.unwrap().kind, EventKind::WorkflowStarted);
    }

    #[tokio::test]
    async fn overflow_drops_instead_of_blocking() {
        let bus = EventBus::new(EventBusConfig { queue_capacity: 1 });
        let mut rx = bus.subscribe("slow");
        let id = Uuid::new_v4();

        bus.publish(WorkflowEvent::workflow_started(id, 1));
        bus.publish(WorkflowEvent::breaker(id, "a1", EventKind::BreakerOpened));

        // Only the first event fits the queue.
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::WorkflowStarted);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_subscriber_does_not_disturb_publishing() {
        let bus = EventBus::with_defaults();
        let rx = bus.subscribe("gone");
        drop(rx);
        bus.publish(WorkflowEvent::workflow_started(Uuid::new_v4(), 1));
    }

    #[test]
    fn transition_event_kind_follows_new_state() {
        let id = Uuid::new_v4();
        let mut task = TaskExecution::new("t1", id);
        task.transition_to(TaskState::Ready).unwrap();
        let event = WorkflowEvent::task_transition(&task, TaskState::Pending, None);
        assert_eq!(event.kind, EventKind::TaskReady);
        assert_eq!(event.task_name.as_deref(), Some("t1"));
    }
}
