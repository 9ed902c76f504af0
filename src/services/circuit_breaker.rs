//! Per-agent circuit breakers.
//!
//! One breaker instance per configured agent, shared across all of that
//! agent's concurrent invocations. The internal mutex is held only across
//! counter updates, never across an external call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use crate::domain::models::{AgentSpec, BreakerConfig};
use crate::services::event_bus::{EventBus, EventKind, WorkflowEvent};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Requests flow normally.
    Closed,
    /// Requests are denied until the recovery timeout elapses.
    Open,
    /// A single probe request is admitted to test recovery.
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Circuit breaker for a single agent.
pub struct CircuitBreaker {
    agent: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    events: Option<(Arc<EventBus>, Uuid)>,
}

impl CircuitBreaker {
    pub fn new(agent: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            agent: agent.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
            events: None,
        }
    }

    /// Publish breaker transitions for the given run.
    pub fn with_events(mut self, bus: Arc<EventBus>, workflow_id: Uuid) -> Self {
        self.events = Some((bus, workflow_id));
        self
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    /// Whether a call may proceed right now.
    ///
    /// In OPEN, the first call after the recovery timeout flips the breaker
    /// to HALF_OPEN and is admitted as the probe; concurrent callers are
    /// denied until the probe's outcome is recorded.
    pub fn may_invoke(&self) -> bool {
        let decision = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            match inner.state {
                BreakerState::Closed => Decision::Allow,
                BreakerState::Open => {
                    let recovered = inner
                        .opened_at
                        .is_some_and(|at| at.elapsed() >= self.config.recovery_timeout());
                    if recovered {
                        inner.state = BreakerState::HalfOpen;
                        inner.probe_in_flight = true;
                        Decision::AllowProbe
                    } else {
                        Decision::Deny
                    }
                }
                BreakerState::HalfOpen => {
                    if inner.probe_in_flight {
                        Decision::Deny
                    } else {
                        inner.probe_in_flight = true;
                        Decision::Allow
                    }
                }
            }
        };

        if matches!(decision, Decision::AllowProbe) {
            tracing::info!(agent = %self.agent, "circuit breaker half-open, admitting probe");
            self.emit(EventKind::BreakerHalfOpen);
        }
        !matches!(decision, Decision::Deny)
    }

    /// Record a successful invocation outcome.
    pub fn record_success(&self) {
        let closed = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.probe_in_flight = false;
            match inner.state {
                BreakerState::Closed => {
                    inner.failures = 0;
                    false
                }
                BreakerState::HalfOpen => {
                    inner.state = BreakerState::Closed;
                    inner.failures = 0;
                    inner.opened_at = None;
                    true
                }
                // Denied calls are never invoked, so no outcome arrives here.
                BreakerState::Open => false,
            }
        };

        if closed {
            tracing::info!(agent = %self.agent, "circuit breaker closed");
            self.emit(EventKind::BreakerClosed);
        }
    }

    /// Record a transport-class failure outcome.
    pub fn record_failure(&self) {
        let opened = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.probe_in_flight = false;
            match inner.state {
                BreakerState::Closed => {
                    inner.failures += 1;
                    if inner.failures >= self.config.failure_threshold {
                        inner.state = BreakerState::Open;
                        inner.opened_at = Some(Instant::now());
                        true
                    } else {
                        false
                    }
                }
                BreakerState::HalfOpen => {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    true
                }
                BreakerState::Open => false,
            }
        };

        if opened {
            tracing::warn!(
                agent = %self.agent,
                threshold = self.config.failure_threshold,
                "circuit breaker opened"
            );
            self.emit(EventKind::BreakerOpened);
        }
    }

    fn emit(&self, kind: EventKind) {
        if let Some((bus, workflow_id)) = &self.events {
            bus.publish(WorkflowEvent::breaker(*workflow_id, &self.agent, kind));
        }
    }
}

enum Decision {
    Allow,
    AllowProbe,
    Deny,
}

/// One breaker per agent for the duration of a run.
pub struct BreakerRegistry {
    breakers: HashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    /// Build breakers for every agent descriptor, wired to the run's bus.
    pub fn from_specs(agents: &[AgentSpec], bus: &Arc<EventBus>, workflow_id: Uuid) -> Self {
        let breakers = agents
            .iter()
            .map(|spec| {
                let breaker = CircuitBreaker::new(&spec.name, spec.breaker.clone())
                    .with_events(Arc::clone(bus), workflow_id);
                (spec.name.clone(), Arc::new(breaker))
            })
            .collect();
        Self { breakers }
    }

    pub fn for_agent(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).cloned()
    }
}
