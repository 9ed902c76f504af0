//! Shared fixtures: a scripted in-process agent and descriptor builders.

// Each integration-test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use maestro::domain::errors::InvokeError;
use maestro::domain::models::{
    AgentKind, AgentResponse, AgentSpec, BreakerConfig, FailureStrategy, RetryConfig, TaskSpec,
    WorkflowSpec,
};
use maestro::domain::ports::Agent;

/// Scripted behavior for one action.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed(Value),
    /// Fail with transport faults for the first `failures` calls, then
    /// succeed with `value`.
    SucceedAfter { failures: u32, value: Value },
    FailTransport,
    Reject,
    SucceedSlow { delay_ms: u64, value: Value },
}

/// One observed invocation.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub action: String,
    pub params: HashMap<String, Value>,
    pub started: Instant,
    pub ended: Instant,
}

/// In-process agent driven by per-action scripts.
pub struct MockAgent {
    name: String,
    behaviors: HashMap<String, Behavior>,
    counters: Mutex<HashMap<String, u32>>,
    calls: Mutex<Vec<CallRecord>>,
}

impl MockAgent {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            behaviors: HashMap::new(),
            counters: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn behavior(mut self, action: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(action.to_string(), behavior);
        self
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, action: &str) -> Vec<CallRecord> {
        self.calls()
            .into_iter()
            .filter(|c| c.action == action)
            .collect()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Agent for MockAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke_raw(
        &self,
        action: &str,
        params: &HashMap<String, Value>,
    ) -> Result<AgentResponse, InvokeError> {
        let started = Instant::now();
        let count = {
            let mut counters = self.counters.lock().unwrap();
            let entry = counters.entry(action.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };

        let behavior = self
            .behaviors
            .get(action)
            .cloned()
            .unwrap_or(Behavior::Succeed(Value::Null));

        let outcome = match behavior {
            Behavior::Succeed(value) => Ok(value),
            Behavior::SucceedAfter { failures, value } => {
                if count <= failures {
                    Err(InvokeError::Transport("mock transport fault".into()))
                } else {
                    Ok(value)
                }
            }
            Behavior::FailTransport => Err(InvokeError::Transport("mock transport fault".into())),
            Behavior::Reject => Err(InvokeError::Rejection("mock rejection".into())),
            Behavior::SucceedSlow { delay_ms, value } => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(value)
            }
        };

        let ended = Instant::now();
        self.calls.lock().unwrap().push(CallRecord {
            action: action.to_string(),
            params: params.clone(),
            started,
            ended,
        });

        outcome.map(|value| AgentResponse::success(value, ended - started))
    }
}

/// Retry policy with millisecond delays suitable for tests.
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay_ms: 5,
        max_delay_ms: 50,
        backoff_base: 2.0,
        jitter: false,
    }
}

pub fn agent_spec(name: &str) -> AgentSpec {
    AgentSpec {
        name: name.to_string(),
        kind: AgentKind::GenericHttp,
        endpoint: "http://localhost:9999".to_string(),
        auth: None,
        timeout_secs: 30,
        retry: fast_retry(1),
        breaker: BreakerConfig {
            failure_threshold: 100,
            recovery_timeout_ms: 60_000,
        },
        max_concurrency: None,
        parameters: HashMap::new(),
    }
}

pub fn task_spec(name: &str, agent: &str, deps: &[&str]) -> TaskSpec {
    TaskSpec {
        name: name.to_string(),
        agent: agent.to_string(),
        // Behaviors are scripted per action; one action per task keeps
        // them independent.
        action: name.to_string(),
        parameters: HashMap::new(),
        depends_on: deps.iter().map(|s| (*s).to_string()).collect(),
        timeout_secs: None,
        retry: None,
        continue_on_failure: false,
    }
}

pub fn workflow_spec(name: &str, agents: Vec<AgentSpec>, tasks: Vec<TaskSpec>) -> WorkflowSpec {
    WorkflowSpec {
        name: name.to_string(),
        description: None,
        version: "1.0".to_string(),
        parallel_execution: false,
        failure_strategy: FailureStrategy::StopOnFirstFailure,
        global_timeout_secs: None,
        agents,
        tasks,
    }
}
