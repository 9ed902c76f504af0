//! Agent descriptors: transport variant, authentication, and the
//! resilience policies bound to each configured agent.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Transport variant an agent speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Chat/completion endpoint (OpenAI-style message API).
    ChatLlm,
    /// JSON-RPC 2.0 tool server.
    JsonrpcTool,
    /// Arbitrary HTTP API driven by per-task parameters.
    GenericHttp,
    /// Registered by name in the factory's plug-in table.
    Custom,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatLlm => "chat_llm",
            Self::JsonrpcTool => "jsonrpc_tool",
            Self::GenericHttp => "generic_http",
            Self::Custom => "custom",
        }
    }
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

/// Authentication bundle applied uniformly across transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum AuthConfig {
    /// `Authorization: Bearer <token>`
    Bearer { token: String },
    /// `<header>: <key>`, header defaults to `X-API-Key`.
    ApiKey {
        key: String,
        #[serde(default = "default_api_key_header")]
        header: String,
    },
    /// `Authorization: Basic base64(username:password)`
    Basic { username: String, password: String },
}

/// Retry policy for an agent, overridable per task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total invocation attempts, including the first.
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    pub initial_delay_ms: u64,
    /// Cap on any single backoff.
    pub max_delay_ms: u64,
    /// Exponential base; must be greater than 1.
    pub backoff_base: f64,
    /// Multiply each delay by a uniform factor in [0.5, 1.5].
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Backoff before attempt `attempt` (1-indexed; attempt 1 has no
    /// backoff), ignoring jitter: `min(initial * base^(attempt-1), max)`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let raw = self.initial_delay_ms as f64 * self.backoff_base.powi(exponent as i32);
        let capped = raw.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Circuit breaker policy for an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive transport-class failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting a probe.
    pub recovery_timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
        }
    }
}

impl BreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

fn default_timeout_secs() -> u64 {
    30
}

/// Immutable agent descriptor from the workflow configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Unique name within the workflow.
    pub name: String,
    /// Transport variant.
    #[serde(rename = "type")]
    pub kind: AgentKind,
    /// Base endpoint URL.
    pub endpoint: String,
    /// Optional authentication bundle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
    /// Default request deadline for every invocation of this agent.
    #[serde(default = "default_timeout_secs", alias = "timeout")]
    pub timeout_secs: u64,
    /// Default retry policy.
    #[serde(default, alias = "retry_config")]
    pub retry: RetryConfig,
    /// Circuit breaker policy; one breaker instance per agent, shared
    /// across all of its concurrent invocations.
    #[serde(default, alias = "circuit_breaker")]
    pub breaker: BreakerConfig,
    /// Optional cap on concurrent invocations of this agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    /// Free-form per-variant parameters (e.g. `model` for chat agents,
    /// `driver` for custom agents).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, Value>,
}

impl AgentSpec {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Uniform value returned by every agent variant.
#[derive(Debug, Clone, Serialize)]
pub struct AgentResponse {
    pub success: bool,
    /// Normalized result payload.
    pub result: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Measured wall-clock latency of the wire call.
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl AgentResponse {
    pub fn success(result: Value, latency: Duration) -> Self {
        Self {
            success: true,
            result,
            error: None,
            latency_ms: latency.as_millis() as u64,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
