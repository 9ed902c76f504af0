//! Domain errors for the maestro workflow system.

use thiserror::Error;

/// Classified outcome of a failed agent invocation, as produced by the
/// transports and the resilience pipeline wrapped around them.
///
/// Classification drives two independent decisions: whether the retry
/// controller may attempt the call again, and whether the failure feeds the
/// agent's circuit breaker.
#[derive(Debug, Clone, Error)]
pub enum InvokeError {
    /// The effective deadline elapsed before the endpoint responded.
    #[error("request timed out after {}ms", timeout.as_millis())]
    Timeout { timeout: std::time::Duration },

    /// Connect failure, DNS failure, 5xx response, or an RPC-level
    /// server fault.
    #[error("transport fault: {0}")]
    Transport(String),

    /// 4xx response, JSON-RPC client-error member, or request validation
    /// failure. Never retried.
    #[error("rejected by remote endpoint: {0}")]
    Rejection(String),

    /// Every permitted attempt failed with a retryable error.
    #[error("retries exhausted after {attempts} attempt(s): {last}")]
    RetryExhausted { attempts: u32, last: Box<InvokeError> },

    /// The agent's circuit breaker denied the call.
    #[error("circuit breaker open for agent '{agent}'")]
    BreakerOpen { agent: String },

    /// Workflow cancellation or an upstream-failure cascade.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl InvokeError {
    /// Transport-class faults may be retried; rejections, breaker denials,
    /// and cancellations may not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport(_))
    }

    /// Whether this failure counts toward the circuit breaker.
    ///
    /// Only transport-class faults count, so a misconfigured task (4xx)
    /// cannot poison breaker state shared with well-formed tasks.
    pub fn counts_toward_breaker(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Transport(_) => true,
            Self::RetryExhausted { last, .. } => last.counts_toward_breaker(),
            Self::Rejection(_) | Self::BreakerOpen { .. } | Self::Cancelled(_) => false,
        }
    }

    /// Stable machine-readable code recorded on execution records and
    /// event payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "transport_timeout",
            Self::Transport(_) => "transport_fault",
            Self::Rejection(_) => "remote_rejection",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::BreakerOpen { .. } => "breaker_open",
            Self::Cancelled(_) => "cancelled",
        }
    }
}

/// Domain-level errors for configuration and state-machine violations.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid workflow configuration: {0}")]
    ConfigInvalid(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("dependency cycle detected involving task: {0}")]
    DependencyCycle(String),

    #[error("agent construction failed: {0}")]
    AgentBuildFailed(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}
