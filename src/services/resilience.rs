//! Resilience pipeline around a bare agent invocation.
//!
//! Composition order, outermost first: breaker gate, retry loop, timeout
//! guard, bare invocation. Every attempt's outcome is fed back to the
//! agent's breaker, with rejections and cancellations excluded from the
//! failure counter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::InvokeError;
use crate::domain::models::{AgentResponse, RetryConfig};
use crate::domain::ports::Agent;
use crate::services::circuit_breaker::CircuitBreaker;
use crate::services::retry::{RetryController, RetryNotice};

/// One agent invocation wrapped in breaker, retry, and timeout behavior.
///
/// Cheap to construct per dispatch: the agent and breaker are shared, the
/// retry and timeout settings are the task-effective policy (task override
/// when present, agent default otherwise).
pub struct ResiliencePipeline {
    agent: Arc<dyn Agent>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryController,
    timeout: Duration,
}

impl ResiliencePipeline {
    pub fn new(
        agent: Arc<dyn Agent>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            agent,
            breaker,
            retry: RetryController::new(retry),
            timeout,
        }
    }

    /// Invoke the agent with full resilience behavior.
    ///
    /// The breaker gates every attempt: a denial surfaces as
    /// [`InvokeError::BreakerOpen`], which is non-retryable and so ends the
    /// retry loop at once. Each attempt's outcome feeds the breaker
    /// (successes reset the failure counter, transport-class faults
    /// increment it, rejections and cancellations leave it untouched), so
    /// a breaker can open in the middle of a retry loop and deny the next
    /// attempt. Each attempt runs under the effective timeout and aborts
    /// promptly on cancellation.
    pub async fn invoke(
        &self,
        action: &str,
        params: &HashMap<String, Value>,
        cancel: &CancellationToken,
        notify: impl FnMut(RetryNotice),
    ) -> Result<AgentResponse, InvokeError> {
        let agent = Arc::clone(&self.agent);
        let breaker = Arc::clone(&self.breaker);
        let action = action.to_string();
        let params = params.clone();
        let timeout = self.timeout;
        let attempt_cancel = cancel.clone();

        self.retry
            .execute(cancel, notify, move |_attempt| {
                let agent = Arc::clone(&agent);
                let breaker = Arc::clone(&breaker);
                let action = action.clone();
                let params = params.clone();
                let cancel = attempt_cancel.clone();
                async move {
                    if !breaker.may_invoke() {
                        return Err(InvokeError::BreakerOpen {
                            agent: agent.name().to_string(),
                        });
                    }

                    let outcome = tokio::select! {
                        () = cancel.cancelled() => {
                            Err(InvokeError::Cancelled("cancelled in flight".into()))
                        }
                        result = tokio::time::timeout(timeout, agent.invoke_raw(&action, &params)) => {
                            match result {
                                Ok(inner) => inner,
                                Err(_) => Err(InvokeError::Timeout { timeout }),
                            }
                        }
                    };

                    match &outcome {
                        Ok(_) => breaker.record_success(),
                        Err(err) if err.counts_toward_breaker() => breaker.record_failure(),
                        Err(_) => {}
                    }
                    outcome
                }
            })
            .await
    }
}
