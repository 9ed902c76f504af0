//! The uniform agent invocation contract.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::InvokeError;
use crate::domain::models::AgentResponse;

/// A configured client of an external service.
///
/// Variants differ only in how they translate `(action, params)` to a wire
/// request and how they normalize the wire response. Implementations are
/// shared across concurrent invocations and must not hold per-call state.
#[async_trait]
pub trait Agent: Send + Sync {
    /// The agent's configured name.
    fn name(&self) -> &str;

    /// Perform one bare invocation, without retry, timeout, or breaker
    /// behavior; the resilience pipeline supplies those.
    async fn invoke_raw(
        &self,
        action: &str,
        params: &HashMap<String, Value>,
    ) -> Result<AgentResponse, InvokeError>;
}
