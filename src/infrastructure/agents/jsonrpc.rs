//! JSON-RPC 2.0 tool-server agent transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::domain::errors::{DomainResult, InvokeError};
use crate::domain::models::{AgentResponse, AgentSpec, AuthConfig};
use crate::domain::ports::Agent;

use super::{apply_auth, build_client, classify_status, transport_error};

/// Agent speaking JSON-RPC 2.0 over HTTP POST.
///
/// The task action becomes the RPC `method` and the task parameters the
/// RPC `params`. Request ids increase monotonically per agent instance.
pub struct JsonRpcAgent {
    name: String,
    endpoint: String,
    auth: Option<AuthConfig>,
    next_id: AtomicU64,
    client: reqwest::Client,
}

impl JsonRpcAgent {
    pub fn from_spec(spec: &AgentSpec) -> DomainResult<Self> {
        Ok(Self {
            name: spec.name.clone(),
            endpoint: spec.endpoint.clone(),
            auth: spec.auth.clone(),
            next_id: AtomicU64::new(1),
            client: build_client()?,
        })
    }
}

/// Classify a JSON-RPC `error` member. Server-class codes (`-32603`
/// internal error and the `-32000..=-32099` implementation range) are
/// transient transport faults; client-class codes (parse error, invalid
/// request, method not found, invalid params) are rejections.
fn classify_rpc_error(error: &Value) -> InvokeError {
    let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown JSON-RPC error");
    let detail = format!("JSON-RPC error {code}: {message}");

    if code == -32603 || (-32099..=-32000).contains(&code) {
        InvokeError::Transport(detail)
    } else {
        InvokeError::Rejection(detail)
    }
}

#[async_trait]
impl Agent for JsonRpcAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke_raw(
        &self,
        action: &str,
        params: &HashMap<String, Value>,
    ) -> Result<AgentResponse, InvokeError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": action,
            "params": params,
        });
        let started = Instant::now();

        let response = apply_auth(self.client.post(self.endpoint.as_str()), self.auth.as_ref())
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| transport_error(&e))?;
        let latency = started.elapsed();

        if !status.is_success() {
            return Err(classify_status(status, &text));
        }

        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| InvokeError::Transport(format!("malformed JSON-RPC response: {e}")))?;

        if let Some(error) = parsed.get("error") {
            if !error.is_null() {
                return Err(classify_rpc_error(error));
            }
        }

        let result = parsed.get("result").cloned().unwrap_or(Value::Null);
        Ok(AgentResponse::success(result, latency)
            .with_metadata("rpc_id", Value::from(id)))
    }
}
