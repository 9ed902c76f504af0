//! Chat/completion agent transport.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::domain::errors::{DomainResult, InvokeError};
use crate::domain::models::{AgentResponse, AgentSpec, AuthConfig};
use crate::domain::ports::Agent;

use super::{apply_auth, build_client, classify_status, transport_error};

/// Action whose response has the first choice's message content lifted
/// to the top level of the result payload.
const CHAT_COMPLETION: &str = "chat_completion";

/// Agent speaking an OpenAI-style chat/completion API.
///
/// The request body is the agent's configured parameters (`model`,
/// `max_tokens`, `temperature`, ...) merged with the task parameters,
/// task values winning.
pub struct ChatAgent {
    name: String,
    endpoint: String,
    auth: Option<AuthConfig>,
    defaults: Map<String, Value>,
    client: reqwest::Client,
}

impl ChatAgent {
    pub fn from_spec(spec: &AgentSpec) -> DomainResult<Self> {
        Ok(Self {
            name: spec.name.clone(),
            endpoint: spec.endpoint.clone(),
            auth: spec.auth.clone(),
            defaults: spec.parameters.clone().into_iter().collect(),
            client: build_client()?,
        })
    }

    fn request_body(&self, params: &HashMap<String, Value>) -> Map<String, Value> {
        let mut body = self.defaults.clone();
        for (key, value) in params {
            body.insert(key.clone(), value.clone());
        }
        body
    }
}

#[async_trait]
impl Agent for ChatAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke_raw(
        &self,
        action: &str,
        params: &HashMap<String, Value>,
    ) -> Result<AgentResponse, InvokeError> {
        let body = self.request_body(params);
        let started = Instant::now();

        let response = apply_auth(self.client.post(self.endpoint.as_str()), self.auth.as_ref())
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| transport_error(&e))?;
        let latency = started.elapsed();

        if !status.is_success() {
            return Err(classify_status(status, &text));
        }

        let parsed: Value =
            serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.clone()));
        let result = if action == CHAT_COMPLETION {
            parsed
                .pointer("/choices/0/message/content")
                .cloned()
                .unwrap_or(parsed)
        } else {
            parsed
        };

        Ok(AgentResponse::success(result, latency)
            .with_metadata("status", Value::from(status.as_u16())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(endpoint: &str) -> AgentSpec {
        AgentSpec {
            name: "llm".into(),
            kind: crate::domain::models::AgentKind::ChatLlm,
            endpoint: endpoint.into(),
            auth: None,
            timeout_secs: 30,
            retry: Default::default(),
            breaker: Default::default(),
            max_concurrency: None,
            parameters: HashMap::from([("model".to_string(), json!("test-model"))]),
        }
    }

    #[test]
    fn task_params_override_agent_defaults() {
        let agent = ChatAgent::from_spec(&spec("http://localhost")).unwrap();
        let params = HashMap::from([
            ("model".to_string(), json!("override")),
            ("messages".to_string(), json!([{"role": "user", "content": "hi"}])),
        ]);
        let body = agent.request_body(&params);
        assert_eq!(body["model"], json!("override"));
        assert!(body.contains_key("messages"));
    }
}
