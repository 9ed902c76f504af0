//! Generic HTTP agent transport.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use crate::domain::errors::{DomainResult, InvokeError};
use crate::domain::models::{AgentResponse, AgentSpec, AuthConfig};
use crate::domain::ports::Agent;

use super::{apply_auth, build_client, classify_status, transport_error};

/// Agent driving an arbitrary HTTP API from task parameters.
///
/// Reserved parameter keys: `method` (default POST), `endpoint` (path
/// appended to the base URL, default empty), `body` (JSON request body),
/// `query` (object of query parameters), `headers` (object of extra
/// headers, applied after the auth bundle).
pub struct HttpAgent {
    name: String,
    endpoint: String,
    auth: Option<AuthConfig>,
    client: reqwest::Client,
}

impl HttpAgent {
    pub fn from_spec(spec: &AgentSpec) -> DomainResult<Self> {
        Ok(Self {
            name: spec.name.clone(),
            endpoint: spec.endpoint.clone(),
            auth: spec.auth.clone(),
            client: build_client()?,
        })
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Agent for HttpAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke_raw(
        &self,
        action: &str,
        params: &HashMap<String, Value>,
    ) -> Result<AgentResponse, InvokeError> {
        let method = match params.get("method").and_then(Value::as_str) {
            None => Method::POST,
            Some(name) => name
                .to_ascii_uppercase()
                .parse::<Method>()
                .map_err(|_| InvokeError::Rejection(format!("invalid HTTP method '{name}'")))?,
        };

        let path = params
            .get("endpoint")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let url = format!("{}{path}", self.endpoint);

        let mut request = apply_auth(self.client.request(method, url.as_str()), self.auth.as_ref());

        if let Some(Value::Object(query)) = params.get("query") {
            let pairs: Vec<(String, String)> = query
                .iter()
                .map(|(k, v)| (k.clone(), scalar_to_string(v)))
                .collect();
            request = request.query(&pairs);
        }

        if let Some(Value::Object(headers)) = params.get("headers") {
            for (key, value) in headers {
                request = request.header(key.as_str(), scalar_to_string(value));
            }
        }

        if let Some(body) = params.get("body") {
            request = request.json(body);
        }

        let started = Instant::now();
        let response = request.send().await.map_err(|e| transport_error(&e))?;

        let status = response.status();
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("json"));
        let text = response.text().await.map_err(|e| transport_error(&e))?;
        let latency = started.elapsed();

        if !status.is_success() {
            return Err(classify_status(status, &text));
        }

        let result = if is_json {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        } else {
            Value::String(text)
        };

        Ok(AgentResponse::success(result, latency)
            .with_metadata("status", Value::from(status.as_u16()))
            .with_metadata("action", Value::from(action)))
    }
}
