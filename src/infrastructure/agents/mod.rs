//! Agent transport implementations and the agent factory.

pub mod chat;
pub mod factory;
pub mod http;
pub mod jsonrpc;

pub use chat::ChatAgent;
pub use factory::{build_agents, AgentFactory};
pub use http::HttpAgent;
pub use jsonrpc::JsonRpcAgent;

use base64::Engine as _;
use reqwest::{RequestBuilder, StatusCode};

use crate::domain::errors::{DomainError, DomainResult, InvokeError};
use crate::domain::models::AuthConfig;

/// Build the pooled HTTP client shared by all invocations of one agent.
///
/// No client-level timeout: the resilience pipeline enforces the
/// task-effective deadline around each call.
pub(crate) fn build_client() -> DomainResult<reqwest::Client> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(10)
        .tcp_nodelay(true)
        .build()
        .map_err(|e| DomainError::AgentBuildFailed(format!("failed to build HTTP client: {e}")))
}

/// Apply the authentication bundle uniformly across transports.
pub(crate) fn apply_auth(request: RequestBuilder, auth: Option<&AuthConfig>) -> RequestBuilder {
    match auth {
        None => request,
        Some(AuthConfig::Bearer { token }) => request.bearer_auth(token),
        Some(AuthConfig::ApiKey { key, header }) => request.header(header.as_str(), key.as_str()),
        Some(AuthConfig::Basic { username, password }) => {
            let encoded =
                base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
            request.header(reqwest::header::AUTHORIZATION, format!("Basic {encoded}"))
        }
    }
}

/// Classify a non-success HTTP status: 5xx is a retryable transport fault,
/// everything else is a non-retryable rejection.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> InvokeError {
    let detail = format!("{status}: {}", snippet(body));
    if status.is_server_error() {
        InvokeError::Transport(detail)
    } else {
        InvokeError::Rejection(detail)
    }
}

/// Map a wire-level reqwest failure (connect, DNS, protocol) to the
/// transport fault class.
pub(crate) fn transport_error(err: &reqwest::Error) -> InvokeError {
    InvokeError::Transport(err.to_string())
}

fn snippet(body: &str) -> String {
    const MAX: usize = 200;
    if body.chars().count() <= MAX {
        body.to_string()
    } else {
        let truncated: String = body.chars().take(MAX).collect();
        format!("{truncated}...")
    }
}
