//! Transport normalization: each agent variant driven against a mock
//! endpoint must produce the same normalized response shape as the real
//! one, with the auth bundle applied uniformly.

use std::collections::HashMap;

use mockito::Matcher;
use serde_json::json;

use maestro::domain::errors::InvokeError;
use maestro::domain::models::{AgentKind, AgentSpec, AuthConfig};
use maestro::infrastructure::agents::{ChatAgent, HttpAgent, JsonRpcAgent};
use maestro::domain::ports::Agent;

fn spec(kind: AgentKind, endpoint: &str) -> AgentSpec {
    AgentSpec {
        name: "agent".to_string(),
        kind,
        endpoint: endpoint.to_string(),
        auth: None,
        timeout_secs: 30,
        retry: Default::default(),
        breaker: Default::default(),
        max_concurrency: None,
        parameters: HashMap::new(),
    }
}

// ---------------------------------------------------------------------------
// Chat-LLM
// ---------------------------------------------------------------------------

#[tokio::test]
async fn chat_completion_lifts_first_choice_content() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .match_header("content-type", "application/json")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "choices": [{"message": {"role": "assistant", "content": "Hello!"}}],
                "usage": {"total_tokens": 5}
            })
            .to_string(),
        )
        .create_async()
        .await;

    let agent = ChatAgent::from_spec(&spec(AgentKind::ChatLlm, &server.url())).unwrap();
    let params = HashMap::from([(
        "messages".to_string(),
        json!([{"role": "user", "content": "hi"}]),
    )]);

    let response = agent.invoke_raw("chat_completion", &params).await.unwrap();
    assert!(response.success);
    assert_eq!(response.result, json!("Hello!"));
    mock.assert_async().await;
}

#[tokio::test]
async fn chat_other_actions_return_the_whole_body() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/")
        .with_status(200)
        .with_body(r#"{"embedding": [1, 2, 3]}"#)
        .create_async()
        .await;

    let agent = ChatAgent::from_spec(&spec(AgentKind::ChatLlm, &server.url())).unwrap();
    let response = agent.invoke_raw("embed", &HashMap::new()).await.unwrap();
    assert_eq!(response.result, json!({"embedding": [1, 2, 3]}));
}

#[tokio::test]
async fn chat_sends_bearer_auth_and_merged_params() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .match_header("authorization", "Bearer secret-token")
        .match_body(Matcher::PartialJson(json!({
            "model": "default-model",
            "temperature": 0.5
        })))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let mut agent_spec = spec(AgentKind::ChatLlm, &server.url());
    agent_spec.auth = Some(AuthConfig::Bearer { token: "secret-token".into() });
    agent_spec.parameters = HashMap::from([
        ("model".to_string(), json!("default-model")),
        ("temperature".to_string(), json!(0.1)),
    ]);

    let agent = ChatAgent::from_spec(&agent_spec).unwrap();
    let params = HashMap::from([("temperature".to_string(), json!(0.5))]);
    agent.invoke_raw("chat_completion", &params).await.unwrap();
    mock.assert_async().await;
}

// ---------------------------------------------------------------------------
// JSON-RPC
// ---------------------------------------------------------------------------

#[tokio::test]
async fn jsonrpc_wraps_action_and_extracts_result() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({
            "jsonrpc": "2.0",
            "method": "tools/search",
            "params": {"query": "rust"}
        })))
        .with_status(200)
        .with_body(r#"{"jsonrpc": "2.0", "id": 1, "result": {"hits": 3}}"#)
        .create_async()
        .await;

    let agent = JsonRpcAgent::from_spec(&spec(AgentKind::JsonrpcTool, &server.url())).unwrap();
    let params = HashMap::from([("query".to_string(), json!("rust"))]);

    let response = agent.invoke_raw("tools/search", &params).await.unwrap();
    assert!(response.success);
    assert_eq!(response.result, json!({"hits": 3}));
    mock.assert_async().await;
}

#[tokio::test]
async fn jsonrpc_client_error_member_is_a_rejection() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/")
        .with_status(200)
        .with_body(r#"{"jsonrpc": "2.0", "id": 1, "error": {"code": -32601, "message": "method not found"}}"#)
        .create_async()
        .await;

    let agent = JsonRpcAgent::from_spec(&spec(AgentKind::JsonrpcTool, &server.url())).unwrap();
    let err = agent.invoke_raw("nope", &HashMap::new()).await.unwrap_err();
    assert!(matches!(err, InvokeError::Rejection(_)));
    assert!(err.to_string().contains("method not found"));
}

#[tokio::test]
async fn jsonrpc_server_error_member_is_retryable() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/")
        .with_status(200)
        .with_body(r#"{"jsonrpc": "2.0", "id": 1, "error": {"code": -32000, "message": "backend busy"}}"#)
        .create_async()
        .await;

    let agent = JsonRpcAgent::from_spec(&spec(AgentKind::JsonrpcTool, &server.url())).unwrap();
    let err = agent.invoke_raw("busy", &HashMap::new()).await.unwrap_err();
    assert!(matches!(err, InvokeError::Transport(_)));
    assert!(err.is_retryable());
}

// ---------------------------------------------------------------------------
// Generic HTTP
// ---------------------------------------------------------------------------

#[tokio::test]
async fn http_honors_method_path_query_and_headers() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v2/items")
        .match_query(Matcher::UrlEncoded("limit".into(), "5".into()))
        .match_header("x-api-key", "k123")
        .match_header("x-trace", "abc")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"items": []}"#)
        .create_async()
        .await;

    let mut agent_spec = spec(AgentKind::GenericHttp, &server.url());
    agent_spec.auth = Some(AuthConfig::ApiKey { key: "k123".into(), header: "X-API-Key".into() });

    let agent = HttpAgent::from_spec(&agent_spec).unwrap();
    let params = HashMap::from([
        ("method".to_string(), json!("get")),
        ("endpoint".to_string(), json!("/v2/items")),
        ("query".to_string(), json!({"limit": 5})),
        ("headers".to_string(), json!({"X-Trace": "abc"})),
    ]);

    let response = agent.invoke_raw("fetch", &params).await.unwrap();
    assert!(response.success);
    assert_eq!(response.result, json!({"items": []}));
    mock.assert_async().await;
}

#[tokio::test]
async fn http_posts_json_body_with_basic_auth() {
    let mut server = mockito::Server::new_async().await;
    // base64("user:pass")
    let mock = server
        .mock("POST", "/")
        .match_header("authorization", "Basic dXNlcjpwYXNz")
        .match_body(Matcher::Json(json!({"name": "demo"})))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id": 9}"#)
        .create_async()
        .await;

    let mut agent_spec = spec(AgentKind::GenericHttp, &server.url());
    agent_spec.auth = Some(AuthConfig::Basic { username: "user".into(), password: "pass".into() });

    let agent = HttpAgent::from_spec(&agent_spec).unwrap();
    let params = HashMap::from([("body".to_string(), json!({"name": "demo"}))]);

    let response = agent.invoke_raw("create", &params).await.unwrap();
    assert!(response.success);
    assert_eq!(response.result, json!({"id": 9}));
    mock.assert_async().await;
}

#[tokio::test]
async fn http_non_json_body_stays_raw() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "text/plain")
        .with_body("plain text result")
        .create_async()
        .await;

    let agent = HttpAgent::from_spec(&spec(AgentKind::GenericHttp, &server.url())).unwrap();
    let response = agent.invoke_raw("call", &HashMap::new()).await.unwrap();
    assert_eq!(response.result, json!("plain text result"));
}

#[tokio::test]
async fn http_status_classes_map_to_the_error_taxonomy() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/missing")
        .with_status(404)
        .with_body("not found")
        .create_async()
        .await;
    server
        .mock("POST", "/down")
        .with_status(502)
        .with_body("bad gateway")
        .create_async()
        .await;

    let agent = HttpAgent::from_spec(&spec(AgentKind::GenericHttp, &server.url())).unwrap();

    let params = HashMap::from([("endpoint".to_string(), json!("/missing"))]);
    let err = agent.invoke_raw("call", &params).await.unwrap_err();
    assert!(matches!(err, InvokeError::Rejection(_)));

    let params = HashMap::from([("endpoint".to_string(), json!("/down"))]);
    let err = agent.invoke_raw("call", &params).await.unwrap_err();
    assert!(matches!(err, InvokeError::Transport(_)));
}

#[tokio::test]
async fn connect_failure_is_a_transport_fault() {
    // Nothing listens on this port.
    let agent =
        HttpAgent::from_spec(&spec(AgentKind::GenericHttp, "http://127.0.0.1:9")).unwrap();
    let err = agent.invoke_raw("call", &HashMap::new()).await.unwrap_err();
    assert!(matches!(err, InvokeError::Transport(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn invalid_method_is_rejected_without_a_wire_call() {
    let agent =
        HttpAgent::from_spec(&spec(AgentKind::GenericHttp, "http://127.0.0.1:9")).unwrap();
    let params = HashMap::from([("method".to_string(), json!("NOT A METHOD"))]);
    let err = agent.invoke_raw("call", &params).await.unwrap_err();
    assert!(matches!(err, InvokeError::Rejection(_)));
}
