//! `http.request` node — issues an outbound HTTP call inline.
//!
//! The client is behind a trait so tests can substitute a fake without
//! spinning up a server; `ReqwestHttpClient` is the production default.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{ExecutableNode, ExecutionContext, NodeError, NodeOutcome};

#[derive(Debug, Clone)]
pub struct HttpRequestSpec {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct HttpResponseSummary {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Value,
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, spec: HttpRequestSpec) -> Result<HttpResponseSummary, String>;
}

/// Production implementation backed by `reqwest`.
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, spec: HttpRequestSpec) -> Result<HttpResponseSummary, String> {
        let method = reqwest::Method::from_bytes(spec.method.to_uppercase().as_bytes())
            .map_err(|e| format!("invalid method '{}': {e}", spec.method))?;

        let mut builder = self
            .client
            .request(method, &spec.url)
            .timeout(Duration::from_millis(spec.timeout_ms));

        for (k, v) in &spec.headers {
            builder = builder.header(k, v);
        }
        if let Some(body) = &spec.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await.map_err(|e| e.to_string())?;
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let bytes = resp.bytes().await.map_err(|e| e.to_string())?;
        let body = serde_json::from_slice(&bytes).unwrap_or_else(|_| json!(String::from_utf8_lossy(&bytes)));

        Ok(HttpResponseSummary { status, headers, body })
    }
}

/// Built-in `http.request` node.
///
/// `config` shape: `{ "method": "POST", "url": "...", "headers": {...}, "body": {...}, "timeoutMs": 10000 }`.
pub struct HttpRequestNode {
    client: Box<dyn HttpClient>,
}

impl HttpRequestNode {
    pub fn new(client: impl HttpClient + 'static) -> Self {
        Self { client: Box::new(client) }
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new(ReqwestHttpClient::new())
    }
}

#[async_trait]
impl ExecutableNode for HttpRequestNode {
    async fn execute(&self, _input: Value, ctx: &ExecutionContext) -> Result<NodeOutcome, NodeError> {
        let url = ctx
            .config
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::Fatal("http.request node requires config.url".into()))?
            .to_string();
        let method = ctx
            .config
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_string();
        let headers = ctx
            .config
            .get("headers")
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        let body = ctx.config.get("body").cloned();
        let timeout_ms = ctx.config.get("timeoutMs").and_then(Value::as_u64).unwrap_or(30_000);

        let spec = HttpRequestSpec { method, url, headers, body, timeout_ms };

        match self.client.send(spec).await {
            Ok(resp) if resp.status < 400 => Ok(NodeOutcome::succeeded(json!({
                "status": resp.status,
                "headers": resp.headers,
                "body": resp.body,
            }))),
            Ok(resp) => Err(NodeError::Retryable(format!("http {} response", resp.status))),
            Err(e) => Err(NodeError::Retryable(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{NullCheckpointer, NullEmitter};
    use std::sync::Arc;
    use uuid::Uuid;

    struct FakeClient {
        status: u16,
        body: Value,
    }

    #[async_trait]
    impl HttpClient for FakeClient {
        async fn send(&self, _spec: HttpRequestSpec) -> Result<HttpResponseSummary, String> {
            Ok(HttpResponseSummary { status: self.status, headers: HashMap::new(), body: self.body.clone() })
        }
    }

    fn ctx(config: Value) -> ExecutionContext {
        ExecutionContext {
            organization_id: Uuid::nil(),
            user_id: None,
            run_id: Uuid::nil(),
            workflow_id: Uuid::nil(),
            node_id: "http".into(),
            node_type: "http.request".into(),
            attempt_count: 1,
            config,
            run_input: json!({}),
            steps: json!({}),
            runtime: json!({}),
            pending_remote_result: None,
            secrets: Default::default(),
            organization_settings: json!({}),
            emit: Arc::new(NullEmitter),
            checkpoint: Arc::new(NullCheckpointer),
            deadline: None,
        }
    }

    #[tokio::test]
    async fn success_response_succeeds() {
        let node = HttpRequestNode::new(FakeClient { status: 200, body: json!({"ok": true}) });
        let config = json!({"url": "https://example.test/x", "method": "GET"});
        let outcome = node.execute(json!({}), &ctx(config)).await.unwrap();
        match outcome {
            NodeOutcome::Succeeded { output, .. } => assert_eq!(output["status"], json!(200)),
            _ => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let node = HttpRequestNode::new(FakeClient { status: 503, body: json!(null) });
        let config = json!({"url": "https://example.test/x"});
        let err = node.execute(json!({}), &ctx(config)).await.unwrap_err();
        assert!(matches!(err, NodeError::Retryable(_)));
    }

    #[tokio::test]
    async fn missing_url_is_fatal() {
        let node = HttpRequestNode::new(FakeClient { status: 200, body: json!(null) });
        let err = node.execute(json!({}), &ctx(json!({}))).await.unwrap_err();
        assert!(matches!(err, NodeError::Fatal(_)));
    }
}
