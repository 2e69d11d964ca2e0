//! The LLM provider seam. Concrete provider HTTP clients (OpenAI,
//! Anthropic, etc.) are an external collaborator this system doesn't
//! implement (spec: "the LLM provider HTTP clients" are explicitly out of
//! scope) — callers supply an [`LlmProvider`] impl and the loop drives it.

use async_trait::async_trait;
use nodes::EventEmitter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".into(), content: content.into() }
    }
}

/// One call into the model: the full message array built so far, the
/// remaining wall-clock budget, and the output-length cap (spec §4.5.3
/// step 5).
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub remaining: Duration,
    pub max_output_chars: usize,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub provider: String,
    pub model: String,
}

/// Drives one LLM turn. Implementations stream assistant deltas to `emit`
/// as `agent_assistant_delta` events (coalesced per the flush-chars/flush-ms
/// knobs, spec §4.5.3 step 5); the accumulated text comes back as
/// [`ChatResponse::content`].
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn provider_name(&self) -> &str;
    fn model(&self) -> &str;

    async fn chat(&self, request: ChatRequest, emit: &Arc<dyn EventEmitter>) -> Result<ChatResponse, crate::error::AgentError>;
}
