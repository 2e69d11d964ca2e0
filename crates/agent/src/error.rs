//! Stable error codes for the agent loop (spec §6, §7). Every variant's
//! `Display` impl *is* the wire code — callers match on `to_string()` or on
//! the enum directly.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("INVALID_AGENT_OUTPUT")]
    InvalidAgentOutput,
    #[error("INVALID_TOOL_INPUT")]
    InvalidToolInput,
    #[error("INVALID_AGENT_JSON_OUTPUT")]
    InvalidAgentJsonOutput,
    #[error("INVALID_JSON_SCHEMA")]
    InvalidJsonSchema,
    #[error("TOOL_NOT_ALLOWED:{0}")]
    ToolNotAllowed(String),
    #[error("TOOL_NOT_SUPPORTED:{0}")]
    ToolNotSupported(String),
    #[error("TOOL_POLICY_DENIED:{0}")]
    ToolPolicyDenied(String),
    #[error("TOOL_SECRET_ID_NOT_ALLOWED")]
    ToolSecretIdNotAllowed,
    #[error("TEAM_NOT_CONFIGURED")]
    TeamNotConfigured,
    #[error("TEAMMATE_NOT_FOUND:{0}")]
    TeammateNotFound(String),
    #[error("TEAM_TOOL_POLICY_DENIED:{0}")]
    TeamToolPolicyDenied(String),
    #[error("TEAM_DELEGATE_FAILED")]
    TeamDelegateFailed,
    #[error("AGENT_MAX_TURNS")]
    MaxTurns,
    #[error("AGENT_MAX_TOOL_CALLS")]
    MaxToolCalls,
    #[error("LLM_TIMEOUT")]
    LlmTimeout,
    #[error("LLM_AUTH_NOT_CONFIGURED")]
    LlmAuthNotConfigured,
    #[error("SKILL_NOT_FOUND:{0}")]
    SkillNotFound(String),
    #[error("SECRET_REQUIRED")]
    SecretRequired,
}

impl AgentError {
    /// The stable code this error surfaces to callers and tests (spec §6).
    /// Identical to `Display`; kept as a named accessor for call sites that
    /// want a `&str`-shaped value rather than formatting an error.
    pub fn code(&self) -> String {
        self.to_string()
    }
}
