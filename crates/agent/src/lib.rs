//! Agent loop: drives an `agent.run` node's multi-turn tool-calling loop
//! (spec §4.5) against a pluggable LLM provider and a built-in tool set
//! (`shell.run`, `connector.action`, `skill.<id>`, `team.delegate`,
//! `team.map`).

pub mod config;
pub mod envelope;
pub mod error;
pub mod loop_;
pub mod node;
pub mod provider;
pub mod schema;
pub mod skills;
pub mod state;
pub mod summarize;
pub mod tools;

pub use config::{AgentLimits, AgentNodeConfig, TeamConfig, Teammate};
pub use envelope::{parse_envelope, AgentEnvelope};
pub use error::AgentError;
pub use loop_::{run_agent_loop, LoopDeps};
pub use node::AgentRunNode;
pub use provider::{ChatMessage, ChatRequest, ChatResponse, LlmProvider};
pub use skills::{Toolset, ToolsetSkillsConfig};
pub use state::{AgentRunState, HistoryEntry, PendingToolCall};
pub use tools::{Skill, SkillRegistry, ToolDeps};
