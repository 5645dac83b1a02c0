//! Agent orchestration core for Canopy.
//!
//! This crate turns a linear think → act → observe loop into a tree of
//! cooperating, suspendable, message-passing agents on one tokio runtime:
//!
//! - [`Agent`]: the per-agent execution loop. Parse the model turn into a
//!   typed [`Action`], dispatch it, feed the observation back with role
//!   `tool`, iterate.
//! - [`AgentOrchestrator`]: owns every agent's task, mailbox, and lifecycle;
//!   routes messages; coordinates shutdown. Pass the `Arc` explicitly; there
//!   is no hidden global, and tests inject fresh instances.
//! - [`OutputParser`]: the line-oriented `Thought:`/`Action:` grammar with
//!   retry-with-feedback handled by the loop.
//! - [`Compactor`]: best-effort conversation compaction under a usable-token
//!   budget.
//! - [`Tool`]: an async handler with a declared schema, validated arguments,
//!   a per-call [`ToolContext`], and a [`ToolResult`] envelope.
//!
//! Model providers implement [`canopy_abstraction::ChatClient`] and live
//! outside this crate.

pub mod agent;
pub mod callbacks;
pub mod compaction;
pub mod config;
pub mod context;
pub mod error;
pub mod mailbox;
pub mod orchestrator;
pub mod parser;
pub mod schemas;
pub mod token_counter;
pub mod tool;
pub mod truncation;

pub use agent::{Agent, SubagentFactory};
pub use callbacks::{AgentCallback, CallbackSet, TracingCallback};
pub use compaction::{CompactionConfig, Compactor};
pub use config::RuntimeConfig;
pub use context::{AllowAll, PermissionHandler, PermissionRequest, ToolContext};
pub use error::{OrchestratorError, Result};
pub use mailbox::Mailbox;
pub use orchestrator::{AgentInfo, AgentOrchestrator};
pub use parser::{OutputParser, ParseError};
pub use schemas::{
    Action, AgentId, AgentMessage, AgentResponse, AgentState, AgentStatus, LaunchedSubagent,
    MessageKind, SubagentOutcome, SubagentSpec,
};
pub use token_counter::{create_counter, CounterStrategy, SimpleCounter, TokenCounter};
pub use tool::{Attachment, Tool, ToolError, ToolHandler, ToolParameter, ToolResult};
pub use truncation::{OutputTruncator, TruncationConfig, TruncationMetadata};

// Re-export the abstraction layer so embedders need only one dependency.
pub use canopy_abstraction as abstraction;
