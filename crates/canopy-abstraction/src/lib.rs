//! Model abstraction layer for Canopy.
//!
//! This crate defines the traits and types the orchestration core uses to talk
//! to chat models. Concrete providers (HTTP clients, local inference, mocks)
//! live outside the core and implement [`ChatClient`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Represents an error that can occur when interacting with a chat model.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelError {
    /// An error occurred during the API request (e.g., network issues, invalid request).
    #[error("Request Error: {0}")]
    RequestError(String),

    /// The model returned an error (e.g., invalid input, rate limiting).
    #[error("Model Response Error: {0}")]
    ModelResponseError(String),

    /// The conversation exceeded the model's context window.
    #[error("Context overflow for model '{model}': {message}")]
    ContextOverflow {
        /// The model whose context window was exceeded.
        model: String,
        /// Error message from the provider.
        message: String,
    },

    /// An error occurred during serialization or deserialization.
    #[error("Serialization Error: {0}")]
    SerializationError(String),

    /// The request did not complete within the client's deadline.
    #[error("Model request timed out after {seconds}s")]
    Timeout {
        /// Deadline that elapsed, in seconds.
        seconds: u64,
    },

    /// The request was cancelled before completing.
    #[error("Model request cancelled")]
    Cancelled,

    /// Other unexpected errors.
    #[error("Other Model Error: {0}")]
    Other(String),
}

impl ModelError {
    /// Checks whether this error indicates the conversation no longer fits in
    /// the model's context window.
    ///
    /// The typed [`ModelError::ContextOverflow`] variant is authoritative.
    /// Providers that only surface error strings are covered by a substring
    /// check on the message, kept as a fallback.
    #[must_use]
    pub fn is_context_overflow(&self) -> bool {
        match self {
            Self::ContextOverflow { .. } => true,
            Self::RequestError(msg) | Self::ModelResponseError(msg) | Self::Other(msg) => {
                let lower = msg.to_lowercase();
                lower.contains("context length")
                    || lower.contains("context_length_exceeded")
                    || lower.contains("maximum context")
            }
            _ => false,
        }
    }
}

/// The role a conversation message was produced under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions that frame the whole conversation. Immutable across a run.
    System,
    /// Input originating from the user (or the runtime on the user's behalf).
    User,
    /// Output produced by the model.
    Assistant,
    /// A tool observation. Kept distinct from `User` so the model can tell
    /// tool results apart from user instruction.
    Tool,
}

impl ChatRole {
    /// Converts a role to its wire string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a message in a conversation with a chat model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message sender.
    pub role: ChatRole,
    /// The content of the message.
    pub content: String,
}

impl ChatMessage {
    /// Creates a message with the given role and content.
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }

    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    /// Creates an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }

    /// Creates a tool observation message.
    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Tool, content)
    }
}

/// Parameters for controlling the model's generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParameters {
    /// What sampling temperature to use, between 0 and 2.
    pub temperature: Option<f32>,

    /// Nucleus sampling: the model considers tokens with `top_p` probability mass.
    pub top_p: Option<f32>,

    /// The maximum number of tokens to generate in the completion.
    pub max_tokens: Option<u32>,

    /// Sequences where the API will stop generating further tokens.
    pub stop_sequences: Option<Vec<String>>,
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self {
            temperature: Some(0.7),
            top_p: Some(1.0),
            max_tokens: None,
            stop_sequences: None,
        }
    }
}

/// The response from a chat completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// The generated content.
    pub content: String,

    /// Optional: the ID of the model used to generate the response.
    pub model_id: Option<String>,

    /// Optional: usage statistics for the request.
    pub usage: Option<ModelUsage>,
}

/// Usage statistics for a model request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelUsage {
    /// Number of tokens in the prompt.
    pub prompt_tokens: u32,

    /// Number of tokens in the completion.
    pub completion_tokens: u32,

    /// Total number of tokens used.
    pub total_tokens: u32,
}

/// A stateful conversation holder over a chat model.
///
/// Each agent owns exactly one client; parents and children never share an
/// instance, which keeps their histories from cross-contaminating. The client
/// holds the conversation, appends the prompt under the given role, calls the
/// provider, appends the assistant reply, and returns the reply text.
///
/// Role fidelity is part of the contract: observations are submitted with
/// [`ChatRole::Tool`], and providers whose wire format collapses roles (for
/// example treating `tool` as `user`) MUST translate inside their adapter and
/// document the loss. Implementations handle their own provider-specific
/// retries and deadlines.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Sends a message and returns the assistant's reply.
    ///
    /// The `system_prompt` is installed once, only when the history is empty.
    ///
    /// # Arguments
    /// * `prompt` - The message content to append
    /// * `system_prompt` - Optional system prompt for a fresh conversation
    /// * `role` - The role the prompt is submitted under
    ///
    /// # Errors
    /// Returns a `ModelError` if the completion fails after the client's own
    /// retry policy is exhausted. On error the conversation should be left
    /// unchanged, so the caller can safely retry the same prompt.
    async fn chat(
        &mut self,
        prompt: &str,
        system_prompt: Option<&str>,
        role: ChatRole,
    ) -> Result<String, ModelError>;

    /// Clears the conversation history.
    fn reset_history(&mut self);

    /// Returns a copy of the conversation history.
    fn history(&self) -> Vec<ChatMessage>;

    /// Replaces the conversation history.
    fn set_history(&mut self, history: Vec<ChatMessage>);

    /// Returns the ID of the underlying model.
    fn model_id(&self) -> &str;

    /// Derives a fresh client against the same backend with an empty history.
    ///
    /// Used for side conversations (e.g. summarization) that must not pollute
    /// the owning agent's history.
    fn scratch(&self) -> Box<dyn ChatClient>;
}
