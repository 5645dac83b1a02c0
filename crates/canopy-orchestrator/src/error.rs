// Error types for the orchestration core

use thiserror::Error;

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Orchestration errors
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The recipient agent does not exist or has already terminated.
    #[error("Unknown recipient: agent '{0}' is not registered or has terminated")]
    UnknownRecipient(String),

    /// The recipient's mailbox has been closed.
    #[error("Mailbox for agent '{0}' is closed")]
    MailboxClosed(String),

    /// The recipient's mailbox stayed full past the delivery deadline.
    #[error("Mailbox for agent '{0}' is full; delivery timed out")]
    MailboxFull(String),

    /// `launch` was called more than once for the same agent id.
    #[error("Agent '{0}' has already been launched")]
    AlreadyLaunched(String),

    /// The agent id was never registered.
    #[error("Agent '{0}' is not registered")]
    NotRegistered(String),

    /// Model error
    #[error("Model error: {0}")]
    Model(#[from] canopy_abstraction::ModelError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Execution was cancelled (shutdown or explicit abort).
    #[error("Cancelled")]
    Cancelled,

    /// Other error
    #[error("Orchestration error: {0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::UnknownRecipient("worker-1".to_string());
        assert!(err.to_string().contains("worker-1"));

        let err = OrchestratorError::MailboxFull("worker-2".to_string());
        assert!(err.to_string().contains("full"));
    }

    #[test]
    fn test_model_error_conversion() {
        let model_err = canopy_abstraction::ModelError::Cancelled;
        let err: OrchestratorError = model_err.into();
        assert!(matches!(err, OrchestratorError::Model(_)));
    }
}
