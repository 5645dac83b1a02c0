//! Core data types for agent orchestration.
//!
//! This module defines the typed action variants produced by the output
//! parser, the inter-agent message format, and the agent status machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Routing key for a running agent. Allocated by the orchestrator as
/// `{name}-{n}` with `n` monotonic per name.
pub type AgentId = String;

/// A single subagent launch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubagentSpec {
    /// Name of the subagent template in the parent's catalog.
    pub subagent_name: String,
    /// Task text handed to the child.
    pub task: String,
    /// Optional display name for logs; defaults to the template name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Optional extra context prepended to the child's task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl SubagentSpec {
    /// Creates a spec with just a template name and task.
    pub fn new(subagent_name: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            subagent_name: subagent_name.into(),
            task: task.into(),
            display_name: None,
            context: None,
        }
    }
}

/// A single typed decision produced by parsing one model turn.
///
/// Unknown action tags are rejected at parse time; there is no catch-all
/// variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Invoke a tool with JSON arguments.
    Tool {
        /// Name of the tool to call.
        name: String,
        /// Arguments to pass to the tool.
        arguments: serde_json::Map<String, serde_json::Value>,
        /// The model's reasoning, captured for observability.
        #[serde(skip_serializing_if = "Option::is_none")]
        thought: Option<String>,
    },
    /// Launch one or more subagents without blocking.
    LaunchSubagents {
        /// Launch requests, in order.
        specs: Vec<SubagentSpec>,
        #[serde(skip_serializing_if = "Option::is_none")]
        thought: Option<String>,
    },
    /// Suspend until at least one pending child completes or any inbound
    /// message arrives.
    WaitForSubagents {
        #[serde(skip_serializing_if = "Option::is_none")]
        thought: Option<String>,
    },
    /// Suspend until any inbound message arrives (peer communication).
    Wait {
        #[serde(skip_serializing_if = "Option::is_none")]
        thought: Option<String>,
    },
    /// Enqueue a message to another agent without blocking.
    SendMessage {
        /// Recipient agent id (or name, resolved by the orchestrator).
        to: String,
        /// Message body.
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        thought: Option<String>,
    },
    /// Terminal action carrying the final answer.
    Finish {
        /// The final response body.
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        thought: Option<String>,
    },
}

impl Action {
    /// Returns the action's tag as used in the wire grammar.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tool { .. } => "tool",
            Self::LaunchSubagents { .. } => "launch_subagents",
            Self::WaitForSubagents { .. } => "wait_for_subagents",
            Self::Wait { .. } => "wait",
            Self::SendMessage { .. } => "send_message",
            Self::Finish { .. } => "finish",
        }
    }

    /// Returns the captured thought, if any.
    #[must_use]
    pub fn thought(&self) -> Option<&str> {
        match self {
            Self::Tool { thought, .. }
            | Self::LaunchSubagents { thought, .. }
            | Self::WaitForSubagents { thought }
            | Self::Wait { thought }
            | Self::SendMessage { thought, .. }
            | Self::Finish { thought, .. } => thought.as_deref(),
        }
    }
}

/// Kind of an inter-agent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A message from a peer agent.
    Peer,
    /// A child finished successfully; payload carries its result.
    ChildCompleted,
    /// A child failed; payload carries the error text.
    ChildFailed,
    /// A bare wake-up with no content.
    Resume,
}

impl MessageKind {
    /// Converts a kind to a string label for logs and observations.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Peer => "peer",
            Self::ChildCompleted => "child_completed",
            Self::ChildFailed => "child_failed",
            Self::Resume => "resume",
        }
    }
}

/// A message sent between agents through the orchestrator's mailboxes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Sender agent id.
    pub from: AgentId,
    /// Recipient agent id.
    pub to: AgentId,
    /// What kind of event this message carries.
    pub kind: MessageKind,
    /// Message body: peer content, child result, or error text.
    pub payload: String,
    /// When the message was sent.
    pub timestamp: DateTime<Utc>,
}

impl AgentMessage {
    /// Creates a message stamped with the current time.
    pub fn new(
        from: impl Into<AgentId>,
        to: impl Into<AgentId>,
        kind: MessageKind,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind,
            payload: payload.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Agent execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentStatus {
    /// Registered but not yet launched.
    Idle,
    /// The loop is executing.
    Running,
    /// Parked on the mailbox waiting for messages.
    Suspended,
    /// Finished; result available.
    Completed,
    /// Terminated with an error or cancellation.
    Failed,
}

impl AgentStatus {
    /// Checks if the agent can transition to the given status.
    ///
    /// # Arguments
    /// * `to` - The target status
    ///
    /// # Returns
    /// Returns `true` if the transition is valid, `false` otherwise.
    #[must_use]
    pub fn can_transition_to(&self, to: Self) -> bool {
        match (self, to) {
            // From Idle: start running only
            (Self::Idle, Self::Running) => true,
            // From Running: suspend, finish, or fail
            (Self::Running, Self::Suspended | Self::Completed | Self::Failed) => true,
            // From Suspended: resume or fail
            (Self::Suspended, Self::Running | Self::Failed) => true,
            // Staying in a non-terminal state is valid
            (Self::Idle, Self::Idle)
            | (Self::Running, Self::Running)
            | (Self::Suspended, Self::Suspended) => true,
            // Completed and Failed are terminal: no outgoing transitions,
            // not even to themselves
            _ => false,
        }
    }

    /// Returns `true` for terminal statuses.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Snapshot of a running agent, readable across suspensions.
#[derive(Debug, Clone)]
pub struct AgentState {
    /// The agent's routing id.
    pub agent_id: AgentId,
    /// Current status.
    pub status: AgentStatus,
    /// Model turns consumed so far.
    pub iteration_count: usize,
    /// Iteration ceiling; reaching it forces a synthesized finish.
    pub max_iterations: usize,
    /// Children launched and not yet completed.
    pub pending_children: HashSet<AgentId>,
    /// Every message delivered to this agent, in arrival order.
    pub received_messages: Vec<AgentMessage>,
    /// Tag of the most recently dispatched action.
    pub last_action: Option<&'static str>,
}

impl AgentState {
    /// Creates an idle snapshot for a freshly registered agent.
    #[must_use]
    pub fn new(agent_id: AgentId, max_iterations: usize) -> Self {
        Self {
            agent_id,
            status: AgentStatus::Idle,
            iteration_count: 0,
            max_iterations,
            pending_children: HashSet::new(),
            received_messages: Vec::new(),
            last_action: None,
        }
    }
}

/// Status of a launched subagent, from the parent's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubagentOutcome {
    /// Still executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Terminated with an error.
    Failed,
}

/// Record of one subagent execution, held by the parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchedSubagent {
    /// The child's orchestrator-assigned id.
    pub id: AgentId,
    /// Display name used in logs and observations.
    pub display_name: String,
    /// Template name the child was built from.
    pub subagent_name: String,
    /// Task the child was launched with.
    pub task: String,
    /// The launching agent's id.
    pub parent_id: AgentId,
    /// When the child was launched.
    pub started_at: DateTime<Utc>,
    /// When the child terminated, if it has.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Short form of the child's result or error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<String>,
    /// Current outcome.
    pub status: SubagentOutcome,
}

/// Final response from an agent execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResponse {
    /// The agent's final output.
    pub content: String,
    /// Number of model turns executed.
    pub iterations: usize,
    /// Whether the agent completed successfully.
    pub success: bool,
}

impl AgentResponse {
    /// Creates a successful response.
    pub fn success(content: impl Into<String>, iterations: usize) -> Self {
        Self { content: content.into(), iterations, success: true }
    }

    /// Creates a failed response.
    pub fn failure(content: impl Into<String>, iterations: usize) -> Self {
        Self { content: content.into(), iterations, success: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        // Idle transitions
        assert!(AgentStatus::Idle.can_transition_to(AgentStatus::Running));
        assert!(!AgentStatus::Idle.can_transition_to(AgentStatus::Suspended));
        assert!(!AgentStatus::Idle.can_transition_to(AgentStatus::Completed));

        // Running transitions
        assert!(AgentStatus::Running.can_transition_to(AgentStatus::Suspended));
        assert!(AgentStatus::Running.can_transition_to(AgentStatus::Completed));
        assert!(AgentStatus::Running.can_transition_to(AgentStatus::Failed));
        assert!(!AgentStatus::Running.can_transition_to(AgentStatus::Idle));

        // Suspended transitions
        assert!(AgentStatus::Suspended.can_transition_to(AgentStatus::Running));
        assert!(AgentStatus::Suspended.can_transition_to(AgentStatus::Failed));
        assert!(!AgentStatus::Suspended.can_transition_to(AgentStatus::Completed));

        // Non-terminal states may stay where they are
        assert!(AgentStatus::Idle.can_transition_to(AgentStatus::Idle));
        assert!(AgentStatus::Running.can_transition_to(AgentStatus::Running));
        assert!(AgentStatus::Suspended.can_transition_to(AgentStatus::Suspended));

        // Terminal states have no outgoing transitions, including self-loops
        assert!(!AgentStatus::Completed.can_transition_to(AgentStatus::Running));
        assert!(!AgentStatus::Completed.can_transition_to(AgentStatus::Completed));
        assert!(!AgentStatus::Failed.can_transition_to(AgentStatus::Running));
        assert!(!AgentStatus::Failed.can_transition_to(AgentStatus::Failed));
        assert!(AgentStatus::Completed.is_terminal());
        assert!(AgentStatus::Failed.is_terminal());
        assert!(!AgentStatus::Suspended.is_terminal());
    }

    #[test]
    fn test_action_kind() {
        let action = Action::Finish { content: "done".to_string(), thought: None };
        assert_eq!(action.kind(), "finish");

        let action = Action::Wait { thought: Some("waiting for B".to_string()) };
        assert_eq!(action.kind(), "wait");
        assert_eq!(action.thought(), Some("waiting for B"));
    }

    #[test]
    fn test_action_serde_round_trip() {
        let action = Action::SendMessage {
            to: "peer-1".to_string(),
            content: "hello".to_string(),
            thought: None,
        };
        let json = serde_json::to_string(&action).unwrap();
        assert!(json.contains("send_message"));
        let back: Action = serde_json::from_str(&json).unwrap();
        assert_eq!(action, back);
    }

    #[test]
    fn test_action_unknown_tag_rejected() {
        let json = r#"{"type": "teleport", "destination": "mars"}"#;
        assert!(serde_json::from_str::<Action>(json).is_err());
    }

    #[test]
    fn test_agent_message_new_stamps_time() {
        let before = Utc::now();
        let msg = AgentMessage::new("a-1", "b-1", MessageKind::Peer, "hi");
        assert!(msg.timestamp >= before);
        assert_eq!(msg.kind.as_str(), "peer");
    }

    #[test]
    fn test_agent_state_new() {
        let state = AgentState::new("root-1".to_string(), 15);
        assert_eq!(state.status, AgentStatus::Idle);
        assert_eq!(state.iteration_count, 0);
        assert!(state.pending_children.is_empty());
        assert!(state.last_action.is_none());
    }
}
