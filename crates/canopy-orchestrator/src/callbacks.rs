//! Callback hooks for agent observability.
//!
//! Callbacks receive notifications at every stage of the loop: iteration
//! lifecycle, model interactions, parsing, tool execution, subagent
//! delegation, and completion. They MUST NOT influence control flow: a
//! panicking callback is caught and logged, and execution continues.

use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::schemas::Action;

/// Observation hooks for agent execution.
///
/// Every method has a no-op default body; implement only what you need.
#[allow(unused_variables)]
pub trait AgentCallback: Send + Sync {
    /// Called when the agent starts executing a task.
    fn on_agent_start(&self, task: &str, agent_name: &str) {}

    /// Called at the start of each iteration.
    fn on_iteration_start(&self, iteration: usize, agent_name: &str) {}

    /// Called before sending a request to the model.
    fn on_llm_request(&self, iteration: usize, prompt: &str, system_prompt: Option<&str>) {}

    /// Called after receiving a response from the model.
    fn on_llm_response(&self, iteration: usize, response: &str) {}

    /// Called after successfully parsing model output.
    fn on_parse_success(&self, iteration: usize, action: &Action) {}

    /// Called when parsing model output fails.
    fn on_parse_error(&self, iteration: usize, error: &str, attempt: usize) {}

    /// Called before executing a tool.
    fn on_tool_call(&self, iteration: usize, tool_name: &str, arguments: &Value) {}

    /// Called after tool execution completes.
    fn on_tool_result(&self, iteration: usize, tool_name: &str, result: &str, success: bool) {}

    /// Called when a subagent is launched.
    fn on_subagent_call(&self, iteration: usize, subagent_name: &str, task: &str) {}

    /// Called when a subagent's completion (or failure) reaches the parent.
    fn on_subagent_result(&self, iteration: usize, subagent_name: &str, result: &str) {}

    /// Called at the end of each iteration.
    fn on_iteration_end(&self, iteration: usize, action_kind: &str) {}

    /// Called when the agent completes execution.
    fn on_agent_finish(&self, success: bool, iterations: usize, content: &str) {}
}

/// An ordered set of callbacks with panic isolation.
#[derive(Clone, Default)]
pub struct CallbackSet {
    callbacks: Vec<Arc<dyn AgentCallback>>,
}

impl CallbackSet {
    /// Creates a callback set.
    #[must_use]
    pub fn new(callbacks: Vec<Arc<dyn AgentCallback>>) -> Self {
        Self { callbacks }
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Invokes `f` on every callback, catching and logging panics.
    pub fn emit(&self, hook: &'static str, f: impl Fn(&dyn AgentCallback)) {
        for callback in &self.callbacks {
            let result = catch_unwind(AssertUnwindSafe(|| f(callback.as_ref())));
            if result.is_err() {
                warn!(hook, "Callback panicked; continuing");
            }
        }
    }
}

impl std::fmt::Debug for CallbackSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSet").field("count", &self.callbacks.len()).finish()
    }
}

/// Built-in callback that logs execution through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingCallback;

impl AgentCallback for TracingCallback {
    fn on_agent_start(&self, task: &str, agent_name: &str) {
        info!(agent = %agent_name, task = %task, "Agent starting");
    }

    fn on_iteration_start(&self, iteration: usize, agent_name: &str) {
        debug!(agent = %agent_name, iteration, "Iteration starting");
    }

    fn on_llm_response(&self, iteration: usize, response: &str) {
        debug!(iteration, response_len = response.len(), "Model responded");
    }

    fn on_parse_success(&self, iteration: usize, action: &Action) {
        debug!(iteration, action = action.kind(), "Parsed action");
    }

    fn on_parse_error(&self, iteration: usize, error: &str, attempt: usize) {
        warn!(iteration, attempt, error = %error, "Parse failed");
    }

    fn on_tool_call(&self, iteration: usize, tool_name: &str, _arguments: &Value) {
        info!(iteration, tool = %tool_name, "Calling tool");
    }

    fn on_tool_result(&self, iteration: usize, tool_name: &str, _result: &str, success: bool) {
        info!(iteration, tool = %tool_name, success, "Tool finished");
    }

    fn on_subagent_call(&self, iteration: usize, subagent_name: &str, task: &str) {
        info!(iteration, subagent = %subagent_name, task = %task, "Launching subagent");
    }

    fn on_subagent_result(&self, iteration: usize, subagent_name: &str, _result: &str) {
        info!(iteration, subagent = %subagent_name, "Subagent reported");
    }

    fn on_agent_finish(&self, success: bool, iterations: usize, _content: &str) {
        info!(success, iterations, "Agent finished");
    }
}
