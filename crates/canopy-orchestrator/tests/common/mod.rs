//! Shared test fixtures: a scripted model client and a recording callback.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use canopy_abstraction::{ChatClient, ChatMessage, ChatRole, ModelError};
use canopy_orchestrator::AgentCallback;

/// One scripted model turn.
pub enum Scripted {
    /// Reply immediately with this text.
    Reply(String),
    /// Sleep, then reply with this text.
    Delayed(Duration, String),
    /// Fail with this error.
    Fail(ModelError),
}

/// A [`ChatClient`] that replays a fixed script of responses.
///
/// The conversation history is shared behind an `Arc` so tests can inspect it
/// after the agent (which owns the client) has been consumed.
pub struct ScriptedClient {
    model: String,
    history: Arc<Mutex<Vec<ChatMessage>>>,
    script: Arc<Mutex<VecDeque<Scripted>>>,
    scratch_script: Arc<Mutex<VecDeque<Scripted>>>,
}

impl ScriptedClient {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            history: Arc::new(Mutex::new(Vec::new())),
            script: Arc::new(Mutex::new(VecDeque::new())),
            scratch_script: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Queues an immediate reply.
    pub fn reply(self, text: &str) -> Self {
        self.script.lock().unwrap().push_back(Scripted::Reply(text.to_string()));
        self
    }

    /// Queues a reply that arrives after `ms` milliseconds.
    pub fn delayed(self, ms: u64, text: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Delayed(Duration::from_millis(ms), text.to_string()));
        self
    }

    /// Queues a failure.
    #[allow(dead_code)]
    pub fn fail(self, error: ModelError) -> Self {
        self.script.lock().unwrap().push_back(Scripted::Fail(error));
        self
    }

    /// Queues a reply for scratch (summarization) clients derived from this one.
    #[allow(dead_code)]
    pub fn scratch_reply(self, text: &str) -> Self {
        self.scratch_script.lock().unwrap().push_back(Scripted::Reply(text.to_string()));
        self
    }

    /// Handle for inspecting the conversation after the client is moved.
    pub fn history_handle(&self) -> Arc<Mutex<Vec<ChatMessage>>> {
        Arc::clone(&self.history)
    }

    pub fn boxed(self) -> Box<dyn ChatClient> {
        Box::new(self)
    }
}

#[async_trait]
impl ChatClient for ScriptedClient {
    async fn chat(
        &mut self,
        prompt: &str,
        system_prompt: Option<&str>,
        role: ChatRole,
    ) -> Result<String, ModelError> {
        let next = self.script.lock().unwrap().pop_front();
        let reply = match next {
            Some(Scripted::Reply(text)) => text,
            Some(Scripted::Delayed(delay, text)) => {
                tokio::time::sleep(delay).await;
                text
            }
            Some(Scripted::Fail(error)) => return Err(error),
            None => return Err(ModelError::Other("script exhausted".to_string())),
        };

        let mut history = self.history.lock().unwrap();
        if history.is_empty() {
            if let Some(system) = system_prompt {
                history.push(ChatMessage::system(system));
            }
        }
        history.push(ChatMessage::new(role, prompt));
        history.push(ChatMessage::assistant(reply.clone()));
        Ok(reply)
    }

    fn reset_history(&mut self) {
        self.history.lock().unwrap().clear();
    }

    fn history(&self) -> Vec<ChatMessage> {
        self.history.lock().unwrap().clone()
    }

    fn set_history(&mut self, history: Vec<ChatMessage>) {
        *self.history.lock().unwrap() = history;
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn scratch(&self) -> Box<dyn ChatClient> {
        Box::new(ScriptedClient {
            model: self.model.clone(),
            history: Arc::new(Mutex::new(Vec::new())),
            script: Arc::clone(&self.scratch_script),
            scratch_script: Arc::clone(&self.scratch_script),
        })
    }
}

/// Callback that counts hook firings and records event labels in order.
#[derive(Default)]
pub struct RecordingCallback {
    pub parse_errors: AtomicUsize,
    pub parse_successes: AtomicUsize,
    pub events: Mutex<Vec<String>>,
}

impl RecordingCallback {
    pub fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    #[allow(dead_code)]
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl AgentCallback for RecordingCallback {
    fn on_parse_success(&self, _iteration: usize, action: &canopy_orchestrator::Action) {
        self.parse_successes.fetch_add(1, Ordering::SeqCst);
        self.record(format!("parse_success:{}", action.kind()));
    }

    fn on_parse_error(&self, _iteration: usize, _error: &str, attempt: usize) {
        self.parse_errors.fetch_add(1, Ordering::SeqCst);
        self.record(format!("parse_error:attempt{attempt}"));
    }

    fn on_subagent_call(&self, _iteration: usize, subagent_name: &str, _task: &str) {
        self.record(format!("subagent_call:{subagent_name}"));
    }

    fn on_subagent_result(&self, _iteration: usize, subagent_name: &str, _result: &str) {
        self.record(format!("subagent_result:{subagent_name}"));
    }

    fn on_agent_finish(&self, success: bool, iterations: usize, _content: &str) {
        self.record(format!("finish:{success}:{iterations}"));
    }
}

/// Tool-role messages from a shared history handle, in order.
#[allow(dead_code)]
pub fn tool_messages(history: &Arc<Mutex<Vec<ChatMessage>>>) -> Vec<String> {
    history
        .lock()
        .unwrap()
        .iter()
        .filter(|m| m.role == ChatRole::Tool)
        .map(|m| m.content.clone())
        .collect()
}
