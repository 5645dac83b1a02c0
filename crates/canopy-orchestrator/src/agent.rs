//! The agent execution loop.
//!
//! One [`Agent`] instance per running agent. The loop drives the model turn
//! by turn: parse the output into an [`Action`], dispatch it (tool call,
//! subagent launch, wait, peer send, or finish), feed the observation back
//! with role `tool`, and iterate. Suspension is an inline await on the
//! agent's own mailbox; the loop never awaits peer tasks directly.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use canopy_abstraction::{ChatClient, ChatRole, ModelError};
use chrono::Utc;

use crate::callbacks::{AgentCallback, CallbackSet};
use crate::compaction::Compactor;
use crate::config::RuntimeConfig;
use crate::context::{AllowAll, PermissionHandler, ToolContext};
use crate::orchestrator::AgentOrchestrator;
use crate::parser::OutputParser;
use crate::schemas::{
    Action, AgentId, AgentMessage, AgentResponse, AgentState, AgentStatus, LaunchedSubagent,
    MessageKind, SubagentOutcome, SubagentSpec,
};
use crate::tool::Tool;
use crate::truncation::OutputTruncator;

/// Prompt used for the forced summary turn when the iteration cap is reached.
const MAX_ITERATIONS_PROMPT: &str = "You have reached the maximum number of iterations. \
     Please provide a final summary of what you've accomplished.";

/// Builds fresh [`Agent`] instances for a subagent template.
///
/// Each launch gets its own agent, and therefore its own model client, so
/// parallel children never share conversation state.
pub trait SubagentFactory: Send + Sync {
    /// Builds one agent instance.
    fn build(&self) -> Agent;
}

impl<F> SubagentFactory for F
where
    F: Fn() -> Agent + Send + Sync,
{
    fn build(&self) -> Agent {
        self()
    }
}

/// An agent: a model client, a tool registry, a subagent catalog, and the
/// loop that drives them.
pub struct Agent {
    name: String,
    client: Box<dyn ChatClient>,
    tools: HashMap<String, Arc<Tool>>,
    subagents: HashMap<String, Arc<dyn SubagentFactory>>,
    system_prompt: Option<String>,
    config: RuntimeConfig,
    callbacks: CallbackSet,
    permissions: Arc<dyn PermissionHandler>,
    working_dir: PathBuf,
}

impl Agent {
    /// Creates an agent with default configuration and no tools or subagents.
    #[must_use]
    pub fn new(name: impl Into<String>, client: Box<dyn ChatClient>) -> Self {
        Self {
            name: name.into(),
            client,
            tools: HashMap::new(),
            subagents: HashMap::new(),
            system_prompt: None,
            config: RuntimeConfig::default(),
            callbacks: CallbackSet::default(),
            permissions: Arc::new(AllowAll),
            working_dir: PathBuf::from("."),
        }
    }

    /// Adds a tool.
    #[must_use]
    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.tools.insert(tool.name.clone(), Arc::new(tool));
        self
    }

    /// Adds a subagent template.
    #[must_use]
    pub fn with_subagent(
        mut self,
        name: impl Into<String>,
        factory: Arc<dyn SubagentFactory>,
    ) -> Self {
        self.subagents.insert(name.into(), factory);
        self
    }

    /// Overrides the default system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Sets the runtime configuration.
    #[must_use]
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers observation callbacks.
    #[must_use]
    pub fn with_callbacks(mut self, callbacks: Vec<Arc<dyn AgentCallback>>) -> Self {
        self.callbacks = CallbackSet::new(callbacks);
        self
    }

    /// Sets the permission handler threaded into tool contexts.
    #[must_use]
    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionHandler>) -> Self {
        self.permissions = permissions;
        self
    }

    /// Sets the working directory tools resolve paths against.
    #[must_use]
    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = dir;
        self
    }

    /// The agent's display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers this agent with the orchestrator, launches it on `task`,
    /// and waits for true completion (not just suspension).
    ///
    /// # Errors
    /// Returns an error for launch bookkeeping failures; agent-level failures
    /// come back as an [`AgentResponse`] with `success == false`.
    pub async fn run(
        self,
        orchestrator: &AgentOrchestrator,
        task: impl Into<String>,
    ) -> crate::error::Result<AgentResponse> {
        let agent_id = orchestrator.register(self);
        orchestrator.launch(&agent_id, task, None)?;
        orchestrator.wait_for_completion(&agent_id).await
    }

    /// Builds the default system prompt: role framing, tool schemas, the
    /// subagent catalog, and the output format instruction.
    fn default_system_prompt(&self) -> String {
        let mut parts = vec!["You are a helpful assistant. Think step by step.".to_string()];

        if !self.tools.is_empty() {
            parts.push("\nAvailable tools:".to_string());
            let mut names: Vec<&String> = self.tools.keys().collect();
            names.sort();
            for name in names {
                parts.push(format!("\n{}", self.tools[name].to_schema()));
            }
        }

        if !self.subagents.is_empty() {
            parts.push("\n\nAvailable subagents:".to_string());
            let mut names: Vec<&String> = self.subagents.keys().collect();
            names.sort();
            for name in names {
                parts.push(format!("\n  - {name}"));
            }
        }

        parts.push(format!("\n\n{}", OutputParser::format_instruction()));
        parts.join("")
    }

    /// Runs the loop to a terminal state. Called from the orchestrator's
    /// supervision task; never panics on model, parse, or tool failures.
    pub(crate) async fn run_loop(
        self,
        orchestrator: Arc<AgentOrchestrator>,
        agent_id: AgentId,
        task: String,
        cancel: CancellationToken,
    ) -> (AgentResponse, AgentStatus) {
        let system_prompt =
            self.system_prompt.clone().unwrap_or_else(|| self.default_system_prompt());

        let Agent {
            name,
            mut client,
            tools,
            subagents,
            config,
            callbacks,
            permissions,
            working_dir,
            ..
        } = self;

        callbacks.emit("on_agent_start", |cb| cb.on_agent_start(&task, &name));

        let mut state = AgentState::new(agent_id.clone(), config.max_iterations);
        state.status = AgentStatus::Running;

        if config.max_iterations == 0 {
            let response = AgentResponse::failure(
                "Reached maximum iterations (0) before taking any action.",
                0,
            );
            callbacks.emit("on_agent_finish", |cb| {
                cb.on_agent_finish(false, 0, &response.content)
            });
            return (response, AgentStatus::Completed);
        }

        client.reset_history();
        let compactor = Compactor::new(config.compaction.clone());
        let truncator = OutputTruncator::new(config.truncation.clone());

        let Some(mailbox) = orchestrator.mailbox(&agent_id) else {
            return (
                AgentResponse::failure("Agent mailbox missing at launch", 0),
                AgentStatus::Failed,
            );
        };

        // Initial prompt turn (iteration 1), then the first compaction
        // checkpoint. One iteration = one model turn; suspensions don't count.
        let mut llm_output = match model_turn(
            client.as_mut(),
            &callbacks,
            &cancel,
            &compactor,
            1,
            &task,
            Some(&system_prompt),
            ChatRole::User,
        )
        .await
        {
            Ok(output) => output,
            Err(e) => return finish_failed(&callbacks, 0, format!("Model call failed: {e}")),
        };
        state.iteration_count = 1;
        compactor.maybe_compact(client.as_mut()).await;

        // Subagent records by child id, for rendering and result tracking.
        let mut launched: HashMap<AgentId, LaunchedSubagent> = HashMap::new();
        // Messages drained but not yet surfaced to the model.
        let mut backlog: Vec<AgentMessage> = Vec::new();

        loop {
            if cancel.is_cancelled() {
                return finish_cancelled(&callbacks, state.iteration_count);
            }

            let iteration = state.iteration_count;
            callbacks.emit("on_iteration_start", |cb| cb.on_iteration_start(iteration, &name));

            // Per-iteration compaction checkpoint.
            compactor.maybe_compact(client.as_mut()).await;

            // Surface anything that arrived while the model was thinking.
            let arrived = mailbox.drain();
            note_messages(&arrived, &mut state, &mut launched, &callbacks, iteration);
            backlog.extend(arrived);

            let action = match parse_with_retry(
                client.as_mut(),
                &callbacks,
                &cancel,
                &compactor,
                &mut state,
                config.parse_max_retries,
                config.max_iterations,
                &mut llm_output,
            )
            .await
            {
                ParseOutcome::Parsed(action) => action,
                ParseOutcome::Exhausted(last_error) => {
                    let content = format!(
                        "Failed to parse model output after {} attempts. Last error: {last_error}",
                        config.parse_max_retries
                    );
                    let iterations = state.iteration_count;
                    callbacks.emit("on_agent_finish", |cb| {
                        cb.on_agent_finish(false, iterations, &content)
                    });
                    return (AgentResponse::failure(content, iterations), AgentStatus::Failed);
                }
                ParseOutcome::ModelFailed(e) => {
                    return finish_failed(
                        &callbacks,
                        state.iteration_count,
                        format!("Model call failed: {e}"),
                    )
                }
            };

            let iteration = state.iteration_count;
            callbacks.emit("on_parse_success", |cb| cb.on_parse_success(iteration, &action));
            state.last_action = Some(action.kind());
            let action_kind = action.kind();

            // Everything except Finish feeds an observation back on a new
            // model turn, which consumes iteration budget.
            let observation: String = match action {
                Action::Finish { content, .. } => {
                    callbacks.emit("on_iteration_end", |cb| {
                        cb.on_iteration_end(iteration, action_kind)
                    });
                    callbacks.emit("on_agent_finish", |cb| {
                        cb.on_agent_finish(true, iteration, &content)
                    });
                    return (AgentResponse::success(content, iteration), AgentStatus::Completed);
                }

                Action::Tool { name: tool_name, arguments, .. } => {
                    let rendered = execute_tool(
                        &tools,
                        &tool_name,
                        &arguments,
                        &agent_id,
                        &cancel,
                        &permissions,
                        &working_dir,
                        &truncator,
                        &config,
                        &callbacks,
                        iteration,
                    )
                    .await;
                    with_backlog(&mut backlog, &launched, rendered)
                }

                Action::LaunchSubagents { specs, .. } => {
                    let rendered = launch_subagents(
                        &orchestrator,
                        &agent_id,
                        &subagents,
                        specs,
                        &mut state,
                        &mut launched,
                        &callbacks,
                        iteration,
                    );
                    with_backlog(&mut backlog, &launched, rendered)
                }

                Action::SendMessage { to, content, .. } => {
                    let rendered = match orchestrator.send(&agent_id, &to, content).await {
                        Ok(()) => format!("Message sent to {to}."),
                        Err(e) => format!("Error sending message to {to}: {e}"),
                    };
                    with_backlog(&mut backlog, &launched, rendered)
                }

                Action::Wait { .. } | Action::WaitForSubagents { .. } => {
                    let waiting_for_children = action_kind == "wait_for_subagents";

                    if backlog.is_empty()
                        && waiting_for_children
                        && state.pending_children.is_empty()
                    {
                        // Nothing to wait for; do not park, let the model decide.
                        "Error: no pending subagents to wait for. \
                         Launch subagents first, or take another action."
                            .to_string()
                    } else if !backlog.is_empty() {
                        // Messages already arrived; consume them without suspending.
                        render_batch(&std::mem::take(&mut backlog), &launched, &state)
                    } else {
                        orchestrator.set_status(&agent_id, AgentStatus::Suspended);
                        state.status = AgentStatus::Suspended;
                        debug!(agent_id = %agent_id, "Agent suspended");

                        // The abort signal must win at this suspension point:
                        // poll it first, and re-check after any wake, since
                        // shutdown also closes the mailbox and that wakes
                        // `wait_any` too.
                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => {
                                return finish_cancelled(&callbacks, iteration);
                            }
                            () = mailbox.wait_any() => {}
                        }
                        if cancel.is_cancelled() {
                            return finish_cancelled(&callbacks, iteration);
                        }

                        // Drain everything queued at the moment of waking, in
                        // arrival order, and surface it in one batch.
                        let messages = mailbox.drain();
                        note_messages(&messages, &mut state, &mut launched, &callbacks, iteration);
                        orchestrator.set_status(&agent_id, AgentStatus::Running);
                        state.status = AgentStatus::Running;
                        debug!(agent_id = %agent_id, woke_with = messages.len(), "Agent resumed");

                        render_batch(&messages, &launched, &state)
                    }
                }
            };

            if state.iteration_count >= config.max_iterations {
                // No budget for the observation turn; fall to the cap path.
                break;
            }

            llm_output = match model_turn(
                client.as_mut(),
                &callbacks,
                &cancel,
                &compactor,
                state.iteration_count + 1,
                &observation,
                None,
                ChatRole::Tool,
            )
            .await
            {
                Ok(output) => output,
                Err(e) => {
                    return finish_failed(
                        &callbacks,
                        state.iteration_count,
                        format!("Model call failed: {e}"),
                    )
                }
            };
            state.iteration_count += 1;

            // Post-resume compaction checkpoint.
            if action_kind == "wait" || action_kind == "wait_for_subagents" {
                compactor.maybe_compact(client.as_mut()).await;
            }

            callbacks.emit("on_iteration_end", |cb| cb.on_iteration_end(iteration, action_kind));
        }

        // Iteration cap: one forced summary turn, then a synthesized finish.
        let iterations = state.iteration_count;
        let content = match model_turn(
            client.as_mut(),
            &callbacks,
            &cancel,
            &compactor,
            iterations,
            MAX_ITERATIONS_PROMPT,
            None,
            ChatRole::User,
        )
        .await
        {
            Ok(summary) => summary,
            Err(e) => format!("Reached maximum iterations ({iterations}); summary failed: {e}"),
        };
        callbacks.emit("on_agent_finish", |cb| cb.on_agent_finish(false, iterations, &content));
        (AgentResponse::failure(content, iterations), AgentStatus::Completed)
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("model", &self.client.model_id())
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("subagents", &self.subagents.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Outcome of the parse-with-retry stage.
enum ParseOutcome {
    Parsed(Action),
    Exhausted(String),
    ModelFailed(ModelError),
}

/// Tries to parse the model turn, re-prompting with the error up to
/// `max_retries` times. Each re-prompt is a model turn and consumes
/// iteration budget.
#[allow(clippy::too_many_arguments)]
async fn parse_with_retry(
    client: &mut dyn ChatClient,
    callbacks: &CallbackSet,
    cancel: &CancellationToken,
    compactor: &Compactor,
    state: &mut AgentState,
    max_retries: usize,
    max_iterations: usize,
    llm_output: &mut String,
) -> ParseOutcome {
    let attempts = max_retries.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match OutputParser::parse(llm_output) {
            Ok(action) => return ParseOutcome::Parsed(action),
            Err(e) => {
                last_error = e.to_string();
                let iteration = state.iteration_count;
                callbacks.emit("on_parse_error", |cb| {
                    cb.on_parse_error(iteration, &last_error, attempt)
                });
                if attempt < attempts {
                    if state.iteration_count >= max_iterations {
                        // No budget left for a retry turn.
                        return ParseOutcome::Exhausted(last_error);
                    }
                    let feedback = format!(
                        "Parse error: {last_error}\n\nPlease follow the exact format:\n{}",
                        OutputParser::format_instruction()
                    );
                    match model_turn(
                        client,
                        callbacks,
                        cancel,
                        compactor,
                        state.iteration_count + 1,
                        &feedback,
                        None,
                        ChatRole::User,
                    )
                    .await
                    {
                        Ok(output) => {
                            *llm_output = output;
                            state.iteration_count += 1;
                        }
                        Err(e) => return ParseOutcome::ModelFailed(e),
                    }
                }
            }
        }
    }

    ParseOutcome::Exhausted(last_error)
}

/// One model call with cancellation and a single emergency compaction on
/// context overflow.
#[allow(clippy::too_many_arguments)]
async fn model_turn(
    client: &mut dyn ChatClient,
    callbacks: &CallbackSet,
    cancel: &CancellationToken,
    compactor: &Compactor,
    iteration: usize,
    prompt: &str,
    system_prompt: Option<&str>,
    role: ChatRole,
) -> Result<String, ModelError> {
    callbacks.emit("on_llm_request", |cb| cb.on_llm_request(iteration, prompt, system_prompt));

    let mut outcome = chat_cancellable(client, cancel, prompt, system_prompt, role).await;

    if let Err(e) = &outcome {
        if e.is_context_overflow() {
            warn!(iteration, "Context overflow; attempting emergency compaction");
            let history = client.history();
            if let Some(compacted) = compactor.compact_history(&history, client).await {
                client.set_history(compacted);
                outcome = chat_cancellable(client, cancel, prompt, system_prompt, role).await;
            }
        }
    }

    let output = outcome?;
    callbacks.emit("on_llm_response", |cb| cb.on_llm_response(iteration, &output));
    Ok(output)
}

async fn chat_cancellable(
    client: &mut dyn ChatClient,
    cancel: &CancellationToken,
    prompt: &str,
    system_prompt: Option<&str>,
    role: ChatRole,
) -> Result<String, ModelError> {
    if cancel.is_cancelled() {
        return Err(ModelError::Cancelled);
    }
    tokio::select! {
        result = client.chat(prompt, system_prompt, role) => result,
        () = cancel.cancelled() => Err(ModelError::Cancelled),
    }
}

/// Executes one tool call. Never errors: every failure mode becomes an
/// observation string for the model.
#[allow(clippy::too_many_arguments)]
async fn execute_tool(
    tools: &HashMap<String, Arc<Tool>>,
    tool_name: &str,
    arguments: &serde_json::Map<String, serde_json::Value>,
    agent_id: &AgentId,
    cancel: &CancellationToken,
    permissions: &Arc<dyn PermissionHandler>,
    working_dir: &std::path::Path,
    truncator: &OutputTruncator,
    config: &RuntimeConfig,
    callbacks: &CallbackSet,
    iteration: usize,
) -> String {
    let Some(tool) = tools.get(tool_name) else {
        let mut available: Vec<&String> = tools.keys().collect();
        available.sort();
        let observation =
            format!("Error: Tool '{tool_name}' not found. Available tools: {available:?}");
        callbacks.emit("on_tool_result", |cb| {
            cb.on_tool_result(iteration, tool_name, &observation, false)
        });
        return observation;
    };

    let arguments_value = serde_json::Value::Object(arguments.clone());
    callbacks.emit("on_tool_call", |cb| cb.on_tool_call(iteration, tool_name, &arguments_value));

    let ctx = ToolContext::new(
        agent_id.clone(),
        cancel.child_token(),
        Arc::clone(permissions),
        working_dir.to_path_buf(),
    );

    let (rendered, success) = match tool.call(arguments, &ctx, config.tool_default_timeout).await {
        Ok(result) => {
            let success = result.is_success();
            let (text, meta) = truncator.truncate(&result.to_observation());
            if meta.is_truncated {
                debug!(
                    tool = tool_name,
                    total_lines = meta.total_lines,
                    total_bytes = meta.total_bytes,
                    "Tool output truncated"
                );
            }
            (text, success)
        }
        Err(e) => (format!("Error executing tool '{tool_name}': {e}"), false),
    };

    callbacks.emit("on_tool_result", |cb| {
        cb.on_tool_result(iteration, tool_name, &rendered, success)
    });

    format!("[TOOL RESULT from {tool_name}]\n{rendered}")
}

/// Registers and launches each requested subagent. Returns the observation
/// for the model; launching is instant and non-blocking.
#[allow(clippy::too_many_arguments)]
fn launch_subagents(
    orchestrator: &AgentOrchestrator,
    parent_id: &AgentId,
    catalog: &HashMap<String, Arc<dyn SubagentFactory>>,
    specs: Vec<SubagentSpec>,
    state: &mut AgentState,
    launched: &mut HashMap<AgentId, LaunchedSubagent>,
    callbacks: &CallbackSet,
    iteration: usize,
) -> String {
    let mut names = Vec::with_capacity(specs.len());

    for spec in specs {
        let Some(factory) = catalog.get(&spec.subagent_name) else {
            let mut available: Vec<&String> = catalog.keys().collect();
            available.sort();
            return format!(
                "Error: Subagent '{}' not found. Available subagents: {available:?}",
                spec.subagent_name
            );
        };

        let task = match &spec.context {
            Some(context) => format!("{context}\n\n{}", spec.task),
            None => spec.task.clone(),
        };

        callbacks.emit("on_subagent_call", |cb| {
            cb.on_subagent_call(iteration, &spec.subagent_name, &task)
        });

        let child = factory.build();
        let child_id = orchestrator.register(child);
        if let Err(e) = orchestrator.launch(&child_id, task.clone(), Some(parent_id.clone())) {
            return format!("Error launching subagent '{}': {e}", spec.subagent_name);
        }

        let display_name =
            spec.display_name.clone().unwrap_or_else(|| spec.subagent_name.clone());
        launched.insert(
            child_id.clone(),
            LaunchedSubagent {
                id: child_id.clone(),
                display_name: display_name.clone(),
                subagent_name: spec.subagent_name.clone(),
                task,
                parent_id: parent_id.clone(),
                started_at: Utc::now(),
                completed_at: None,
                result_summary: None,
                status: SubagentOutcome::Running,
            },
        );
        state.pending_children.insert(child_id);
        names.push(display_name);
    }

    format!(
        "Successfully launched {} subagent(s): {}. They are running in parallel.",
        names.len(),
        names.join(", ")
    )
}

/// Updates pending-children bookkeeping for newly drained messages and emits
/// subagent-result callbacks. Does not render anything.
fn note_messages(
    messages: &[AgentMessage],
    state: &mut AgentState,
    launched: &mut HashMap<AgentId, LaunchedSubagent>,
    callbacks: &CallbackSet,
    iteration: usize,
) {
    for message in messages {
        state.received_messages.push(message.clone());
        match message.kind {
            MessageKind::ChildCompleted | MessageKind::ChildFailed => {
                state.pending_children.remove(&message.from);
                if let Some(record) = launched.get_mut(&message.from) {
                    record.completed_at = Some(message.timestamp);
                    record.result_summary = Some(message.payload.clone());
                    record.status = if message.kind == MessageKind::ChildFailed {
                        SubagentOutcome::Failed
                    } else {
                        SubagentOutcome::Completed
                    };
                    let display_name = record.display_name.clone();
                    callbacks.emit("on_subagent_result", |cb| {
                        cb.on_subagent_result(iteration, &display_name, &message.payload)
                    });
                }
            }
            MessageKind::Peer | MessageKind::Resume => {}
        }
    }
}

/// Renders one message as an observation line.
fn render_message(message: &AgentMessage, launched: &HashMap<AgentId, LaunchedSubagent>) -> String {
    match message.kind {
        MessageKind::ChildCompleted => {
            let name = display_name(launched, &message.from);
            format!("Subagent '{name}' completed with result: {}", message.payload)
        }
        MessageKind::ChildFailed => {
            let name = display_name(launched, &message.from);
            format!("Subagent '{name}' failed with error: {}", message.payload)
        }
        MessageKind::Peer => format!("[MESSAGE from {}] {}", message.from, message.payload),
        MessageKind::Resume => "[RESUMED]".to_string(),
    }
}

/// Renders a drained message batch as one observation, preserving arrival
/// order, followed by a short status line for any still-pending children.
fn render_batch(
    messages: &[AgentMessage],
    launched: &HashMap<AgentId, LaunchedSubagent>,
    state: &AgentState,
) -> String {
    let mut lines: Vec<String> =
        messages.iter().map(|m| render_message(m, launched)).collect();

    if messages.is_empty() {
        lines.push("[RESUMED] No messages were queued.".to_string());
    }

    if !state.pending_children.is_empty() {
        let mut pending: Vec<String> = state
            .pending_children
            .iter()
            .map(|id| display_name(launched, id))
            .collect();
        pending.sort();
        lines.push(format!(
            "Still pending: {}. You may keep waiting (Action: wait_for_subagents) or take another action.",
            pending.join(", ")
        ));
    }

    lines.join("\n")
}

fn display_name(launched: &HashMap<AgentId, LaunchedSubagent>, id: &AgentId) -> String {
    launched.get(id).map_or_else(|| id.clone(), |r| r.display_name.clone())
}

/// Folds any backlog of drained messages into the next observation so each
/// message is surfaced exactly once.
fn with_backlog(
    backlog: &mut Vec<AgentMessage>,
    launched: &HashMap<AgentId, LaunchedSubagent>,
    observation: String,
) -> String {
    if backlog.is_empty() {
        return observation;
    }
    let mut lines: Vec<String> =
        backlog.drain(..).map(|m| render_message(&m, launched)).collect();
    lines.push(observation);
    lines.join("\n")
}

fn finish_failed(
    callbacks: &CallbackSet,
    iterations: usize,
    content: String,
) -> (AgentResponse, AgentStatus) {
    callbacks.emit("on_agent_finish", |cb| cb.on_agent_finish(false, iterations, &content));
    (AgentResponse::failure(content, iterations), AgentStatus::Failed)
}

fn finish_cancelled(
    callbacks: &CallbackSet,
    iterations: usize,
) -> (AgentResponse, AgentStatus) {
    let content = "cancelled".to_string();
    callbacks.emit("on_agent_finish", |cb| cb.on_agent_finish(false, iterations, &content));
    (AgentResponse::failure(content, iterations), AgentStatus::Failed)
}
