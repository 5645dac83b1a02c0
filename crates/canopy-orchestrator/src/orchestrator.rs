//! Agent orchestrator: registry, lifecycle, and message routing.
//!
//! The orchestrator exclusively owns every agent's mailbox and cooperative
//! task. Agents hold only ids: a child talks to its parent through the
//! orchestrator, never through a direct handle, keeping ownership strictly
//! downward. There is no hidden global: construct one with
//! [`AgentOrchestrator::new`] and pass the `Arc` to each agent at
//! construction; tests inject fresh instances.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::config::RuntimeConfig;
use crate::error::{OrchestratorError, Result};
use crate::mailbox::Mailbox;
use crate::schemas::{AgentId, AgentMessage, AgentResponse, AgentStatus, MessageKind};

/// Bookkeeping for one registered agent.
struct AgentHandle {
    name: String,
    parent_id: Option<AgentId>,
    status: AgentStatus,
    mailbox: Arc<Mailbox>,
    result: Option<AgentResponse>,
    done: Arc<Notify>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Registry {
    handles: HashMap<AgentId, AgentHandle>,
    /// Registered agents that have not been launched yet.
    unlaunched: HashMap<AgentId, Agent>,
    tasks: HashMap<AgentId, JoinHandle<()>>,
    children: HashMap<AgentId, HashSet<AgentId>>,
    name_counters: HashMap<String, usize>,
}

/// Summary of one registered agent, for introspection.
#[derive(Debug, Clone)]
pub struct AgentInfo {
    /// The agent's routing id.
    pub id: AgentId,
    /// The agent's display name.
    pub name: String,
    /// Parent id, if launched as a subagent.
    pub parent_id: Option<AgentId>,
    /// Current status.
    pub status: AgentStatus,
}

/// Owns agent registration, launching, completion, and message routing.
pub struct AgentOrchestrator {
    config: RuntimeConfig,
    registry: Mutex<Registry>,
    shutdown_token: CancellationToken,
    shut_down: AtomicBool,
    /// Back-reference handed to spawned supervision tasks.
    self_ref: Weak<AgentOrchestrator>,
}

impl AgentOrchestrator {
    /// Creates an orchestrator with the given configuration.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            config,
            registry: Mutex::new(Registry::default()),
            shutdown_token: CancellationToken::new(),
            shut_down: AtomicBool::new(false),
            self_ref: weak.clone(),
        })
    }

    /// Creates an orchestrator with default configuration.
    #[must_use]
    pub fn with_defaults() -> Arc<Self> {
        Self::new(RuntimeConfig::default())
    }

    /// The configuration this orchestrator runs under.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Registers an agent, allocating its id and an empty mailbox.
    ///
    /// Does NOT start execution; call [`AgentOrchestrator::launch`].
    pub fn register(&self, agent: Agent) -> AgentId {
        let mut registry = self.registry.lock().expect("registry lock");
        let name = agent.name().to_string();
        let counter = registry.name_counters.entry(name.clone()).or_insert(0);
        *counter += 1;
        let agent_id: AgentId = format!("{name}-{counter}");

        let handle = AgentHandle {
            name,
            parent_id: None,
            status: AgentStatus::Idle,
            mailbox: Arc::new(Mailbox::new(agent_id.clone(), self.config.mailbox_capacity)),
            result: None,
            done: Arc::new(Notify::new()),
            cancel: self.shutdown_token.child_token(),
        };

        registry.handles.insert(agent_id.clone(), handle);
        registry.unlaunched.insert(agent_id.clone(), agent);
        debug!(agent_id = %agent_id, "Agent registered");
        agent_id
    }

    /// Starts the agent's cooperative task. Must be called exactly once per id.
    ///
    /// # Errors
    /// `AlreadyLaunched` on a second call, `NotRegistered` for unknown ids.
    pub fn launch(
        &self,
        agent_id: &AgentId,
        task: impl Into<String>,
        parent_id: Option<AgentId>,
    ) -> Result<()> {
        let task = task.into();
        let (agent, cancel) = {
            let mut registry = self.registry.lock().expect("registry lock");
            let Some(agent) = registry.unlaunched.remove(agent_id) else {
                return if registry.handles.contains_key(agent_id) {
                    Err(OrchestratorError::AlreadyLaunched(agent_id.clone()))
                } else {
                    Err(OrchestratorError::NotRegistered(agent_id.clone()))
                };
            };

            let handle = registry
                .handles
                .get_mut(agent_id)
                .ok_or_else(|| OrchestratorError::NotRegistered(agent_id.clone()))?;
            handle.parent_id = parent_id.clone();
            handle.status = AgentStatus::Running;
            let cancel = handle.cancel.clone();

            if let Some(parent) = &parent_id {
                registry.children.entry(parent.clone()).or_default().insert(agent_id.clone());
            }
            (agent, cancel)
        };

        info!(
            agent_id = %agent_id,
            parent = parent_id.as_deref().unwrap_or("-"),
            "agent_started"
        );

        let orchestrator = self.self_ref.upgrade().expect("orchestrator dropped during launch");
        let id = agent_id.clone();
        let supervised = tokio::spawn(async move {
            let (response, status) = agent.run_loop(Arc::clone(&orchestrator), id.clone(), task, cancel).await;
            orchestrator.complete(&id, response, status).await;
        });

        let mut registry = self.registry.lock().expect("registry lock");
        // The task may already have finished; don't retain a handle for a
        // terminal agent.
        if registry.handles.get(agent_id).is_some_and(|h| !h.status.is_terminal()) {
            registry.tasks.insert(agent_id.clone(), supervised);
        }
        Ok(())
    }

    /// Records an agent's terminal state and notifies its parent.
    ///
    /// Closes the agent's mailbox, removes it from its parent's children set,
    /// cancels orphaned children, and signals completion waiters. Cancels no
    /// peers. Idempotent: repeated calls for the same id are no-ops.
    pub async fn complete(&self, agent_id: &AgentId, response: AgentResponse, status: AgentStatus) {
        debug_assert!(status.is_terminal());

        let (parent, orphans, mailbox, done) = {
            let mut registry = self.registry.lock().expect("registry lock");
            let Some(handle) = registry.handles.get_mut(agent_id) else {
                warn!(agent_id = %agent_id, "complete() for unknown agent");
                return;
            };
            if handle.status.is_terminal() {
                return;
            }
            handle.status = status;
            handle.result = Some(response.clone());
            handle.mailbox.close();
            let mailbox = Arc::clone(&handle.mailbox);
            let done = Arc::clone(&handle.done);
            let parent = handle.parent_id.clone();

            if let Some(parent_id) = &parent {
                if let Some(siblings) = registry.children.get_mut(parent_id) {
                    siblings.remove(agent_id);
                }
            }

            // Children that outlive their parent are orphans: cancel them.
            let orphans: Vec<(AgentId, CancellationToken)> = registry
                .children
                .remove(agent_id)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|child| {
                    registry.handles.get(&child).map(|h| (child, h.cancel.clone()))
                })
                .collect();

            registry.tasks.remove(agent_id);
            (parent, orphans, mailbox, done)
        };

        // Drop anything still buffered for the terminated agent.
        let _ = mailbox.drain();

        for (orphan_id, cancel) in orphans {
            warn!(agent_id = %agent_id, orphan = %orphan_id, "Cancelling orphaned child");
            cancel.cancel();
        }

        info!(
            agent_id = %agent_id,
            status = ?status,
            success = response.success,
            "Agent terminal"
        );
        done.notify_waiters();

        if let Some(parent_id) = parent {
            let kind = if status == AgentStatus::Failed {
                MessageKind::ChildFailed
            } else {
                MessageKind::ChildCompleted
            };
            let message =
                AgentMessage::new(agent_id.clone(), parent_id.clone(), kind, response.content);
            if let Err(e) = self.route(message).await {
                warn!(
                    agent_id = %agent_id,
                    parent = %parent_id,
                    error = %e,
                    "Failed to notify parent of completion"
                );
            }
        }
    }

    /// Sends a peer message from one agent to another.
    ///
    /// The recipient is resolved as an exact id first, then as a unique agent
    /// name.
    ///
    /// # Errors
    /// `UnknownRecipient` if the recipient does not exist or has terminated;
    /// `MailboxFull` if its mailbox stayed full past the delivery deadline.
    pub async fn send(
        &self,
        from: &AgentId,
        to: &str,
        content: impl Into<String>,
    ) -> Result<()> {
        let recipient = self
            .resolve(to)
            .ok_or_else(|| OrchestratorError::UnknownRecipient(to.to_string()))?;
        let message = AgentMessage::new(from.clone(), recipient, MessageKind::Peer, content);
        self.route(message).await
    }

    /// Delivers a message to its recipient's mailbox.
    async fn route(&self, message: AgentMessage) -> Result<()> {
        let mailbox = {
            let registry = self.registry.lock().expect("registry lock");
            let handle = registry
                .handles
                .get(&message.to)
                .ok_or_else(|| OrchestratorError::UnknownRecipient(message.to.clone()))?;
            if handle.status.is_terminal() {
                return Err(OrchestratorError::UnknownRecipient(message.to.clone()));
            }
            Arc::clone(&handle.mailbox)
        };
        mailbox.deliver(message, self.config.deliver_timeout).await
    }

    /// Resolves a recipient: exact id first, then unique name match among
    /// non-terminal agents.
    fn resolve(&self, to: &str) -> Option<AgentId> {
        let registry = self.registry.lock().expect("registry lock");
        if registry.handles.contains_key(to) {
            return Some(to.to_string());
        }
        let mut matches = registry
            .handles
            .iter()
            .filter(|(_, h)| h.name == to && !h.status.is_terminal())
            .map(|(id, _)| id.clone());
        let first = matches.next()?;
        // Ambiguous names don't resolve.
        matches.next().is_none().then_some(first)
    }

    /// Finds a non-terminal agent id by name, if unique.
    #[must_use]
    pub fn find_agent(&self, name: &str) -> Option<AgentId> {
        self.resolve(name)
    }

    /// Current status of an agent. Read-only.
    #[must_use]
    pub fn status(&self, agent_id: &AgentId) -> Option<AgentStatus> {
        let registry = self.registry.lock().expect("registry lock");
        registry.handles.get(agent_id).map(|h| h.status)
    }

    /// Whether the agent exists and has not terminated.
    #[must_use]
    pub fn is_alive(&self, agent_id: &AgentId) -> bool {
        self.status(agent_id).is_some_and(|s| !s.is_terminal())
    }

    /// A terminal agent's result, if available.
    #[must_use]
    pub fn result(&self, agent_id: &AgentId) -> Option<AgentResponse> {
        let registry = self.registry.lock().expect("registry lock");
        registry.handles.get(agent_id).and_then(|h| h.result.clone())
    }

    /// Lists all registered agents.
    #[must_use]
    pub fn agents(&self) -> Vec<AgentInfo> {
        let registry = self.registry.lock().expect("registry lock");
        registry
            .handles
            .iter()
            .map(|(id, h)| AgentInfo {
                id: id.clone(),
                name: h.name.clone(),
                parent_id: h.parent_id.clone(),
                status: h.status,
            })
            .collect()
    }

    /// Blocks until the agent reaches a terminal state and returns its result.
    ///
    /// # Errors
    /// `NotRegistered` for unknown ids.
    pub async fn wait_for_completion(&self, agent_id: &AgentId) -> Result<AgentResponse> {
        let done = {
            let registry = self.registry.lock().expect("registry lock");
            let handle = registry
                .handles
                .get(agent_id)
                .ok_or_else(|| OrchestratorError::NotRegistered(agent_id.clone()))?;
            Arc::clone(&handle.done)
        };

        loop {
            // Register the waiter before checking, so a completion landing in
            // between is not lost.
            let notified = done.notified();
            {
                let registry = self.registry.lock().expect("registry lock");
                if let Some(result) =
                    registry.handles.get(agent_id).and_then(|h| h.result.clone())
                {
                    return Ok(result);
                }
            }
            notified.await;
        }
    }

    /// Transitions a running agent's status, enforcing the state machine.
    pub(crate) fn set_status(&self, agent_id: &AgentId, status: AgentStatus) {
        let mut registry = self.registry.lock().expect("registry lock");
        if let Some(handle) = registry.handles.get_mut(agent_id) {
            if handle.status.can_transition_to(status) {
                debug!(agent_id = %agent_id, from = ?handle.status, to = ?status, "Status transition");
                handle.status = status;
            } else {
                warn!(
                    agent_id = %agent_id,
                    from = ?handle.status,
                    to = ?status,
                    "Invalid status transition ignored"
                );
            }
        }
    }

    /// The agent's mailbox, for the owning loop to drain and wait on.
    pub(crate) fn mailbox(&self, agent_id: &AgentId) -> Option<Arc<Mailbox>> {
        let registry = self.registry.lock().expect("registry lock");
        registry.handles.get(agent_id).map(|h| Arc::clone(&h.mailbox))
    }

    /// Cancels all tasks, drains mailboxes, and waits up to the configured
    /// grace period. Idempotent.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Orchestrator shutting down");
        self.shutdown_token.cancel();

        let (tasks, mailboxes): (Vec<(AgentId, JoinHandle<()>)>, Vec<Arc<Mailbox>>) = {
            let mut registry = self.registry.lock().expect("registry lock");
            let tasks = registry.tasks.drain().collect();
            let mailboxes =
                registry.handles.values().map(|h| Arc::clone(&h.mailbox)).collect();
            (tasks, mailboxes)
        };

        for mailbox in &mailboxes {
            mailbox.close();
            let _ = mailbox.drain();
        }

        let deadline = Instant::now() + self.config.shutdown_grace;
        for (agent_id, task) in tasks {
            let abort = task.abort_handle();
            match tokio::time::timeout_at(deadline, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(agent_id = %agent_id, error = %e, "Agent task join error"),
                Err(_) => {
                    warn!(agent_id = %agent_id, "Agent task did not stop within grace; aborting");
                    abort.abort();
                }
            }
        }
        info!("Orchestrator shutdown complete");
    }

    /// Whether shutdown has been initiated.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for AgentOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.registry.lock().map(|r| r.handles.len()).unwrap_or(0);
        f.debug_struct("AgentOrchestrator")
            .field("agents", &count)
            .field("shut_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}
