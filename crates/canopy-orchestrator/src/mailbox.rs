//! Per-agent bounded mailbox.
//!
//! Each agent owns exactly one mailbox, held by the orchestrator. Delivery
//! and drain are the only mutations: the orchestrator delivers, the owning
//! agent drains. A full mailbox blocks the sender up to a deadline and then
//! errors, bounding memory under a runaway producer.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{OrchestratorError, Result};
use crate::schemas::{AgentId, AgentMessage};

struct Inner {
    queue: VecDeque<AgentMessage>,
    closed: bool,
}

/// Bounded FIFO of inbound messages for one agent.
pub struct Mailbox {
    agent_id: AgentId,
    capacity: usize,
    inner: Mutex<Inner>,
    /// Signalled when a message is enqueued.
    arrived: Notify,
    /// Signalled when space frees up or the mailbox closes.
    vacated: Notify,
}

impl Mailbox {
    /// Creates an empty mailbox for the given agent.
    #[must_use]
    pub fn new(agent_id: AgentId, capacity: usize) -> Self {
        Self {
            agent_id,
            capacity: capacity.max(1),
            inner: Mutex::new(Inner { queue: VecDeque::new(), closed: false }),
            arrived: Notify::new(),
            vacated: Notify::new(),
        }
    }

    /// Enqueues a message, waking the owner if it is parked on
    /// [`Mailbox::wait_for_any`].
    ///
    /// Blocks the caller while the mailbox is full, up to `timeout`.
    ///
    /// # Errors
    /// `MailboxClosed` if the owner has terminated; `MailboxFull` if space
    /// did not free up within the deadline.
    pub async fn deliver(&self, message: AgentMessage, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let vacated = self.vacated.notified();
            {
                let mut inner = self.inner.lock().expect("mailbox lock");
                if inner.closed {
                    return Err(OrchestratorError::MailboxClosed(self.agent_id.clone()));
                }
                if inner.queue.len() < self.capacity {
                    debug!(
                        to = %self.agent_id,
                        from = %message.from,
                        kind = message.kind.as_str(),
                        "Message delivered"
                    );
                    inner.queue.push_back(message);
                    drop(inner);
                    self.arrived.notify_waiters();
                    return Ok(());
                }
            }
            if tokio::time::timeout_at(deadline, vacated).await.is_err() {
                return Err(OrchestratorError::MailboxFull(self.agent_id.clone()));
            }
        }
    }

    /// Removes and returns all currently buffered messages, in arrival order.
    #[must_use]
    pub fn drain(&self) -> Vec<AgentMessage> {
        let mut inner = self.inner.lock().expect("mailbox lock");
        let drained: Vec<AgentMessage> = inner.queue.drain(..).collect();
        drop(inner);
        if !drained.is_empty() {
            self.vacated.notify_waiters();
        }
        drained
    }

    /// Parks until a buffered message satisfies `predicate` (or the mailbox
    /// closes). Does not consume messages; follow up with
    /// [`Mailbox::drain`].
    pub async fn wait_for_any(&self, predicate: impl Fn(&AgentMessage) -> bool) {
        loop {
            let arrived = self.arrived.notified();
            {
                let inner = self.inner.lock().expect("mailbox lock");
                if inner.closed || inner.queue.iter().any(&predicate) {
                    return;
                }
            }
            arrived.await;
        }
    }

    /// Parks until any message is buffered.
    pub async fn wait_any(&self) {
        self.wait_for_any(|_| true).await;
    }

    /// Number of buffered messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("mailbox lock").queue.len()
    }

    /// Whether the mailbox is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes the mailbox; subsequent delivers fail, parked waiters wake.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock().expect("mailbox lock");
            inner.closed = true;
        }
        self.arrived.notify_waiters();
        self.vacated.notify_waiters();
    }

    /// Whether the mailbox has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("mailbox lock").closed
    }
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("agent_id", &self.agent_id)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::MessageKind;
    use std::sync::Arc;

    fn msg(from: &str, payload: &str) -> AgentMessage {
        AgentMessage::new(from, "owner-1", MessageKind::Peer, payload)
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let mailbox = Mailbox::new("owner-1".to_string(), 16);
        for i in 0..5 {
            mailbox.deliver(msg("peer-1", &format!("m{i}")), Duration::from_secs(1)).await.unwrap();
        }
        let drained = mailbox.drain();
        let payloads: Vec<&str> = drained.iter().map(|m| m.payload.as_str()).collect();
        assert_eq!(payloads, vec!["m0", "m1", "m2", "m3", "m4"]);
        assert!(mailbox.is_empty());
    }

    #[tokio::test]
    async fn test_deliver_wakes_waiter() {
        let mailbox = Arc::new(Mailbox::new("owner-1".to_string(), 16));
        let waiter = {
            let mailbox = Arc::clone(&mailbox);
            tokio::spawn(async move {
                mailbox.wait_any().await;
                mailbox.drain()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        mailbox.deliver(msg("peer-1", "wake up"), Duration::from_secs(1)).await.unwrap();
        let drained = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].payload, "wake up");
    }

    #[tokio::test]
    async fn test_full_mailbox_times_out() {
        let mailbox = Mailbox::new("owner-1".to_string(), 2);
        mailbox.deliver(msg("p", "a"), Duration::from_millis(50)).await.unwrap();
        mailbox.deliver(msg("p", "b"), Duration::from_millis(50)).await.unwrap();
        let err = mailbox.deliver(msg("p", "c"), Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::MailboxFull(_)));
        // The first two are still intact.
        assert_eq!(mailbox.len(), 2);
    }

    #[tokio::test]
    async fn test_drain_unblocks_full_sender() {
        let mailbox = Arc::new(Mailbox::new("owner-1".to_string(), 1));
        mailbox.deliver(msg("p", "a"), Duration::from_millis(50)).await.unwrap();

        let sender = {
            let mailbox = Arc::clone(&mailbox);
            tokio::spawn(async move { mailbox.deliver(msg("p", "b"), Duration::from_secs(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(mailbox.drain().len(), 1);

        sender.await.unwrap().unwrap();
        assert_eq!(mailbox.drain()[0].payload, "b");
    }

    #[tokio::test]
    async fn test_closed_mailbox_rejects_delivery() {
        let mailbox = Mailbox::new("owner-1".to_string(), 4);
        mailbox.close();
        let err = mailbox.deliver(msg("p", "late"), Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::MailboxClosed(_)));
    }

    #[tokio::test]
    async fn test_close_wakes_waiter() {
        let mailbox = Arc::new(Mailbox::new("owner-1".to_string(), 4));
        let waiter = {
            let mailbox = Arc::clone(&mailbox);
            tokio::spawn(async move { mailbox.wait_any().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        mailbox.close();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_any_with_predicate() {
        let mailbox = Arc::new(Mailbox::new("owner-1".to_string(), 8));
        mailbox.deliver(msg("p", "noise"), Duration::from_secs(1)).await.unwrap();

        let waiter = {
            let mailbox = Arc::clone(&mailbox);
            tokio::spawn(async move {
                mailbox
                    .wait_for_any(|m| m.kind == MessageKind::ChildCompleted)
                    .await;
                mailbox.drain()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        mailbox
            .deliver(
                AgentMessage::new("child-1", "owner-1", MessageKind::ChildCompleted, "done"),
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        let drained = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        // Both the noise and the completion arrive in order.
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].payload, "noise");
        assert_eq!(drained[1].payload, "done");
    }
}
