//! Per-call tool execution context and permission plumbing.
//!
//! Every tool invocation gets its own [`ToolContext`]: identifiers for
//! correlation, a cancellation token derived from the owning agent's token,
//! the permission handler, and a working directory. Tools request approval
//! through [`ToolContext::ask`]; a denial surfaces as a normal tool failure.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A request for permission to perform an action.
#[derive(Debug, Clone)]
pub struct PermissionRequest {
    /// Name of the tool asking.
    pub tool_name: String,
    /// Human-readable description of the action.
    pub description: String,
    /// The arguments the tool was invoked with, for display.
    pub arguments: serde_json::Value,
}

/// Decides whether a tool may perform an action.
///
/// The core only requires this shape; interactive prompts, policy engines,
/// and audit logs live outside.
#[async_trait]
pub trait PermissionHandler: Send + Sync {
    /// Returns `true` to allow the action, `false` to deny it.
    async fn ask(&self, request: &PermissionRequest) -> bool;
}

/// Permission handler that approves everything. The default for embedders
/// that have their own sandboxing.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl PermissionHandler for AllowAll {
    async fn ask(&self, _request: &PermissionRequest) -> bool {
        true
    }
}

/// Context threaded into each tool call.
#[derive(Clone)]
pub struct ToolContext {
    /// Identifies the run this call belongs to.
    pub session_id: String,
    /// Identifies the model turn that requested the call.
    pub message_id: String,
    /// Identifies this specific call.
    pub call_id: String,
    /// Abort signal; tools should stop work when it fires.
    pub cancel: CancellationToken,
    /// Permission handler the tool's `ask` funnels through.
    pub permissions: Arc<dyn PermissionHandler>,
    /// Directory relative paths resolve against.
    pub working_dir: PathBuf,
}

impl ToolContext {
    /// Creates a context for one tool call under the given session.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        cancel: CancellationToken,
        permissions: Arc<dyn PermissionHandler>,
        working_dir: PathBuf,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            message_id: Uuid::new_v4().to_string(),
            call_id: Uuid::new_v4().to_string(),
            cancel,
            permissions,
            working_dir,
        }
    }

    /// Asks the permission handler whether the described action may proceed.
    pub async fn ask(&self, request: &PermissionRequest) -> bool {
        self.permissions.ask(request).await
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("session_id", &self.session_id)
            .field("message_id", &self.message_id)
            .field("call_id", &self.call_id)
            .field("working_dir", &self.working_dir)
            .field("permissions", &"<handler>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DenyAll;

    #[async_trait]
    impl PermissionHandler for DenyAll {
        async fn ask(&self, _request: &PermissionRequest) -> bool {
            false
        }
    }

    fn request() -> PermissionRequest {
        PermissionRequest {
            tool_name: "bash".to_string(),
            description: "run `ls`".to_string(),
            arguments: serde_json::json!({"command": "ls"}),
        }
    }

    #[tokio::test]
    async fn test_allow_all() {
        let ctx = ToolContext::new(
            "session-1",
            CancellationToken::new(),
            Arc::new(AllowAll),
            PathBuf::from("."),
        );
        assert!(ctx.ask(&request()).await);
    }

    #[tokio::test]
    async fn test_deny_all() {
        let ctx = ToolContext::new(
            "session-1",
            CancellationToken::new(),
            Arc::new(DenyAll),
            PathBuf::from("."),
        );
        assert!(!ctx.ask(&request()).await);
    }

    #[test]
    fn test_context_ids_are_unique() {
        let cancel = CancellationToken::new();
        let a = ToolContext::new("s", cancel.clone(), Arc::new(AllowAll), PathBuf::from("."));
        let b = ToolContext::new("s", cancel, Arc::new(AllowAll), PathBuf::from("."));
        assert_ne!(a.call_id, b.call_id);
        assert_ne!(a.message_id, b.message_id);
    }
}
