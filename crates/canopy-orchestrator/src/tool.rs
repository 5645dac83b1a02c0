//! Tool adapter: wraps an async handler as a named, schema-declared callable.
//!
//! The loop sees a tool as a name, a description, a flat parameter schema,
//! and an async body returning a [`ToolResult`] envelope. Argument validation
//! happens here, before the handler runs; validation failures are fed back to
//! the model as observations rather than terminating the agent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::context::ToolContext;

/// Errors from a single tool invocation.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    /// Arguments failed schema validation.
    #[error("Invalid arguments for '{tool}': {reason}")]
    Validation {
        /// Tool name.
        tool: String,
        /// Why the arguments are invalid.
        reason: String,
    },

    /// The permission handler denied the action.
    #[error("Permission denied: {0}")]
    Denied(String),

    /// The tool body failed.
    #[error("Tool execution failed: {0}")]
    Execution(String),

    /// The call did not finish within its deadline.
    #[error("Tool timed out after {0:?}")]
    Timeout(Duration),

    /// The call was aborted via the context's cancel token.
    #[error("Tool cancelled")]
    Cancelled,
}

/// Declared parameter of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    /// Parameter name.
    pub name: String,
    /// Parameter type: "string", "number", "integer", "boolean", "object", or "array".
    #[serde(rename = "type")]
    pub param_type: String,
    /// Parameter description.
    pub description: String,
    /// Whether the parameter is required.
    pub required: bool,
}

/// An attachment carried on a tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    /// Kind of attachment: "image", "file", or "data".
    pub kind: String,
    /// Optional filename.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Optional MIME type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Optional human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Structured result returned by every tool.
///
/// The core treats this as an opaque envelope, recording `error` when
/// deciding whether the call succeeded and rendering a short textual form for
/// the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Short, human-readable summary (e.g. "Read config.json").
    pub title: String,
    /// Detailed text output for model consumption.
    pub output: String,
    /// Structured data for tracking and filtering.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Attached files, images, or data blobs.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Error message if the tool failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// Creates a successful result.
    pub fn success(title: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            output: output.into(),
            metadata: HashMap::new(),
            attachments: Vec::new(),
            error: None,
        }
    }

    /// Creates an error result.
    pub fn from_error(title: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            output: String::new(),
            metadata: HashMap::new(),
            attachments: Vec::new(),
            error: Some(error.into()),
        }
    }

    /// Adds a metadata field.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether the execution succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Renders the result as text for the model.
    #[must_use]
    pub fn to_observation(&self) -> String {
        let mut lines = vec![self.title.clone()];
        if let Some(error) = &self.error {
            lines.push(format!("ERROR: {error}"));
        }
        if !self.output.is_empty() {
            lines.push(self.output.clone());
        }
        if !self.attachments.is_empty() {
            lines.push("Attachments:".to_string());
            for att in &self.attachments {
                let label = att
                    .description
                    .as_deref()
                    .or(att.filename.as_deref())
                    .unwrap_or("unnamed");
                lines.push(format!("  - {label} ({})", att.kind));
            }
        }
        lines.join("\n")
    }
}

/// Handler for tool execution.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Executes the tool with validated arguments and a per-call context.
    ///
    /// # Arguments
    /// * `arguments` - The validated JSON arguments
    /// * `ctx` - The per-call execution context
    ///
    /// # Errors
    /// Returns a [`ToolError`] on failure; the loop surfaces it to the model
    /// as an observation.
    async fn call(
        &self,
        arguments: &serde_json::Map<String, Value>,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError>;
}

/// A named, schema-declared tool.
#[derive(Clone)]
pub struct Tool {
    /// Name used in model-facing schemas and action dispatch.
    pub name: String,
    /// Human description for the system prompt.
    pub description: String,
    /// Declared parameters.
    pub parameters: Vec<ToolParameter>,
    /// The async body.
    pub handler: Arc<dyn ToolHandler>,
    /// Per-call deadline; `None` uses the runtime default.
    pub timeout: Option<Duration>,
}

impl Tool {
    /// Creates a tool with no declared parameters.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            handler,
            timeout: None,
        }
    }

    /// Declares a parameter.
    #[must_use]
    pub fn with_parameter(
        mut self,
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        self.parameters.push(ToolParameter {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required,
        });
        self
    }

    /// Sets a per-call deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Validates arguments against the declared schema.
    ///
    /// # Errors
    /// Returns `ToolError::Validation` naming every missing, unknown, or
    /// mistyped argument.
    pub fn validate_args(&self, arguments: &serde_json::Map<String, Value>) -> Result<(), ToolError> {
        let mut problems = Vec::new();

        for param in &self.parameters {
            match arguments.get(&param.name) {
                None if param.required => {
                    problems.push(format!("missing required parameter '{}'", param.name));
                }
                Some(value) if !type_matches(&param.param_type, value) => {
                    problems.push(format!(
                        "parameter '{}' expected {}, got {}",
                        param.name,
                        param.param_type,
                        json_type_name(value)
                    ));
                }
                _ => {}
            }
        }

        for key in arguments.keys() {
            if !self.parameters.iter().any(|p| &p.name == key) {
                problems.push(format!("unknown parameter '{key}'"));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ToolError::Validation { tool: self.name.clone(), reason: problems.join("; ") })
        }
    }

    /// Validates, then runs the handler under the given deadline.
    ///
    /// # Errors
    /// Returns `ToolError` for validation failure, handler failure, timeout,
    /// or cancellation via the context token.
    pub async fn call(
        &self,
        arguments: &serde_json::Map<String, Value>,
        ctx: &ToolContext,
        default_timeout: Duration,
    ) -> Result<ToolResult, ToolError> {
        self.validate_args(arguments)?;

        let deadline = self.timeout.unwrap_or(default_timeout);
        tokio::select! {
            outcome = tokio::time::timeout(deadline, self.handler.call(arguments, ctx)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(ToolError::Timeout(deadline)),
                }
            }
            () = ctx.cancel.cancelled() => Err(ToolError::Cancelled),
        }
    }

    /// Generates the text schema used in system prompts.
    #[must_use]
    pub fn to_schema(&self) -> String {
        let mut schema = format!("Tool: {}\n", self.name);
        if !self.description.is_empty() {
            let _ = writeln!(schema, "Description: {}", self.description);
        }
        if self.parameters.is_empty() {
            schema.push_str("Parameters: none");
        } else {
            schema.push_str("Parameters:");
            for param in &self.parameters {
                let required = if param.required { "required" } else { "optional" };
                let _ = write!(
                    schema,
                    "\n  - {}: {} ({required}) - {}",
                    param.name, param.param_type, param.description
                );
            }
        }
        schema
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .field("timeout", &self.timeout)
            .field("handler", &"<handler>")
            .finish()
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        // Unknown declared types accept anything.
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AllowAll;
    use std::path::PathBuf;
    use tokio_util::sync::CancellationToken;

    struct EchoHandler;

    #[async_trait]
    impl ToolHandler for EchoHandler {
        async fn call(
            &self,
            arguments: &serde_json::Map<String, Value>,
            _ctx: &ToolContext,
        ) -> Result<ToolResult, ToolError> {
            let text = arguments.get("text").and_then(Value::as_str).unwrap_or_default();
            Ok(ToolResult::success("Echoed", text))
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl ToolHandler for SlowHandler {
        async fn call(
            &self,
            _arguments: &serde_json::Map<String, Value>,
            _ctx: &ToolContext,
        ) -> Result<ToolResult, ToolError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ToolResult::success("Done", ""))
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new(
            "session-1",
            CancellationToken::new(),
            Arc::new(AllowAll),
            PathBuf::from("."),
        )
    }

    fn echo_tool() -> Tool {
        Tool::new("echo", "Echoes text back", Arc::new(EchoHandler)).with_parameter(
            "text",
            "string",
            "Text to echo",
            true,
        )
    }

    fn args(json: &str) -> serde_json::Map<String, Value> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_validate_ok() {
        assert!(echo_tool().validate_args(&args(r#"{"text": "hi"}"#)).is_ok());
    }

    #[test]
    fn test_validate_missing_required() {
        let err = echo_tool().validate_args(&args("{}")).unwrap_err();
        assert!(err.to_string().contains("missing required parameter 'text'"));
    }

    #[test]
    fn test_validate_wrong_type() {
        let err = echo_tool().validate_args(&args(r#"{"text": 42}"#)).unwrap_err();
        assert!(err.to_string().contains("expected string"));
    }

    #[test]
    fn test_validate_unknown_parameter() {
        let err = echo_tool()
            .validate_args(&args(r#"{"text": "hi", "volume": 11}"#))
            .unwrap_err();
        assert!(err.to_string().contains("unknown parameter 'volume'"));
    }

    #[test]
    fn test_optional_parameter_may_be_absent() {
        let tool = Tool::new("t", "", Arc::new(EchoHandler)).with_parameter(
            "limit",
            "integer",
            "Max results",
            false,
        );
        assert!(tool.validate_args(&args("{}")).is_ok());
    }

    #[tokio::test]
    async fn test_call_success() {
        let result = echo_tool()
            .call(&args(r#"{"text": "hello"}"#), &ctx(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.output, "hello");
    }

    #[tokio::test]
    async fn test_call_timeout() {
        let tool = Tool::new("slow", "", Arc::new(SlowHandler))
            .with_timeout(Duration::from_millis(20));
        let err = tool.call(&args("{}"), &ctx(), Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_call_cancelled() {
        let tool = Tool::new("slow", "", Arc::new(SlowHandler));
        let context = ctx();
        let cancel = context.cancel.clone();
        let handle = tokio::spawn(async move {
            tool.call(&serde_json::Map::new(), &context, Duration::from_secs(60)).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
    }

    #[test]
    fn test_to_schema() {
        let schema = echo_tool().to_schema();
        assert!(schema.contains("Tool: echo"));
        assert!(schema.contains("text: string (required)"));
    }

    #[test]
    fn test_result_observation_rendering() {
        let result = ToolResult::success("Read a.txt", "contents here")
            .with_metadata("lines", Value::from(1));
        let rendered = result.to_observation();
        assert!(rendered.starts_with("Read a.txt"));
        assert!(rendered.contains("contents here"));

        let failed = ToolResult::from_error("Read b.txt", "file not found");
        let rendered = failed.to_observation();
        assert!(rendered.contains("ERROR: file not found"));
        assert!(!failed.is_success());
    }
}
