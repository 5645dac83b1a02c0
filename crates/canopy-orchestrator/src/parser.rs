//! Parser for model text output.
//!
//! Converts the free-form text of a single model turn into exactly one typed
//! [`Action`]. The grammar is line-oriented with labeled fields: a `Thought:`
//! line, an `Action:` line naming the variant, and action-specific fields.
//! Labels are case-insensitive; values run until the next recognized label or
//! the end of the text.

use regex::Regex;
use std::fmt::Write as _;
use std::sync::OnceLock;
use thiserror::Error;

use crate::schemas::{Action, SubagentSpec};

/// Raised when model output cannot be parsed into an action.
///
/// The display form is written to be fed back to the model verbatim, so each
/// variant names the offending field and shows a short snippet where useful.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// No `Action:` line was found.
    #[error("Could not find 'Action:' in output")]
    MissingAction,

    /// The action tag is not one of the known variants.
    #[error(
        "Invalid action type: '{0}'. Must be 'tool', 'launch_subagents', \
         'wait_for_subagents', 'wait', 'send_message', or 'finish'"
    )]
    InvalidActionType(String),

    /// A required field for the action is absent.
    #[error("{action} action requires '{field}:' field")]
    MissingField {
        /// The action being parsed.
        action: &'static str,
        /// The missing field label.
        field: &'static str,
    },

    /// A field's value failed to parse as JSON.
    #[error("Invalid JSON in '{field}:': {reason} (near: {snippet})")]
    InvalidJson {
        /// The field whose value was malformed.
        field: &'static str,
        /// The underlying JSON error.
        reason: String,
        /// A short excerpt of the offending value.
        snippet: String,
    },

    /// `Agents:` and `Tasks:` lists have different lengths.
    #[error(
        "Agents and Tasks lists must have the same length \
         (got {agents} agents and {tasks} tasks)"
    )]
    LengthMismatch {
        /// Number of agent names parsed.
        agents: usize,
        /// Number of tasks parsed.
        tasks: usize,
    },

    /// `launch_subagents` with an empty agents list.
    #[error("Cannot launch zero subagents")]
    EmptyLaunch,
}

/// Field labels the parser recognizes; anything else at line start is part of
/// the preceding value.
const LABELS: &str = "thought|action|tool|arguments|agents|tasks|to|recipient|content|message|response";

fn label_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"(?mi)^[ \t]*({LABELS})[ \t]*:")).expect("static pattern compiles")
    })
}

fn snippet(value: &str) -> String {
    let trimmed = value.trim();
    let mut out: String = trimmed.chars().take(80).collect();
    if trimmed.chars().count() > 80 {
        out.push('…');
    }
    out
}

/// Parses model text output into [`Action`] values.
pub struct OutputParser;

impl OutputParser {
    /// Returns the format instruction to include in system prompts.
    #[must_use]
    pub fn format_instruction() -> &'static str {
        r#"You must format your response EXACTLY as follows:

For using a tool:
Thought: <your reasoning>
Action: tool
Tool: <tool_name>
Arguments: <JSON object of arguments>

For launching subagents (can launch multiple at once):
Thought: <your reasoning>
Action: launch_subagents
Agents: ["agent_name_1", "agent_name_2"]
Tasks: ["task_1", "task_2"]

For waiting on your launched subagents:
Thought: <your reasoning>
Action: wait_for_subagents

For sending a message to another agent:
Thought: <your reasoning>
Action: send_message
To: <agent_id>
Content: <your message>

For waiting until any message arrives:
Thought: <your reasoning>
Action: wait

For finishing:
Thought: <your reasoning>
Action: finish
Content: <your final answer>

IMPORTANT: When you receive a message starting with "[TOOL RESULT from <tool_name>]",
this is the output from a tool you called, NOT a user message. Trust this result and
use it to continue your task. Do not ask the user about it or try to verify it again."#
    }

    /// Parses one model turn into an action.
    ///
    /// # Arguments
    /// * `text` - Raw text output from the model
    ///
    /// # Errors
    /// Returns a [`ParseError`] whose display form is suitable for feeding
    /// back to the model.
    pub fn parse(text: &str) -> Result<Action, ParseError> {
        let fields = Fields::scan(text);

        let action_value = fields.get("action").ok_or(ParseError::MissingAction)?;
        let action_type = action_value
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_lowercase();

        let thought = fields.get("thought").map(|t| t.trim().to_string()).filter(|t| !t.is_empty());

        match action_type.as_str() {
            "tool" => Self::parse_tool(&fields, thought),
            "launch_subagents" => Self::parse_launch_subagents(&fields, thought),
            "wait_for_subagents" => Ok(Action::WaitForSubagents { thought }),
            "wait" => Ok(Action::Wait { thought }),
            "send_message" => Self::parse_send_message(&fields, thought),
            "finish" => Self::parse_finish(&fields, thought),
            other => Err(ParseError::InvalidActionType(other.to_string())),
        }
    }

    fn parse_tool(fields: &Fields<'_>, thought: Option<String>) -> Result<Action, ParseError> {
        let name = fields
            .get("tool")
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or(ParseError::MissingField { action: "tool", field: "Tool" })?;

        let arguments = match fields.get("arguments") {
            Some(raw) => {
                let value: serde_json::Value =
                    serde_json::from_str(raw.trim()).map_err(|e| ParseError::InvalidJson {
                        field: "Arguments",
                        reason: e.to_string(),
                        snippet: snippet(raw),
                    })?;
                match value {
                    serde_json::Value::Object(map) => map,
                    _ => {
                        return Err(ParseError::InvalidJson {
                            field: "Arguments",
                            reason: "expected a JSON object".to_string(),
                            snippet: snippet(raw),
                        })
                    }
                }
            }
            None => serde_json::Map::new(),
        };

        Ok(Action::Tool { name: name.to_string(), arguments, thought })
    }

    fn parse_launch_subagents(
        fields: &Fields<'_>,
        thought: Option<String>,
    ) -> Result<Action, ParseError> {
        let agents_raw = fields
            .get("agents")
            .ok_or(ParseError::MissingField { action: "launch_subagents", field: "Agents" })?;
        let tasks_raw = fields
            .get("tasks")
            .ok_or(ParseError::MissingField { action: "launch_subagents", field: "Tasks" })?;

        let agents = Self::parse_string_list(agents_raw, "Agents")?;
        let tasks = Self::parse_string_list(tasks_raw, "Tasks")?;

        if agents.is_empty() {
            return Err(ParseError::EmptyLaunch);
        }
        if agents.len() != tasks.len() {
            return Err(ParseError::LengthMismatch { agents: agents.len(), tasks: tasks.len() });
        }

        let specs = agents
            .into_iter()
            .zip(tasks)
            .map(|(name, task)| SubagentSpec::new(name, task))
            .collect();

        Ok(Action::LaunchSubagents { specs, thought })
    }

    /// Parses a JSON string array, falling back to extracting quoted items
    /// when the model emits single quotes or otherwise loose list syntax.
    fn parse_string_list(raw: &str, field: &'static str) -> Result<Vec<String>, ParseError> {
        let trimmed = raw.trim();
        match serde_json::from_str::<Vec<String>>(trimmed) {
            Ok(items) => Ok(items),
            Err(json_err) => {
                static QUOTED: OnceLock<Regex> = OnceLock::new();
                let re = QUOTED
                    .get_or_init(|| Regex::new(r#""([^"]+)"|'([^']+)'"#).expect("static pattern"));
                let items: Vec<String> = re
                    .captures_iter(trimmed)
                    .filter_map(|c| c.get(1).or_else(|| c.get(2)))
                    .map(|m| m.as_str().to_string())
                    .collect();
                if items.is_empty() {
                    Err(ParseError::InvalidJson {
                        field,
                        reason: json_err.to_string(),
                        snippet: snippet(raw),
                    })
                } else {
                    Ok(items)
                }
            }
        }
    }

    fn parse_send_message(
        fields: &Fields<'_>,
        thought: Option<String>,
    ) -> Result<Action, ParseError> {
        let to = fields
            .get("to")
            .or_else(|| fields.get("recipient"))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ParseError::MissingField { action: "send_message", field: "To" })?;

        let content = fields
            .get("content")
            .or_else(|| fields.get("message"))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ParseError::MissingField { action: "send_message", field: "Content" })?;

        Ok(Action::SendMessage { to: to.to_string(), content: content.to_string(), thought })
    }

    fn parse_finish(fields: &Fields<'_>, thought: Option<String>) -> Result<Action, ParseError> {
        let content = fields
            .get("content")
            .or_else(|| fields.get("response"))
            .map(str::trim)
            .ok_or(ParseError::MissingField { action: "finish", field: "Content" })?;

        Ok(Action::Finish { content: content.to_string(), thought })
    }

    /// Renders an action back into the normalized wire form.
    ///
    /// Parsing the output of `render` yields an equal action for every value
    /// the parser itself can produce.
    #[must_use]
    pub fn render(action: &Action) -> String {
        let mut out = String::new();
        if let Some(thought) = action.thought() {
            let _ = writeln!(out, "Thought: {thought}");
        }
        let _ = writeln!(out, "Action: {}", action.kind());
        match action {
            Action::Tool { name, arguments, .. } => {
                let _ = writeln!(out, "Tool: {name}");
                let args = serde_json::Value::Object(arguments.clone());
                let _ = write!(out, "Arguments: {args}");
            }
            Action::LaunchSubagents { specs, .. } => {
                let agents: Vec<&str> = specs.iter().map(|s| s.subagent_name.as_str()).collect();
                let tasks: Vec<&str> = specs.iter().map(|s| s.task.as_str()).collect();
                let _ = writeln!(
                    out,
                    "Agents: {}",
                    serde_json::to_string(&agents).unwrap_or_default()
                );
                let _ = write!(out, "Tasks: {}", serde_json::to_string(&tasks).unwrap_or_default());
            }
            Action::SendMessage { to, content, .. } => {
                let _ = writeln!(out, "To: {to}");
                let _ = write!(out, "Content: {content}");
            }
            Action::Finish { content, .. } => {
                let _ = write!(out, "Content: {content}");
            }
            Action::Wait { .. } | Action::WaitForSubagents { .. } => {}
        }
        out.trim_end().to_string()
    }
}

/// Recognized labeled fields of one model turn, sliced out of the raw text.
struct Fields<'a> {
    entries: Vec<(String, &'a str)>,
}

impl<'a> Fields<'a> {
    /// Scans the text for recognized labels and slices each field's value up
    /// to the next recognized label or the end of text.
    fn scan(text: &'a str) -> Self {
        let matches: Vec<(String, usize, usize)> = label_regex()
            .captures_iter(text)
            .filter_map(|c| {
                let whole = c.get(0)?;
                let label = c.get(1)?.as_str().to_lowercase();
                Some((label, whole.start(), whole.end()))
            })
            .collect();

        let mut entries = Vec::with_capacity(matches.len());
        for (i, (label, _, value_start)) in matches.iter().enumerate() {
            let value_end = matches.get(i + 1).map_or(text.len(), |(_, start, _)| *start);
            entries.push((label.clone(), text[*value_start..value_end].trim()));
        }
        Self { entries }
    }

    /// Returns the first occurrence of a field by lowercase label.
    fn get(&self, label: &str) -> Option<&'a str> {
        self.entries.iter().find(|(l, _)| l == label).map(|(_, v)| *v)
    }
}
