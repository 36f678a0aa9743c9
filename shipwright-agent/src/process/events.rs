//! Code-generation tool event stream
//!
//! The tool writes one JSON object per stdout line. Only the shapes below are
//! interpreted; anything else decodes as [`CoderEvent::Other`].

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoderEvent {
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        model: Option<String>,
    },
    Assistant {
        message: AssistantMessage,
    },
    ToolCall {
        subtype: ToolCallPhase,
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        tool_call: Value,
    },
    Result {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        duration_ms: Option<u64>,
        #[serde(default)]
        result: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

impl AssistantMessage {
    /// Concatenated text parts
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::Other => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallPhase {
    Started,
    Completed,
    #[serde(other)]
    Other,
}

/// What a tool call does, as far as logging cares
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolKind {
    Write,
    Read,
    Other(String),
}

/// The interesting parts of a `tool_call` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub kind: ToolKind,
    pub path: Option<String>,
    /// Text written (write calls) or read back (read calls)
    pub content: Option<String>,
    pub lines: Option<u64>,
    pub bytes: Option<u64>,
}

impl ToolInvocation {
    /// Interpret a `tool_call` object such as
    /// `{"writeToolCall": {"args": {...}, "result": {"success": {...}}}}`
    pub fn from_payload(payload: &Value) -> Self {
        let Some((key, body)) = payload.as_object().and_then(|obj| obj.iter().next()) else {
            return Self::other("unknown");
        };

        let args = body.get("args");
        let success = body.get("result").and_then(|r| r.get("success"));
        let path = args
            .and_then(|a| a.get("path"))
            .and_then(Value::as_str)
            .map(str::to_string);

        match key.as_str() {
            "writeToolCall" => {
                let content = args
                    .and_then(|a| a.get("fileText").or_else(|| a.get("contents")))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let lines = success
                    .and_then(|s| s.get("linesCreated"))
                    .and_then(Value::as_u64)
                    .or_else(|| content.as_deref().map(count_lines));
                let bytes = success
                    .and_then(|s| s.get("fileSize"))
                    .and_then(Value::as_u64)
                    .or_else(|| content.as_ref().map(|c| c.len() as u64));
                Self {
                    kind: ToolKind::Write,
                    path,
                    content,
                    lines,
                    bytes,
                }
            }
            "readToolCall" => {
                let content = success
                    .and_then(|s| s.get("content"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let lines = success
                    .and_then(|s| s.get("totalLines"))
                    .and_then(Value::as_u64)
                    .or_else(|| content.as_deref().map(count_lines));
                let bytes = content.as_ref().map(|c| c.len() as u64);
                Self {
                    kind: ToolKind::Read,
                    path,
                    content,
                    lines,
                    bytes,
                }
            }
            other => Self {
                path,
                ..Self::other(other.trim_end_matches("ToolCall"))
            },
        }
    }

    fn other(name: &str) -> Self {
        Self {
            kind: ToolKind::Other(name.to_string()),
            path: None,
            content: None,
            lines: None,
            bytes: None,
        }
    }
}

fn count_lines(text: &str) -> u64 {
    text.lines().count() as u64
}
