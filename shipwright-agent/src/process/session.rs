//! Running state of one tool session
//!
//! Turns decoded events into the log lines worth showing a user and keeps
//! the totals reported in the final summary.

use std::time::{Duration, Instant};

use shipwright_core::domain::log::LogLevel;

use super::events::{CoderEvent, ToolCallPhase, ToolInvocation, ToolKind};

const PREVIEW_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileActionKind {
    Created,
    Read,
}

/// One file the tool touched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAction {
    pub path: String,
    pub kind: FileActionKind,
    pub lines: u64,
    pub bytes: u64,
    pub preview: String,
}

/// Final outcome reported by the tool's `result` event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub is_error: bool,
    pub message: Option<String>,
}

#[derive(Debug)]
pub struct SessionState {
    started: Instant,
    model: Option<String>,
    text: String,
    tool_calls: u64,
    files: Vec<FileAction>,
    result: Option<ToolResult>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            model: None,
            text: String::new(),
            tool_calls: 0,
            files: Vec::new(),
            result: None,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tool_calls(&self) -> u64 {
        self.tool_calls
    }

    pub fn files(&self) -> &[FileAction] {
        &self.files
    }

    pub fn result(&self) -> Option<&ToolResult> {
        self.result.as_ref()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Lines generated across every file the tool created
    pub fn lines_generated(&self) -> u64 {
        self.files
            .iter()
            .filter(|f| f.kind == FileActionKind::Created)
            .map(|f| f.lines)
            .sum()
    }

    /// Fold one event into the state, returning the log lines it produced
    pub fn apply(&mut self, event: CoderEvent) -> Vec<(LogLevel, String)> {
        match event {
            CoderEvent::System { model, .. } => match model {
                Some(model) if self.model.as_deref() != Some(model.as_str()) => {
                    let line = format!("Using model {}", model);
                    self.model = Some(model);
                    vec![(LogLevel::Info, line)]
                }
                _ => Vec::new(),
            },
            CoderEvent::Assistant { message } => {
                self.text.push_str(&message.text());
                Vec::new()
            }
            CoderEvent::ToolCall {
                subtype, tool_call, ..
            } => {
                let call = ToolInvocation::from_payload(&tool_call);
                match subtype {
                    ToolCallPhase::Started => {
                        self.tool_calls += 1;
                        vec![(LogLevel::Info, self.describe_start(&call))]
                    }
                    ToolCallPhase::Completed => self.complete(call),
                    ToolCallPhase::Other => Vec::new(),
                }
            }
            CoderEvent::Result {
                is_error, result, ..
            } => {
                self.result = Some(ToolResult {
                    is_error,
                    message: result.clone(),
                });
                if is_error {
                    let detail = result.unwrap_or_else(|| "no details".to_string());
                    vec![(LogLevel::Error, format!("Tool reported an error: {}", detail))]
                } else {
                    Vec::new()
                }
            }
            CoderEvent::Other => Vec::new(),
        }
    }

    fn describe_start(&self, call: &ToolInvocation) -> String {
        let n = self.tool_calls;
        let path = call.path.as_deref().unwrap_or("?");
        match &call.kind {
            ToolKind::Write => format!("#{} Writing {}", n, path),
            ToolKind::Read => format!("#{} Reading {}", n, path),
            ToolKind::Other(name) => format!("#{} Running tool {}", n, name),
        }
    }

    fn complete(&mut self, call: ToolInvocation) -> Vec<(LogLevel, String)> {
        let kind = match call.kind {
            ToolKind::Write => FileActionKind::Created,
            ToolKind::Read => FileActionKind::Read,
            ToolKind::Other(name) => {
                return vec![(LogLevel::Debug, format!("Tool {} completed", name))];
            }
        };

        let action = FileAction {
            path: call.path.unwrap_or_else(|| "?".to_string()),
            kind,
            lines: call.lines.unwrap_or(0),
            bytes: call.bytes.unwrap_or(0),
            preview: preview(call.content.as_deref().unwrap_or("")),
        };

        let verb = match kind {
            FileActionKind::Created => "Wrote",
            FileActionKind::Read => "Read",
        };
        let mut line = format!(
            "{} {} ({} lines, {} bytes)",
            verb, action.path, action.lines, action.bytes
        );
        if !action.preview.is_empty() {
            line.push_str(&format!(": {}", action.preview));
        }

        let level = match kind {
            FileActionKind::Created => LogLevel::Success,
            FileActionKind::Read => LogLevel::Info,
        };
        self.files.push(action);
        vec![(level, line)]
    }

    /// One-line summary for the end of the run
    pub fn summary(&self) -> String {
        let touched: std::collections::BTreeSet<&str> =
            self.files.iter().map(|f| f.path.as_str()).collect();
        format!(
            "Finished in {:.1}s: {} file(s) touched, {} line(s) generated, {} tool call(s)",
            self.elapsed().as_secs_f64(),
            touched.len(),
            self.lines_generated(),
            self.tool_calls
        )
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// First line of `content`, shortened for display
fn preview(content: &str) -> String {
    let first = content.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    if first.chars().count() > PREVIEW_CHARS {
        let cut: String = first.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", cut)
    } else {
        first.to_string()
    }
}
