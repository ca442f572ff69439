//! Agent stream-json parsing.
//!
//! The agent prints one JSON object per line. `assistant` messages carry text
//! and tool_use content blocks; a trailing `result` message may repeat text
//! already seen. The parser turns these into progress output, dropping
//! repeats.

use std::collections::HashSet;

use serde_json::Value;

const BASH_DETAIL_CHARS: usize = 80;
const INPUT_DETAIL_CHARS: usize = 60;

/// Progress item extracted from one stream line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutput {
    Text(String),
    Tool { name: String, detail: String },
}

impl std::fmt::Display for StreamOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamOutput::Text(text) => f.write_str(text),
            StreamOutput::Tool { name, detail } => write!(f, "  [{}] {}", name, detail),
        }
    }
}

#[derive(Debug, Default)]
pub struct StreamParser {
    full_text: String,
    seen_tools: HashSet<String>,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one line; malformed or uninteresting lines yield nothing.
    pub fn parse_line(&mut self, line: &str) -> Vec<StreamOutput> {
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }
        let Ok(msg) = serde_json::from_str::<Value>(line) else {
            log::trace!("Skipping non-JSON agent output: {}", line);
            return Vec::new();
        };

        match msg.get("type").and_then(Value::as_str) {
            Some("assistant") => self.parse_assistant(&msg),
            Some("result") => self.parse_result(&msg),
            _ => Vec::new(),
        }
    }

    /// All text extracted so far
    pub fn text(&self) -> &str {
        &self.full_text
    }

    pub fn into_text(self) -> String {
        self.full_text
    }

    fn parse_assistant(&mut self, msg: &Value) -> Vec<StreamOutput> {
        let Some(blocks) = msg.pointer("/message/content").and_then(Value::as_array) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for block in blocks {
            match block.get("type").and_then(Value::as_str) {
                Some("tool_use") => {
                    let id = block.get("id").and_then(Value::as_str).unwrap_or_default();
                    if !self.seen_tools.insert(id.to_string()) {
                        continue;
                    }
                    let name = block.get("name").and_then(Value::as_str).unwrap_or("unknown");
                    let input = block.get("input").cloned().unwrap_or(Value::Null);
                    out.push(StreamOutput::Tool {
                        name: name.to_string(),
                        detail: tool_detail(name, &input),
                    });
                }
                Some("text") => out.extend(self.take_text(block)),
                _ => {}
            }
        }
        out
    }

    fn parse_result(&mut self, msg: &Value) -> Vec<StreamOutput> {
        let result = msg.get("result").or_else(|| msg.get("message"));
        let Some(blocks) = result
            .and_then(|r| r.get("content"))
            .and_then(Value::as_array)
        else {
            return Vec::new();
        };

        blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|b| self.take_text(b))
            .collect()
    }

    fn take_text(&mut self, block: &Value) -> Option<StreamOutput> {
        let text = block.get("text").and_then(Value::as_str)?;
        if text.is_empty() || self.full_text.contains(text) {
            return None;
        }
        self.full_text.push_str(text);
        Some(StreamOutput::Text(text.to_string()))
    }
}

/// One-line summary of a tool call's input
pub fn tool_detail(name: &str, input: &Value) -> String {
    let field = |key: &str| input.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
    match name {
        "Read" => field("file_path"),
        "Grep" => {
            let path = input.get("path").and_then(Value::as_str).unwrap_or(".");
            format!("pattern='{}' in {}", field("pattern"), path)
        }
        "Glob" => field("pattern"),
        "Bash" => truncate(&field("command"), BASH_DETAIL_CHARS),
        "Task" => field("description"),
        _ => match input.get("description").and_then(Value::as_str) {
            Some(description) => description.to_string(),
            None => truncate(&input.to_string(), INPUT_DETAIL_CHARS),
        },
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
