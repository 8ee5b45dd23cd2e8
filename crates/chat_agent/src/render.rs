//! Plain-text rendering of transcripts for the terminal chat loop.

use std::fmt::Write as _;

use serde_json::Value;
use transcript::{DisplayMessage, ToolCallRecord};

/// Incremental printer for the assistant entry of the turn in flight.
///
/// Each call to [`TranscriptPrinter::observe`] returns only what changed since
/// the previous call, so text already written is never repeated.
#[derive(Debug, Default)]
pub struct TranscriptPrinter {
    entry: Option<usize>,
    printed_bytes: usize,
    announced_calls: usize,
    closed_calls: Vec<bool>,
    finished: bool,
}

impl TranscriptPrinter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts following the trailing assistant entry once it is streaming.
    pub fn observe(&mut self, entries: &[DisplayMessage]) -> String {
        if self.entry.is_none() {
            match entries.last() {
                Some(last) if last.is_assistant() && last.streaming => {
                    self.entry = Some(entries.len() - 1);
                }
                _ => return String::new(),
            }
        }
        self.render_tracked(entries)
    }

    /// Flushes the rest of the turn. Falls back to the trailing assistant
    /// entry when the turn ended before it was ever observed streaming.
    pub fn finish(&mut self, entries: &[DisplayMessage]) -> String {
        if self.entry.is_none() {
            self.entry = entries
                .last()
                .filter(|last| last.is_assistant())
                .map(|_| entries.len() - 1);
        }
        self.render_tracked(entries)
    }

    fn render_tracked(&mut self, entries: &[DisplayMessage]) -> String {
        let mut out = String::new();
        let Some(entry) = self.entry.and_then(|index| entries.get(index)) else {
            return out;
        };
        if self.finished {
            return out;
        }

        for (position, call) in entry.tool_calls.iter().enumerate() {
            if position >= self.announced_calls {
                let _ = writeln!(out, "\n  -> {}({})", call.name, compact_args(&call.args));
                self.announced_calls += 1;
                self.closed_calls.push(false);
            }
            if !call.is_calling() && !self.closed_calls[position] {
                self.closed_calls[position] = true;
                if let Some(result) = &call.result {
                    let _ = writeln!(out, "  <- {}: {}", call.name, first_line(result));
                }
            }
        }

        if let Some(fresh) = entry.content.get(self.printed_bytes..) {
            out.push_str(fresh);
            self.printed_bytes = entry.content.len();
        }

        if !entry.streaming {
            self.finished = true;
            if let Some(error) = &entry.error {
                let _ = write!(out, "\n[error] {error}");
            }
            out.push('\n');
        }
        out
    }
}

/// Full rendering of one entry, used when printing a resumed session.
#[must_use]
pub fn format_entry(index: usize, entry: &DisplayMessage) -> String {
    let mut out = String::new();
    if entry.is_user() {
        let _ = write!(out, "[{index}] you: {}", entry.content);
        return out;
    }

    let _ = write!(out, "[{index}] assistant");
    match (&entry.model_name, entry.response_time_ms) {
        (Some(model), Some(ms)) => {
            let _ = write!(out, " ({model}, {ms} ms)");
        }
        (Some(model), None) => {
            let _ = write!(out, " ({model})");
        }
        (None, Some(ms)) => {
            let _ = write!(out, " ({ms} ms)");
        }
        (None, None) => {}
    }
    out.push(':');
    for call in &entry.tool_calls {
        let _ = write!(out, "\n  -> {}", format_call(call));
    }
    if !entry.content.is_empty() {
        let _ = write!(out, "\n{}", entry.content);
    }
    if let Some(error) = &entry.error {
        let _ = write!(out, "\n[error] {error}");
    }
    out
}

fn format_call(call: &ToolCallRecord) -> String {
    match &call.result {
        Some(result) => format!(
            "{}({}) = {}",
            call.name,
            compact_args(&call.args),
            first_line(result)
        ),
        None => format!("{}({})", call.name, compact_args(&call.args)),
    }
}

fn compact_args(args: &Value) -> String {
    match args {
        Value::Object(map) if map.is_empty() => String::new(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
