use serde_json::Value;

use crate::display::{DisplayMessage, ToolCallRecord};
use crate::error::TranscriptError;

/// How a tool result found the record it closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolResultMatch {
    /// Most recent open call with the same name.
    ByName,
    /// No same-named call was open; the most recent open call was closed.
    MostRecentOpen,
}

/// Completion metadata attached when a turn ends with `done`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub message_id: Option<String>,
    pub response_time_ms: Option<u64>,
}

/// Ordered entries of one session.
///
/// Only the trailing assistant entry may change while it is streaming. Earlier
/// entries are never rewritten; they can only be dropped by truncation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    entries: Vec<DisplayMessage>,
}

impl Transcript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_entries(entries: Vec<DisplayMessage>) -> Self {
        Self { entries }
    }

    #[must_use]
    pub fn entries(&self) -> &[DisplayMessage] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&DisplayMessage> {
        self.entries.get(index)
    }

    #[must_use]
    pub fn last(&self) -> Option<&DisplayMessage> {
        self.entries.last()
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> usize {
        self.entries.push(DisplayMessage::user(content));
        self.entries.len() - 1
    }

    /// Appends an empty assistant entry marked streaming.
    pub fn push_assistant_placeholder(&mut self, model_name: Option<String>) -> usize {
        let mut placeholder = DisplayMessage::assistant(String::new());
        placeholder.model_name = model_name;
        placeholder.streaming = true;
        self.entries.push(placeholder);
        self.entries.len() - 1
    }

    #[must_use]
    pub fn active_assistant(&self) -> Option<&DisplayMessage> {
        self.entries
            .last()
            .filter(|entry| entry.is_assistant() && entry.streaming)
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.active_assistant().is_some()
    }

    fn active_mut(&mut self) -> Result<&mut DisplayMessage, TranscriptError> {
        self.entries
            .last_mut()
            .filter(|entry| entry.is_assistant() && entry.streaming)
            .ok_or(TranscriptError::NoActiveAssistant)
    }

    pub fn append_text(&mut self, text: &str) -> Result<(), TranscriptError> {
        self.active_mut()?.content.push_str(text);
        Ok(())
    }

    /// Appends a `calling` record to the active entry. Returns its position.
    pub fn open_tool_call(
        &mut self,
        name: impl Into<String>,
        args: Value,
        round: u32,
    ) -> Result<usize, TranscriptError> {
        let active = self.active_mut()?;
        active
            .tool_calls
            .push(ToolCallRecord::calling(name, args, round));
        Ok(active.tool_calls.len() - 1)
    }

    /// Closes the most recent open call named `name`, falling back to the most
    /// recent open call of any name.
    pub fn close_tool_call(
        &mut self,
        name: &str,
        result: impl Into<String>,
    ) -> Result<ToolResultMatch, TranscriptError> {
        let active = self.active_mut()?;

        let by_name = active
            .tool_calls
            .iter()
            .rposition(|record| record.is_calling() && record.name == name);
        let (position, matched) = match by_name {
            Some(position) => (position, ToolResultMatch::ByName),
            None => {
                let position = active
                    .tool_calls
                    .iter()
                    .rposition(ToolCallRecord::is_calling)
                    .ok_or_else(|| TranscriptError::unmatched_tool_result(name))?;
                (position, ToolResultMatch::MostRecentOpen)
            }
        };

        active.tool_calls[position].close(Some(result.into()));
        Ok(matched)
    }

    /// Ends streaming normally. Returns how many open calls were force-closed.
    pub fn complete(&mut self, completion: Completion) -> Result<usize, TranscriptError> {
        let active = self.active_mut()?;
        if completion.message_id.is_some() {
            active.id = completion.message_id;
        }
        active.response_time_ms = completion.response_time_ms;
        Ok(Self::stop_streaming(active))
    }

    /// Ends streaming with a visible error notice. Partial text is kept.
    pub fn fail(&mut self, notice: impl Into<String>) -> Result<usize, TranscriptError> {
        let active = self.active_mut()?;
        active.error = Some(notice.into());
        Ok(Self::stop_streaming(active))
    }

    /// Ends streaming after a user abort, appending `marker` to the text.
    pub fn cancel(&mut self, marker: &str) -> Result<usize, TranscriptError> {
        let active = self.active_mut()?;
        active.content.push_str(marker);
        Ok(Self::stop_streaming(active))
    }

    fn stop_streaming(entry: &mut DisplayMessage) -> usize {
        entry.streaming = false;
        entry.close_open_tool_calls()
    }

    #[must_use]
    pub fn last_user_index(&self) -> Option<usize> {
        self.entries.iter().rposition(DisplayMessage::is_user)
    }

    /// Drops the user entry at `index` and everything after it, returning the
    /// removed entries. Used by regenerate and edit-and-regenerate.
    pub fn truncate_from_user(
        &mut self,
        index: usize,
    ) -> Result<Vec<DisplayMessage>, TranscriptError> {
        let entry = self
            .entries
            .get(index)
            .ok_or(TranscriptError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            })?;
        if !entry.is_user() {
            return Err(TranscriptError::NotUserMessage { index });
        }
        Ok(self.entries.split_off(index))
    }

    /// Swaps in a reconstructed transcript, e.g. after resuming a session.
    pub fn replace_all(&mut self, entries: Vec<DisplayMessage>) {
        self.entries = entries;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::display::ToolCallStatus;

    fn streaming_transcript() -> Transcript {
        let mut transcript = Transcript::new();
        transcript.push_user("AAPL price?");
        transcript.push_assistant_placeholder(Some("analyst".to_string()));
        transcript
    }

    #[test]
    fn placeholder_is_the_active_entry() {
        let transcript = streaming_transcript();
        let active = transcript.active_assistant().expect("active entry");
        assert!(active.streaming);
        assert_eq!(active.model_name.as_deref(), Some("analyst"));
    }

    #[test]
    fn mutations_require_an_active_entry() {
        let mut transcript = Transcript::new();
        transcript.push_user("hello");
        assert_eq!(
            transcript.append_text("x"),
            Err(TranscriptError::NoActiveAssistant)
        );
        assert_matches!(
            transcript.open_tool_call("get_quote", json!({}), 1),
            Err(TranscriptError::NoActiveAssistant)
        );
    }

    #[test]
    fn tool_result_closes_most_recent_same_named_call() {
        let mut transcript = streaming_transcript();
        transcript
            .open_tool_call("get_quote", json!({"symbol": "AAPL"}), 1)
            .expect("open");
        transcript
            .open_tool_call("get_quote", json!({"symbol": "MSFT"}), 1)
            .expect("open");

        assert_eq!(
            transcript.close_tool_call("get_quote", "410"),
            Ok(ToolResultMatch::ByName)
        );
        let calls = &transcript.active_assistant().expect("active").tool_calls;
        assert_eq!(calls[0].status, ToolCallStatus::Calling);
        assert_eq!(calls[1].status, ToolCallStatus::Done);
        assert_eq!(calls[1].result.as_deref(), Some("410"));
    }

    #[test]
    fn tool_result_falls_back_to_most_recent_open_call() {
        let mut transcript = streaming_transcript();
        transcript
            .open_tool_call("get_quote", json!({}), 1)
            .expect("open");
        transcript
            .open_tool_call("search_news", json!({}), 1)
            .expect("open");

        assert_eq!(
            transcript.close_tool_call("technical_analysis", "rsi 70"),
            Ok(ToolResultMatch::MostRecentOpen)
        );
        let calls = &transcript.active_assistant().expect("active").tool_calls;
        assert_eq!(calls[1].result.as_deref(), Some("rsi 70"));
        assert!(calls[0].is_calling());
    }

    #[test]
    fn tool_result_without_open_call_is_rejected() {
        let mut transcript = streaming_transcript();
        transcript
            .open_tool_call("get_quote", json!({}), 1)
            .expect("open");
        transcript
            .close_tool_call("get_quote", "1")
            .expect("first close");

        assert_eq!(
            transcript.close_tool_call("get_quote", "2"),
            Err(TranscriptError::unmatched_tool_result("get_quote"))
        );
        let calls = &transcript.active_assistant().expect("active").tool_calls;
        assert_eq!(calls[0].result.as_deref(), Some("1"));
    }

    #[test]
    fn every_terminal_transition_closes_open_calls() {
        for end in 0..3 {
            let mut transcript = streaming_transcript();
            transcript
                .open_tool_call("get_quote", json!({}), 1)
                .expect("open");
            let closed = match end {
                0 => transcript.complete(Completion::default()),
                1 => transcript.fail("quota exceeded"),
                _ => transcript.cancel(" [cancelled]"),
            }
            .expect("terminal transition");

            assert_eq!(closed, 1);
            let last = transcript.last().expect("entry");
            assert!(!last.streaming);
            assert_eq!(last.open_tool_calls(), 0);
            assert!(!transcript.is_streaming());
        }
    }

    #[test]
    fn complete_attaches_metadata() {
        let mut transcript = streaming_transcript();
        transcript.append_text("Price is 123").expect("append");
        transcript
            .complete(Completion {
                message_id: Some("m7".to_string()),
                response_time_ms: Some(850),
            })
            .expect("complete");

        let last = transcript.last().expect("entry");
        assert_eq!(last.id.as_deref(), Some("m7"));
        assert_eq!(last.response_time_ms, Some(850));
        assert_eq!(last.content, "Price is 123");
    }

    #[test]
    fn fail_keeps_partial_text() {
        let mut transcript = streaming_transcript();
        transcript.append_text("Partial").expect("append");
        transcript.fail("upstream timeout").expect("fail");

        let last = transcript.last().expect("entry");
        assert_eq!(last.content, "Partial");
        assert_eq!(last.error.as_deref(), Some("upstream timeout"));
    }

    #[test]
    fn truncate_from_user_drops_the_turn() {
        let mut transcript = Transcript::new();
        transcript.push_user("first");
        transcript.push_assistant_placeholder(None);
        transcript.complete(Completion::default()).expect("complete");
        transcript.push_user("second");
        transcript.push_assistant_placeholder(None);
        transcript.complete(Completion::default()).expect("complete");

        let index = transcript.last_user_index().expect("user entry");
        assert_eq!(index, 2);
        let removed = transcript.truncate_from_user(index).expect("truncate");
        assert_eq!(removed.len(), 2);
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.entries()[0].content, "first");

        assert_eq!(
            transcript.truncate_from_user(1),
            Err(TranscriptError::NotUserMessage { index: 1 })
        );
        assert_eq!(
            transcript.truncate_from_user(5),
            Err(TranscriptError::IndexOutOfRange { index: 5, len: 2 })
        );
    }
}
