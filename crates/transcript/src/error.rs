use chat_contract::ChatError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranscriptError {
    #[error("no assistant entry is currently streaming")]
    NoActiveAssistant,

    #[error("tool result '{name}' has no open tool call to close")]
    UnmatchedToolResult { name: String },

    #[error("transcript index {index} is out of range for {len} entries")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("transcript entry {index} is not a user message")]
    NotUserMessage { index: usize },

    #[error("transcript has no user message")]
    NoUserMessage,
}

impl TranscriptError {
    #[must_use]
    pub fn unmatched_tool_result(name: impl Into<String>) -> Self {
        Self::UnmatchedToolResult { name: name.into() }
    }
}

impl From<TranscriptError> for ChatError {
    fn from(error: TranscriptError) -> Self {
        match error {
            TranscriptError::UnmatchedToolResult { .. } => {
                ChatError::stream_protocol(error.to_string())
            }
            other => ChatError::validation(other.to_string()),
        }
    }
}
