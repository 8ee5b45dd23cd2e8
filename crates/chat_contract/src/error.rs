use std::fmt;

use thiserror::Error;

/// Kind of resource referenced by a [`ChatError::NotFound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Agent,
    Skill,
    Tool,
    Binding,
    Session,
    Message,
}

impl ResourceKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Skill => "skill",
            Self::Tool => "tool",
            Self::Binding => "binding",
            Self::Session => "session",
            Self::Message => "message",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared error taxonomy surfaced by every store, transport and core operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Malformed or insufficient input; the caller can correct it and retry.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} '{id}' not found")]
    NotFound { kind: ResourceKind, id: String },

    /// Concurrent edit detected by the store; the caller should reload.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// Unrecognized or malformed stream frame. Logged and dropped by consumers.
    #[error("stream protocol error: {0}")]
    StreamProtocol(String),
}

impl ChatError {
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    #[must_use]
    pub fn not_found(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    #[must_use]
    pub fn stream_protocol(message: impl Into<String>) -> Self {
        Self::StreamProtocol(message.into())
    }

    /// Returns true when retrying the same call may succeed without changing input.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
