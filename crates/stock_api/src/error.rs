use chat_contract::{ChatError, ResourceKind};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status} {message}")]
    Status { status: StatusCode, message: String },

    #[error("failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(
        "retry exhausted after max attempts (status: {}, last_error: {last_error:?})",
        status_label(.status)
    )]
    RetryExhausted {
        status: Option<StatusCode>,
        last_error: Option<String>,
    },

    #[error("stream read failed: {0}")]
    StreamRead(String),
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::RetryExhausted { status, .. } => *status,
            _ => None,
        }
    }

    /// Maps onto the shared taxonomy. `resource` names what a 404 refers to.
    #[must_use]
    pub fn into_chat_error(self, resource: Option<(ResourceKind, &str)>) -> ChatError {
        match self {
            Self::Status { status, message } => match status.as_u16() {
                400 | 422 => ChatError::validation(message),
                404 => match resource {
                    Some((kind, id)) => ChatError::not_found(kind, id),
                    None => ChatError::transport(format!("HTTP 404 {message}")),
                },
                409 | 412 => ChatError::conflict(message),
                _ => ChatError::transport(format!("HTTP {status} {message}")),
            },
            Self::InvalidBaseUrl(_) | Self::InvalidHeader(_) => {
                ChatError::validation(self.to_string())
            }
            other => ChatError::transport(other.to_string()),
        }
    }
}

impl From<ApiError> for ChatError {
    fn from(error: ApiError) -> Self {
        error.into_chat_error(None)
    }
}

fn status_label(status: &Option<StatusCode>) -> String {
    status
        .map(|status| status.as_u16().to_string())
        .unwrap_or_else(|| "n/a".to_owned())
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<NestedError>,
}

#[derive(Debug, Default, Deserialize)]
struct NestedError {
    #[serde(default)]
    message: Option<String>,
}

/// Human-readable message from an error body: `detail`, then `message`, then
/// `error.message`, then the raw body, then the status reason.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    let reason = || {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    };

    let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) else {
        return if body.trim().is_empty() {
            reason()
        } else {
            body.trim().to_string()
        };
    };

    let detail = parsed.detail.and_then(|detail| match detail {
        serde_json::Value::String(text) => Some(text),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    });

    detail
        .or(parsed.message)
        .or_else(|| parsed.error.and_then(|error| error.message))
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                reason()
            } else {
                body.trim().to_string()
            }
        })
}
