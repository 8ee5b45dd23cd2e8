use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::ChatError;
use crate::model::{deserialize_id, deserialize_opt_id};

pub const TAG_SESSION: &str = "session";
pub const TAG_TOOL_CALL: &str = "tool_call";
pub const TAG_TOOL_RESULT: &str = "tool_result";
pub const TAG_TOKEN: &str = "token";
pub const TAG_DONE: &str = "done";
pub const TAG_ERROR: &str = "error";

/// One tagged unit of the streaming turn channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnFrame {
    Session {
        session_id: String,
        is_new: bool,
    },
    ToolCall {
        name: String,
        args: Value,
        round: u32,
    },
    ToolResult {
        name: String,
        result: String,
    },
    Token {
        content: String,
    },
    Done {
        session_id: Option<String>,
        message_id: Option<String>,
        tool_calls_count: u32,
        response_time_ms: Option<u64>,
    },
    Error {
        message: String,
    },
}

#[derive(Deserialize)]
struct SessionPayload {
    #[serde(deserialize_with = "deserialize_id")]
    session_id: String,
    #[serde(default)]
    is_new: bool,
}

#[derive(Deserialize)]
struct ToolCallPayload {
    name: String,
    #[serde(default)]
    args: Value,
    #[serde(default)]
    round: u32,
}

#[derive(Deserialize)]
struct ToolResultPayload {
    name: String,
    #[serde(default)]
    result: Value,
}

#[derive(Deserialize)]
struct TokenPayload {
    content: String,
}

#[derive(Deserialize)]
struct DonePayload {
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    session_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    message_id: Option<String>,
    #[serde(default)]
    tool_calls_count: u32,
    #[serde(default)]
    response_time_ms: Option<u64>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: Option<String>,
}

impl TurnFrame {
    /// Decodes one `event:` tag and its `data:` JSON text.
    pub fn decode(tag: &str, data: &str) -> Result<Self, ChatError> {
        let malformed = |error: serde_json::Error| {
            ChatError::stream_protocol(format!("malformed '{tag}' payload: {error}"))
        };

        let frame = match tag {
            TAG_SESSION => {
                let payload: SessionPayload = serde_json::from_str(data).map_err(malformed)?;
                Self::Session {
                    session_id: payload.session_id,
                    is_new: payload.is_new,
                }
            }
            TAG_TOOL_CALL => {
                let payload: ToolCallPayload = serde_json::from_str(data).map_err(malformed)?;
                Self::ToolCall {
                    name: payload.name,
                    args: normalize_args(payload.args),
                    round: payload.round,
                }
            }
            TAG_TOOL_RESULT => {
                let payload: ToolResultPayload = serde_json::from_str(data).map_err(malformed)?;
                Self::ToolResult {
                    name: payload.name,
                    result: result_text(payload.result),
                }
            }
            TAG_TOKEN => {
                let payload: TokenPayload = serde_json::from_str(data).map_err(malformed)?;
                Self::Token {
                    content: payload.content,
                }
            }
            TAG_DONE => {
                let payload: DonePayload = serde_json::from_str(data).map_err(malformed)?;
                Self::Done {
                    session_id: payload.session_id,
                    message_id: payload.message_id,
                    tool_calls_count: payload.tool_calls_count,
                    response_time_ms: payload.response_time_ms,
                }
            }
            TAG_ERROR => {
                let payload: ErrorPayload = serde_json::from_str(data).map_err(malformed)?;
                Self::Error {
                    message: payload
                        .message
                        .filter(|message| !message.trim().is_empty())
                        .unwrap_or_else(|| "unknown error".to_string()),
                }
            }
            unknown => {
                return Err(ChatError::stream_protocol(format!(
                    "unrecognized frame tag '{unknown}'"
                )))
            }
        };

        Ok(frame)
    }

    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Session { .. } => TAG_SESSION,
            Self::ToolCall { .. } => TAG_TOOL_CALL,
            Self::ToolResult { .. } => TAG_TOOL_RESULT,
            Self::Token { .. } => TAG_TOKEN,
            Self::Done { .. } => TAG_DONE,
            Self::Error { .. } => TAG_ERROR,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// JSON payload carried in the `data:` line.
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            Self::Session { session_id, is_new } => {
                json!({ "session_id": session_id, "is_new": is_new })
            }
            Self::ToolCall { name, args, round } => {
                json!({ "name": name, "args": args, "round": round })
            }
            Self::ToolResult { name, result } => json!({ "name": name, "result": result }),
            Self::Token { content } => json!({ "content": content }),
            Self::Done {
                session_id,
                message_id,
                tool_calls_count,
                response_time_ms,
            } => json!({
                "session_id": session_id,
                "message_id": message_id,
                "tool_calls_count": tool_calls_count,
                "response_time_ms": response_time_ms,
            }),
            Self::Error { message } => json!({ "message": message }),
        }
    }

    /// Renders the frame as `event:`/`data:` lines terminated by a blank line.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.tag(), self.payload())
    }
}

/// Arguments arrive as an object or as JSON text; anything unusable becomes `{}`.
#[must_use]
pub fn normalize_args(args: Value) -> Value {
    match args {
        Value::Object(_) => args,
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(parsed @ Value::Object(_)) => parsed,
            _ => Value::Object(Map::new()),
        },
        _ => Value::Object(Map::new()),
    }
}

fn result_text(result: Value) -> String {
    match result {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
