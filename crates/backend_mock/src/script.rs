use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chat_contract::{ChatError, FrameStream, TurnFrame, TurnRequest, TurnTransport};
use futures_util::stream::{self, StreamExt};
use serde_json::Value;

use crate::lock_unpoisoned;

/// One step of a scripted turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    Frame(TurnFrame),
    /// Yields a `StreamProtocol` error, as a parser would for a bad frame.
    Malformed(String),
    Delay(Duration),
    /// Yields the error and closes the channel.
    Fail(ChatError),
    /// Never yields again. Used to exercise abort and caller timeouts.
    Hang,
}

impl ScriptStep {
    pub fn session(session_id: &str, is_new: bool) -> Self {
        Self::Frame(TurnFrame::Session {
            session_id: session_id.to_string(),
            is_new,
        })
    }

    pub fn token(content: &str) -> Self {
        Self::Frame(TurnFrame::Token {
            content: content.to_string(),
        })
    }

    pub fn tool_call(name: &str, args: Value, round: u32) -> Self {
        Self::Frame(TurnFrame::ToolCall {
            name: name.to_string(),
            args,
            round,
        })
    }

    pub fn tool_result(name: &str, result: &str) -> Self {
        Self::Frame(TurnFrame::ToolResult {
            name: name.to_string(),
            result: result.to_string(),
        })
    }

    pub fn done(session_id: &str, message_id: &str, tool_calls_count: u32) -> Self {
        Self::Frame(TurnFrame::Done {
            session_id: Some(session_id.to_string()),
            message_id: Some(message_id.to_string()),
            tool_calls_count,
            response_time_ms: Some(42),
        })
    }

    pub fn error(message: &str) -> Self {
        Self::Frame(TurnFrame::Error {
            message: message.to_string(),
        })
    }

    pub fn delay_ms(ms: u64) -> Self {
        Self::Delay(Duration::from_millis(ms))
    }
}

/// Turn transport that replays queued scripts, one per opened turn.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Result<Vec<ScriptStep>, ChatError>>>,
    requests: Mutex<Vec<TurnRequest>>,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_turn(&self, steps: Vec<ScriptStep>) {
        lock_unpoisoned(&self.scripts).push_back(Ok(steps));
    }

    /// The next `open_turn` fails before any frame is produced.
    pub fn push_open_failure(&self, error: ChatError) {
        lock_unpoisoned(&self.scripts).push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<TurnRequest> {
        lock_unpoisoned(&self.requests).clone()
    }

    pub fn pending_turns(&self) -> usize {
        lock_unpoisoned(&self.scripts).len()
    }
}

#[async_trait]
impl TurnTransport for ScriptedTransport {
    async fn open_turn(&self, request: TurnRequest) -> Result<FrameStream, ChatError> {
        lock_unpoisoned(&self.requests).push(request);
        let script = lock_unpoisoned(&self.scripts)
            .pop_front()
            .unwrap_or_else(|| Err(ChatError::transport("no scripted turn queued")))?;
        Ok(script_stream(script))
    }
}

/// Plays steps in order as a frame stream.
pub fn script_stream(steps: Vec<ScriptStep>) -> FrameStream {
    stream::unfold(steps.into_iter(), |mut steps| async move {
        loop {
            match steps.next()? {
                ScriptStep::Frame(frame) => return Some((Ok(frame), steps)),
                ScriptStep::Malformed(message) => {
                    return Some((Err(ChatError::stream_protocol(message)), steps))
                }
                ScriptStep::Delay(duration) => tokio::time::sleep(duration).await,
                ScriptStep::Fail(error) => return Some((Err(error), Vec::new().into_iter())),
                ScriptStep::Hang => futures_util::future::pending::<()>().await,
            }
        }
    })
    .boxed()
}
