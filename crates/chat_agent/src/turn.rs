//! Per-turn state machine folding streamed frames into a transcript.
//!
//! A turn moves `Idle -> Streaming -> {Completed | Errored | Aborted}` and
//! never skips `Streaming`. The folder only touches the trailing assistant
//! entry it created, so earlier transcript entries are never rewritten.

use chat_contract::{ChatError, TurnFrame};
use tracing::{debug, warn};
use transcript::{Completion, ToolResultMatch, Transcript};

/// Appended to the assistant text when the caller aborts a turn.
pub const CANCELLED_MARKER: &str = "\n\n[cancelled]";
/// Error notice for a channel that closed without `done` or `error`.
pub const STREAM_ENDED_UNEXPECTEDLY: &str = "stream ended unexpectedly";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Streaming,
    Completed,
    Errored,
    Aborted,
}

impl TurnState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Aborted)
    }
}

/// Metadata reported by the `done` frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnUsage {
    pub message_id: Option<String>,
    pub tool_calls_count: u32,
    pub response_time_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub state: TurnState,
    pub session_id: Option<String>,
    pub is_new_session: bool,
    pub usage: Option<TurnUsage>,
    pub error: Option<String>,
    /// Frames dropped as protocol diagnostics during the turn.
    pub dropped_frames: usize,
}

/// Whether the folder wants more frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fold {
    Continue,
    Finished,
}

#[derive(Debug)]
pub struct TurnFolder {
    state: TurnState,
    session_id: Option<String>,
    session_bound: bool,
    is_new_session: bool,
    usage: Option<TurnUsage>,
    error: Option<String>,
    dropped_frames: usize,
}

impl TurnFolder {
    /// `session_id` is the id the turn was opened with, if any. Without one,
    /// content frames are only trusted after the `session` frame binds it.
    #[must_use]
    pub fn new(session_id: Option<String>) -> Self {
        Self {
            state: TurnState::Idle,
            session_bound: session_id.is_some(),
            session_id,
            is_new_session: false,
            usage: None,
            error: None,
            dropped_frames: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> TurnState {
        self.state
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Appends the user entry and the streaming placeholder.
    pub fn begin(
        &mut self,
        transcript: &mut Transcript,
        message: &str,
        model_name: Option<String>,
    ) -> Result<(), ChatError> {
        if self.state != TurnState::Idle {
            return Err(ChatError::validation("turn has already started"));
        }
        if transcript.is_streaming() {
            return Err(ChatError::validation(
                "another turn is still streaming in this session",
            ));
        }

        transcript.push_user(message);
        transcript.push_assistant_placeholder(model_name);
        self.state = TurnState::Streaming;
        Ok(())
    }

    pub fn apply(&mut self, transcript: &mut Transcript, frame: TurnFrame) -> Fold {
        if self.state != TurnState::Streaming {
            debug!(tag = frame.tag(), state = ?self.state, "frame after turn ended ignored");
            return Fold::Finished;
        }

        match frame {
            TurnFrame::Session { session_id, is_new } => {
                if let Some(current) = self.session_id.as_deref() {
                    if current != session_id {
                        warn!(expected = current, received = %session_id, "session frame rebound the turn");
                    }
                }
                debug!(session_id = %session_id, is_new, "turn bound to session");
                self.session_id = Some(session_id);
                self.session_bound = true;
                self.is_new_session = is_new;
                Fold::Continue
            }
            TurnFrame::Done {
                session_id,
                message_id,
                tool_calls_count,
                response_time_ms,
            } => {
                if self.session_id.is_none() {
                    self.session_id = session_id;
                }
                let completion = Completion {
                    message_id: message_id.clone(),
                    response_time_ms,
                };
                match transcript.complete(completion) {
                    Ok(0) => {}
                    Ok(closed) => warn!(closed, "tool calls still open at done were closed"),
                    Err(error) => warn!(%error, "done frame without an active entry"),
                }
                self.usage = Some(TurnUsage {
                    message_id,
                    tool_calls_count,
                    response_time_ms,
                });
                self.state = TurnState::Completed;
                Fold::Finished
            }
            TurnFrame::Error { message } => {
                self.fail(transcript, message);
                Fold::Finished
            }
            frame if !self.session_bound => {
                self.drop_frame(&ChatError::stream_protocol(format!(
                    "'{}' frame arrived before the session frame",
                    frame.tag()
                )));
                Fold::Continue
            }
            TurnFrame::ToolCall { name, args, round } => {
                if let Err(error) = transcript.open_tool_call(name, args, round) {
                    self.drop_frame(&error.into());
                }
                Fold::Continue
            }
            TurnFrame::ToolResult { name, result } => {
                match transcript.close_tool_call(&name, result) {
                    Ok(ToolResultMatch::ByName) => {}
                    Ok(ToolResultMatch::MostRecentOpen) => {
                        debug!(tool = %name, "tool result closed the most recent open call");
                    }
                    Err(error) => self.drop_frame(&error.into()),
                }
                Fold::Continue
            }
            TurnFrame::Token { content } => {
                if let Err(error) = transcript.append_text(&content) {
                    self.drop_frame(&error.into());
                }
                Fold::Continue
            }
        }
    }

    /// Records a frame that could not be folded. The turn keeps streaming.
    pub fn drop_frame(&mut self, error: &ChatError) {
        self.dropped_frames += 1;
        warn!(%error, dropped = self.dropped_frames, "stream frame dropped");
    }

    /// `Streaming -> Errored`. Partial text stays visible with `notice`.
    pub fn fail(&mut self, transcript: &mut Transcript, notice: impl Into<String>) {
        if self.state != TurnState::Streaming {
            return;
        }
        let notice = notice.into();
        if let Err(error) = transcript.fail(notice.clone()) {
            warn!(%error, "failed turn had no active entry");
        }
        self.error = Some(notice);
        self.state = TurnState::Errored;
    }

    /// `Streaming -> Aborted`. Frames after this are ignored.
    pub fn abort(&mut self, transcript: &mut Transcript) {
        if self.state != TurnState::Streaming {
            return;
        }
        if let Err(error) = transcript.cancel(CANCELLED_MARKER) {
            warn!(%error, "aborted turn had no active entry");
        }
        self.state = TurnState::Aborted;
    }

    /// The channel closed. Without a terminal frame this is an error.
    pub fn channel_closed(&mut self, transcript: &mut Transcript) {
        if self.state == TurnState::Streaming {
            self.fail(transcript, STREAM_ENDED_UNEXPECTEDLY);
        }
    }

    #[must_use]
    pub fn outcome(&self) -> TurnOutcome {
        TurnOutcome {
            state: self.state,
            session_id: self.session_id.clone(),
            is_new_session: self.is_new_session,
            usage: self.usage.clone(),
            error: self.error.clone(),
            dropped_frames: self.dropped_frames,
        }
    }
}
