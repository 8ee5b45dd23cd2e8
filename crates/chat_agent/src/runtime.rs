use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chat_contract::{ChatError, ChatSession, MessageRole, SessionStore, TurnRequest, TurnTransport};
use futures_util::StreamExt;
use tokio::time::Instant;
use tracing::{debug, warn};
use transcript::{reconstruct, Transcript, TranscriptError};

use crate::backend::Backend;
use crate::turn::{Fold, TurnFolder, TurnOutcome, CANCELLED_MARKER};

pub type TurnId = u64;
pub type CancellationSignal = Arc<AtomicBool>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Fixed per-controller request context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnSettings {
    pub agent_id: Option<String>,
    pub model_name: Option<String>,
    pub stock_code: Option<String>,
    /// Wall-clock bound on one turn, from opening the channel to its last frame.
    pub timeout: Option<Duration>,
}

struct ActiveTurn {
    turn_id: TurnId,
    cancel: CancellationSignal,
}

#[derive(Debug, Default)]
struct SessionState {
    session_id: Option<String>,
    transcript: Transcript,
    last_outcome: Option<TurnOutcome>,
}

enum Interrupt {
    Cancelled,
    TimedOut,
}

/// Owns one chat session: its id, its transcript, and at most one active turn.
///
/// Every operation goes through this handle; there is no process-wide session
/// state. Locks are never held across an await.
pub struct SessionController {
    turns: Arc<dyn TurnTransport>,
    sessions: Arc<dyn SessionStore>,
    settings: TurnSettings,
    state: Mutex<SessionState>,
    active_turn: Mutex<Option<ActiveTurn>>,
    next_turn_id: AtomicU64,
}

impl SessionController {
    pub fn new(backend: &Backend, settings: TurnSettings) -> Arc<Self> {
        Arc::new(Self {
            turns: Arc::clone(&backend.turns),
            sessions: Arc::clone(&backend.sessions),
            settings,
            state: Mutex::new(SessionState::default()),
            active_turn: Mutex::new(None),
            next_turn_id: AtomicU64::new(1),
        })
    }

    #[must_use]
    pub fn settings(&self) -> &TurnSettings {
        &self.settings
    }

    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.lock_state().session_id.clone()
    }

    #[must_use]
    pub fn transcript(&self) -> Transcript {
        self.lock_state().transcript.clone()
    }

    /// Reads the transcript in place. Safe while a turn is streaming.
    pub fn with_transcript<R>(&self, read: impl FnOnce(&Transcript) -> R) -> R {
        read(&self.lock_state().transcript)
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.lock_active_turn().is_some()
    }

    #[must_use]
    pub fn last_outcome(&self) -> Option<TurnOutcome> {
        self.lock_state().last_outcome.clone()
    }

    /// Submits `message` as a new turn and folds its frames until it ends.
    ///
    /// Fails only before the turn starts (empty message, or a turn already
    /// streaming). Everything after that is reported through the outcome.
    pub async fn send(&self, message: impl Into<String>) -> Result<TurnOutcome, ChatError> {
        let message = non_empty(message.into())?;
        let guard = self.claim_turn()?;
        Ok(self.run_turn(&guard, message).await)
    }

    /// Requests cancellation of the active turn. Returns false when idle.
    pub fn abort(&self) -> bool {
        match self.lock_active_turn().as_ref() {
            Some(active) => {
                active.cancel.store(true, Ordering::SeqCst);
                debug!(turn_id = active.turn_id, "turn abort requested");
                true
            }
            None => false,
        }
    }

    /// Drops the last user entry and everything after it, then submits that
    /// message again.
    pub async fn regenerate(&self) -> Result<TurnOutcome, ChatError> {
        let guard = self.claim_turn()?;
        let message = {
            let mut state = self.lock_state();
            let index = state
                .transcript
                .last_user_index()
                .ok_or(TranscriptError::NoUserMessage)?;
            let removed = state.transcript.truncate_from_user(index)?;
            removed
                .into_iter()
                .next()
                .map(|entry| entry.content)
                .ok_or(TranscriptError::NoUserMessage)?
        };
        Ok(self.run_turn(&guard, message).await)
    }

    /// Rewrites the user message at `index`, deletes every stored message
    /// after it, and starts a fresh turn with the new text.
    ///
    /// Store writes happen before any local change, so a failed write leaves
    /// the transcript as it was.
    pub async fn edit_and_regenerate(
        &self,
        index: usize,
        text: impl Into<String>,
    ) -> Result<TurnOutcome, ChatError> {
        let text = non_empty(text.into())?;
        let guard = self.claim_turn()?;

        let (session_id, message_id, ordinal) = {
            let state = self.lock_state();
            let entry = state
                .transcript
                .get(index)
                .ok_or(TranscriptError::IndexOutOfRange {
                    index,
                    len: state.transcript.len(),
                })?;
            if !entry.is_user() {
                return Err(TranscriptError::NotUserMessage { index }.into());
            }
            let ordinal = state.transcript.entries()[..index]
                .iter()
                .filter(|entry| entry.is_user())
                .count();
            (state.session_id.clone(), entry.id.clone(), ordinal)
        };

        if let Some(session_id) = session_id {
            let message_id = match message_id {
                Some(message_id) => message_id,
                None => self.stored_user_message_id(&session_id, ordinal).await?,
            };
            self.sessions
                .update_message(&session_id, &message_id, &text)
                .await?;
            let deleted = self
                .sessions
                .delete_messages_after(&session_id, &message_id)
                .await?;
            debug!(session_id = %session_id, message_id = %message_id, deleted, "history truncated for edit");
        }

        self.lock_state().transcript.truncate_from_user(index)?;
        Ok(self.run_turn(&guard, text).await)
    }

    /// Loads a stored session and replaces the local transcript with it.
    pub async fn resume(&self, session_id: &str) -> Result<ChatSession, ChatError> {
        let _guard = self.claim_turn()?;
        let detail = self.sessions.get_session(session_id).await?;
        let entries = reconstruct(&detail.messages);
        debug!(session_id, entries = entries.len(), "session resumed");

        let mut state = self.lock_state();
        state.session_id = Some(detail.session.id.clone());
        state.transcript.replace_all(entries);
        state.last_outcome = None;
        Ok(detail.session)
    }

    /// Forgets the current session so the next turn starts a new one.
    pub fn new_session(&self) -> Result<(), ChatError> {
        let _guard = self.claim_turn()?;
        let mut state = self.lock_state();
        state.session_id = None;
        state.transcript.clear();
        state.last_outcome = None;
        Ok(())
    }

    /// Id of the `ordinal`-th stored user message. Live entries carry no id
    /// until the session is reloaded.
    async fn stored_user_message_id(
        &self,
        session_id: &str,
        ordinal: usize,
    ) -> Result<String, ChatError> {
        let detail = self.sessions.get_session(session_id).await?;
        detail
            .messages
            .into_iter()
            .filter(|message| message.role == MessageRole::User)
            .nth(ordinal)
            .and_then(|message| message.id)
            .ok_or_else(|| {
                ChatError::validation(format!("user message {ordinal} has not been stored yet"))
            })
    }

    async fn run_turn(&self, guard: &TurnGuard<'_>, message: String) -> TurnOutcome {
        let (mut folder, started) = {
            let mut state = self.lock_state();
            let mut folder = TurnFolder::new(state.session_id.clone());
            let started =
                folder.begin(&mut state.transcript, &message, self.settings.model_name.clone());
            (folder, started)
        };
        if let Err(error) = started {
            warn!(%error, "turn could not start");
            return self.finish(&folder);
        }

        let request = TurnRequest {
            session_id: folder.session_id().map(str::to_string),
            message,
            stock_code: self.settings.stock_code.clone(),
            model_name: self.settings.model_name.clone(),
            agent_id: self.settings.agent_id.clone(),
        };
        let deadline = self.settings.timeout.map(|timeout| Instant::now() + timeout);
        debug!(turn_id = guard.turn_id, session_id = ?request.session_id, "turn started");

        let opened = await_or_cancel(self.turns.open_turn(request), &guard.cancel, deadline).await;
        let mut frames = match opened {
            Ok(Ok(frames)) => frames,
            Ok(Err(error)) => {
                self.fold(|transcript| folder.fail(transcript, error.to_string()));
                return self.finish(&folder);
            }
            Err(interrupt) => {
                self.interrupt(&mut folder, interrupt);
                return self.finish(&folder);
            }
        };

        loop {
            match await_or_cancel(frames.next(), &guard.cancel, deadline).await {
                Ok(Some(Ok(frame))) => {
                    if self.fold(|transcript| folder.apply(transcript, frame)) == Fold::Finished {
                        break;
                    }
                }
                Ok(Some(Err(error @ ChatError::StreamProtocol(_)))) => folder.drop_frame(&error),
                Ok(Some(Err(error))) => {
                    self.fold(|transcript| folder.fail(transcript, error.to_string()));
                    break;
                }
                Ok(None) => {
                    self.fold(|transcript| folder.channel_closed(transcript));
                    break;
                }
                Err(interrupt) => {
                    self.interrupt(&mut folder, interrupt);
                    break;
                }
            }
        }

        drop(frames);
        self.finish(&folder)
    }

    fn interrupt(&self, folder: &mut TurnFolder, interrupt: Interrupt) {
        match interrupt {
            Interrupt::Cancelled => self.fold(|transcript| folder.abort(transcript)),
            Interrupt::TimedOut => {
                let seconds = self.settings.timeout.unwrap_or_default().as_secs_f64();
                self.fold(|transcript| {
                    folder.fail(transcript, format!("turn timed out after {seconds:.1}s"))
                });
            }
        }
    }

    fn finish(&self, folder: &TurnFolder) -> TurnOutcome {
        let outcome = folder.outcome();
        let mut state = self.lock_state();
        if let Some(session_id) = &outcome.session_id {
            state.session_id = Some(session_id.clone());
        }
        state.last_outcome = Some(outcome.clone());
        debug!(state = ?outcome.state, session_id = ?outcome.session_id, "turn finished");
        outcome
    }

    fn fold<R>(&self, step: impl FnOnce(&mut Transcript) -> R) -> R {
        step(&mut self.lock_state().transcript)
    }

    fn claim_turn(&self) -> Result<TurnGuard<'_>, ChatError> {
        let mut active_turn = self.lock_active_turn();
        if active_turn.is_some() {
            return Err(ChatError::validation(
                "a turn is already streaming for this session",
            ));
        }

        let turn_id = self.next_turn_id.fetch_add(1, Ordering::SeqCst);
        let cancel = Arc::new(AtomicBool::new(false));
        *active_turn = Some(ActiveTurn {
            turn_id,
            cancel: Arc::clone(&cancel),
        });

        Ok(TurnGuard {
            controller: self,
            turn_id,
            cancel,
        })
    }

    fn release_turn(&self, turn_id: TurnId) {
        {
            let mut active_turn = self.lock_active_turn();
            if active_turn.as_ref().map(|active| active.turn_id) == Some(turn_id) {
                *active_turn = None;
            }
        }

        // A turn future dropped mid-stream leaves its entry streaming.
        let mut state = self.lock_state();
        if state.transcript.is_streaming() {
            warn!(turn_id, "turn dropped while streaming");
            let _ = state.transcript.cancel(CANCELLED_MARKER);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        lock_unpoisoned(&self.state)
    }

    fn lock_active_turn(&self) -> MutexGuard<'_, Option<ActiveTurn>> {
        lock_unpoisoned(&self.active_turn)
    }
}

/// Single-flight claim on the controller, released on drop.
struct TurnGuard<'a> {
    controller: &'a SessionController,
    turn_id: TurnId,
    cancel: CancellationSignal,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.controller.release_turn(self.turn_id);
    }
}

fn non_empty(message: String) -> Result<String, ChatError> {
    if message.trim().is_empty() {
        return Err(ChatError::validation("message must not be empty"));
    }
    Ok(message)
}

async fn await_or_cancel<F>(
    future: F,
    cancellation: &CancellationSignal,
    deadline: Option<Instant>,
) -> Result<F::Output, Interrupt>
where
    F: Future,
{
    let mut future = Box::pin(future);

    loop {
        if cancellation.load(Ordering::SeqCst) {
            return Err(Interrupt::Cancelled);
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(Interrupt::TimedOut);
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if cancellation.load(Ordering::SeqCst) {
                return Err(Interrupt::Cancelled);
            }
            return Ok(output);
        }
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
