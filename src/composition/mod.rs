//! Deterministic merge of a base prompt, selected skills and manual tools.
//!
//! Everything here is pure and cheap enough to run on every edit. Callers own
//! debouncing.

mod engine;
mod verify;

pub use engine::{
    compose, estimate_tokens, ComposeError, PromptOverrides, CHARS_PER_TOKEN, PROMPT_DELIMITER,
};
pub use verify::{verify_preview, PreviewMismatch};
