//! Ordered per-session transcript: display model, append-only folding
//! primitives, and reconstruction from persisted rows.

mod display;
mod error;
mod reconstruct;
mod store;

pub use display::{DisplayMessage, Role, ToolCallRecord, ToolCallStatus};
pub use error::TranscriptError;
pub use reconstruct::{is_rfc3339, reconstruct};
pub use store::{Completion, ToolResultMatch, Transcript};
