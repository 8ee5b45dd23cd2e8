//! Chat core and terminal front-end for the stock assistant.
//!
//! ## Backend selection
//!
//! `stockpilot` reads its settings through `stockpilot::config::AppConfig`:
//!
//! - `STOCKPILOT_BACKEND=mock` (default) runs against an in-memory demo store
//!   with canned streaming replies.
//! - `STOCKPILOT_BACKEND=http` talks to the platform API at
//!   `STOCKPILOT_API_URL`, optionally authenticated with `STOCKPILOT_API_TOKEN`.
//!
//! `STOCKPILOT_CONFIG_PATH` may point at a JSON file with the same settings:
//!
//! ```json
//! {
//!   "api_url": "https://stocks.example.com",
//!   "api_token": "<token>",
//!   "timeout_sec": 120,
//!   "default_model": "analyst-large"
//! }
//! ```
//!
//! ## Turns
//!
//! A [`runtime::SessionController`] owns one session and allows one turn at a
//! time. Each turn folds streamed frames into the session transcript through a
//! [`turn::TurnFolder`] and reports a [`turn::TurnOutcome`]. A failed turn
//! never raises mid-stream: partial text stays in the transcript with an error
//! notice.
//!
//! ## Agents
//!
//! [`editor::AgentEditor`] edits one agent locally, recomputes the composition
//! preview on demand, and on save writes the agent document before reconciling
//! its skill bindings. Failed binding writes are reported per skill and can be
//! retried on their own.

pub mod backend;
pub mod commands;
pub mod editor;
pub mod render;
pub mod runtime;
pub mod session_list;
pub mod turn;

pub use backend::{backend_from_config, Backend};
pub use editor::{apply_template_to_agent, AgentEditor, PreviewCheck};
pub use runtime::{SessionController, TurnSettings};
pub use session_list::SessionList;
pub use turn::{TurnOutcome, TurnState, TurnUsage};
