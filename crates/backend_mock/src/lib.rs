//! Deterministic in-memory implementation of the `chat_contract` stores and
//! turn transport.
//!
//! This crate contains no transport/protocol logic and is intended for local
//! development and contract-level integration testing. [`MockBackend`] keeps
//! every store in memory, records mutations as [`StoreOp`]s and can inject
//! per-skill failures; [`ScriptedTransport`] replays queued frame scripts.

use std::sync::{Mutex, MutexGuard};

pub mod demo;
pub mod script;
pub mod store;

pub use demo::{demo_skills, demo_tools, DEMO_AGENT_ID, DEMO_MODEL};
pub use script::{script_stream, ScriptStep, ScriptedTransport};
pub use store::{MockBackend, StoreOp};

/// Stable backend identifier used for explicit startup selection.
pub const MOCK_BACKEND_ID: &str = "mock";

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
