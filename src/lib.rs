//! Capability composition and skill binding reconciliation for the stock
//! assistant.
//!
//! # Public API Overview
//! - [`compose`] resolves the effective system prompt and tool set for an agent.
//! - [`verify_preview`] cross-checks a local composition against the store's preview.
//! - [`reconcile`] / [`reconcile_template`] diff desired skill enablement against
//!   persisted bindings; [`apply`] executes the resulting operations concurrently.
//! - [`config`] and [`logging`] carry the process-level settings shared by binaries.

pub mod composition;
pub mod config;
pub mod logging;
pub mod reconcile;

pub use crate::composition::{
    compose, estimate_tokens, verify_preview, ComposeError, PreviewMismatch, PromptOverrides,
};
pub use crate::reconcile::{
    apply, desired_from_template, reconcile, reconcile_template, ApplyReport, BindingFailure,
    BindingOp, DesiredBinding, DesiredBindings, SkillTemplate,
};
