//! Provider-neutral contract shared by the stock assistant crates.
//!
//! This crate defines the data model, the error taxonomy, the streaming turn
//! frames, and the narrow async traits through which the core reaches the
//! external data store and the streaming channel. It contains no transport
//! details.

pub mod config_schema;
pub mod error;
pub mod frame;
pub mod model;
pub mod store;

pub use config_schema::{
    ConfigField, ConfigValue, ConfigValues, FieldKind, SelectOption, ToolConfigSchema,
};
pub use error::{ChatError, ResourceKind};
pub use frame::TurnFrame;
pub use model::{
    normalize_override, AgentConfig, BindingPatch, ChatSession, CompositionResult, MessageRole,
    ModelConfig, OverridePatch, PersistedMessage, PreviewRequest, SessionDetail, Skill,
    SkillBinding, SkillCategory, SkillFilter, Tool, ToolBinding, TurnRequest,
};
pub use store::{
    AgentStore, BindingStore, CapabilityRegistry, FrameStream, SessionStore, TurnTransport,
};
