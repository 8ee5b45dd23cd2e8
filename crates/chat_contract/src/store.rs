//! Narrow contracts for the external collaborators the core calls.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::ChatError;
use crate::frame::TurnFrame;
use crate::model::{
    AgentConfig, BindingPatch, ChatSession, CompositionResult, PreviewRequest, SessionDetail,
    Skill, SkillBinding, SkillCategory, SkillFilter, Tool, TurnRequest,
};

/// Frames of one turn in arrival order. Ends when the channel closes.
pub type FrameStream = BoxStream<'static, Result<TurnFrame, ChatError>>;

/// Opens one streaming channel per user turn.
#[async_trait]
pub trait TurnTransport: Send + Sync {
    async fn open_turn(&self, request: TurnRequest) -> Result<FrameStream, ChatError>;
}

/// Read-only view of tools and skills.
#[async_trait]
pub trait CapabilityRegistry: Send + Sync {
    async fn list_tools(&self, include_config: bool) -> Result<Vec<Tool>, ChatError>;

    async fn list_skills(&self, filter: &SkillFilter) -> Result<Vec<Skill>, ChatError>;

    async fn list_skill_categories(&self) -> Result<Vec<SkillCategory>, ChatError>;

    /// Server-side equivalent of local composition, used as a cross-check.
    async fn preview(&self, request: &PreviewRequest) -> Result<CompositionResult, ChatError>;
}

/// Per-binding writes. Each call touches exactly one binding.
#[async_trait]
pub trait BindingStore: Send + Sync {
    async fn list_bindings(&self, agent_id: &str) -> Result<Vec<SkillBinding>, ChatError>;

    async fn bind(
        &self,
        agent_id: &str,
        skill_id: &str,
        enabled: bool,
        prompt_override: Option<String>,
    ) -> Result<SkillBinding, ChatError>;

    async fn update_binding(
        &self,
        agent_id: &str,
        binding_id: &str,
        patch: BindingPatch,
    ) -> Result<SkillBinding, ChatError>;

    async fn unbind(&self, agent_id: &str, binding_id: &str) -> Result<(), ChatError>;
}

#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn list_agents(&self) -> Result<Vec<AgentConfig>, ChatError>;

    async fn get_agent(&self, agent_id: &str) -> Result<AgentConfig, ChatError>;

    async fn create_agent(&self, agent: &AgentConfig) -> Result<AgentConfig, ChatError>;

    async fn update_agent(&self, agent: &AgentConfig) -> Result<AgentConfig, ChatError>;

    async fn delete_agent(&self, agent_id: &str) -> Result<(), ChatError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn list_sessions(&self) -> Result<Vec<ChatSession>, ChatError>;

    /// Session metadata plus its flat persisted messages, oldest first.
    async fn get_session(&self, session_id: &str) -> Result<SessionDetail, ChatError>;

    async fn update_session(&self, session_id: &str, title: &str)
        -> Result<ChatSession, ChatError>;

    async fn delete_session(&self, session_id: &str) -> Result<(), ChatError>;

    async fn update_message(
        &self,
        session_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), ChatError>;

    /// Deletes every message stored after `message_id`. Returns how many were removed.
    async fn delete_messages_after(
        &self,
        session_id: &str,
        message_id: &str,
    ) -> Result<u32, ChatError>;
}
