use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chat_contract::{
    AgentConfig, AgentStore, BindingPatch, BindingStore, CapabilityRegistry, ChatError,
    ChatSession, CompositionResult, MessageRole, PersistedMessage, PreviewRequest, ResourceKind,
    SessionDetail, SessionStore, Skill, SkillBinding, SkillCategory, SkillFilter, Tool,
};
use stockpilot::{compose, PromptOverrides};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;

use crate::lock_unpoisoned;

/// One mutation observed by the mock store, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    Bind {
        agent_id: String,
        skill_id: String,
        enabled: bool,
        prompt_override: Option<String>,
    },
    UpdateBinding {
        binding_id: String,
        skill_id: String,
        patch: BindingPatch,
    },
    Unbind {
        binding_id: String,
    },
    CreateAgent {
        agent_id: String,
    },
    UpdateAgent {
        agent_id: String,
    },
    DeleteAgent {
        agent_id: String,
    },
    UpdateSession {
        session_id: String,
        title: String,
    },
    DeleteSession {
        session_id: String,
    },
    UpdateMessage {
        session_id: String,
        message_id: String,
        content: String,
    },
    DeleteMessagesAfter {
        session_id: String,
        message_id: String,
        deleted: u32,
    },
}

impl StoreOp {
    pub fn is_binding_write(&self) -> bool {
        matches!(
            self,
            Self::Bind { .. } | Self::UpdateBinding { .. } | Self::Unbind { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StoredSession {
    pub(crate) session: ChatSession,
    pub(crate) messages: Vec<PersistedMessage>,
}

#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub(crate) tools: Vec<Tool>,
    pub(crate) skills: Vec<Skill>,
    pub(crate) agents: BTreeMap<String, AgentConfig>,
    pub(crate) bindings: Vec<SkillBinding>,
    pub(crate) sessions: BTreeMap<String, StoredSession>,
    next_id: u64,
    failing_skills: BTreeSet<String>,
    unavailable: Option<String>,
    ops: Vec<StoreOp>,
}

impl MockState {
    pub(crate) fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{}", self.next_id)
    }

    fn check_available(&self) -> Result<(), ChatError> {
        match &self.unavailable {
            Some(message) => Err(ChatError::transport(message.clone())),
            None => Ok(()),
        }
    }

    fn check_skill_writable(&self, skill_id: &str) -> Result<(), ChatError> {
        self.check_available()?;
        if self.failing_skills.contains(skill_id) {
            return Err(ChatError::transport(format!(
                "injected failure writing binding for skill '{skill_id}'"
            )));
        }
        Ok(())
    }

    fn agent(&self, agent_id: &str) -> Result<&AgentConfig, ChatError> {
        self.agents
            .get(agent_id)
            .ok_or_else(|| ChatError::not_found(ResourceKind::Agent, agent_id))
    }

    fn session_mut(&mut self, session_id: &str) -> Result<&mut StoredSession, ChatError> {
        self.sessions
            .get_mut(session_id)
            .ok_or_else(|| ChatError::not_found(ResourceKind::Session, session_id))
    }
}

/// In-memory store for every contract, with failure injection and an
/// operation log for assertions.
#[derive(Debug, Default)]
pub struct MockBackend {
    pub(crate) state: Mutex<MockState>,
}

impl MockBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_tools(self, tools: Vec<Tool>) -> Self {
        lock_unpoisoned(&self.state).tools = tools;
        self
    }

    #[must_use]
    pub fn with_skills(self, skills: Vec<Skill>) -> Self {
        lock_unpoisoned(&self.state).skills = skills;
        self
    }

    #[must_use]
    pub fn with_agent(self, agent: AgentConfig) -> Self {
        lock_unpoisoned(&self.state)
            .agents
            .insert(agent.id.clone(), agent);
        self
    }

    /// Seeds a binding without recording a store operation.
    #[must_use]
    pub fn with_binding(self, agent_id: &str, skill_id: &str, enabled: bool) -> Self {
        self.seed_binding(agent_id, skill_id, enabled, None);
        self
    }

    pub fn seed_binding(
        &self,
        agent_id: &str,
        skill_id: &str,
        enabled: bool,
        prompt_override: Option<&str>,
    ) -> SkillBinding {
        let mut state = lock_unpoisoned(&self.state);
        let binding = SkillBinding {
            binding_id: state.next_id("b"),
            agent_id: agent_id.to_string(),
            skill_id: skill_id.to_string(),
            is_enabled: enabled,
            custom_prompt_override: prompt_override.map(str::to_string),
        };
        state.bindings.push(binding.clone());
        binding
    }

    #[must_use]
    pub fn with_session(self, session_id: &str, messages: Vec<PersistedMessage>) -> Self {
        let now = now_rfc3339();
        let session = ChatSession {
            id: session_id.to_string(),
            title: messages
                .iter()
                .find(|message| message.role == MessageRole::User)
                .map(|message| session_title(&message.content))
                .unwrap_or_default(),
            stock_code: None,
            model_name: None,
            message_count: messages.len() as u32,
            created_at: now.clone(),
            updated_at: now,
        };
        lock_unpoisoned(&self.state).sessions.insert(
            session_id.to_string(),
            StoredSession { session, messages },
        );
        self
    }

    /// Every later binding write for `skill_id` fails with `Transport`.
    pub fn fail_skill(&self, skill_id: &str) {
        lock_unpoisoned(&self.state)
            .failing_skills
            .insert(skill_id.to_string());
    }

    pub fn clear_failures(&self) {
        let mut state = lock_unpoisoned(&self.state);
        state.failing_skills.clear();
        state.unavailable = None;
    }

    /// Every later call fails with `Transport` until [`Self::clear_failures`].
    pub fn set_unavailable(&self, message: &str) {
        lock_unpoisoned(&self.state).unavailable = Some(message.to_string());
    }

    pub fn ops(&self) -> Vec<StoreOp> {
        lock_unpoisoned(&self.state).ops.clone()
    }

    pub fn binding_writes(&self) -> usize {
        lock_unpoisoned(&self.state)
            .ops
            .iter()
            .filter(|op| op.is_binding_write())
            .count()
    }

    pub fn clear_ops(&self) {
        lock_unpoisoned(&self.state).ops.clear();
    }

    pub fn bindings_snapshot(&self, agent_id: &str) -> Vec<SkillBinding> {
        lock_unpoisoned(&self.state)
            .bindings
            .iter()
            .filter(|binding| binding.agent_id == agent_id)
            .cloned()
            .collect()
    }

    pub fn session_messages(&self, session_id: &str) -> Vec<PersistedMessage> {
        lock_unpoisoned(&self.state)
            .sessions
            .get(session_id)
            .map(|stored| stored.messages.clone())
            .unwrap_or_default()
    }

    /// Appends rows to a session, creating it when absent. Returns whether it was created.
    pub fn append_messages(
        &self,
        session_id: &str,
        model_name: Option<&str>,
        mut rows: Vec<PersistedMessage>,
    ) -> bool {
        let mut state = lock_unpoisoned(&self.state);
        let now = now_rfc3339();
        for row in &mut rows {
            if row.id.is_none() {
                row.id = Some(state.next_id("m"));
            }
            if row.created_at.is_none() {
                row.created_at = Some(now.clone());
            }
        }

        let created = !state.sessions.contains_key(session_id);
        let stored = state
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| StoredSession {
                session: ChatSession {
                    id: session_id.to_string(),
                    title: rows
                        .iter()
                        .find(|row| row.role == MessageRole::User)
                        .map(|row| session_title(&row.content))
                        .unwrap_or_default(),
                    stock_code: None,
                    model_name: model_name.map(str::to_string),
                    message_count: 0,
                    created_at: now.clone(),
                    updated_at: now.clone(),
                },
                messages: Vec::new(),
            });
        stored.messages.extend(rows);
        stored.session.message_count = stored.messages.len() as u32;
        stored.session.updated_at = now;
        created
    }
}

fn session_title(message: &str) -> String {
    message.trim().chars().take(40).collect()
}

pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[async_trait]
impl CapabilityRegistry for MockBackend {
    async fn list_tools(&self, include_config: bool) -> Result<Vec<Tool>, ChatError> {
        let state = lock_unpoisoned(&self.state);
        state.check_available()?;
        Ok(state
            .tools
            .iter()
            .cloned()
            .map(|mut tool| {
                if !include_config {
                    tool.config_schema = None;
                }
                tool
            })
            .collect())
    }

    async fn list_skills(&self, filter: &SkillFilter) -> Result<Vec<Skill>, ChatError> {
        let state = lock_unpoisoned(&self.state);
        state.check_available()?;
        Ok(state
            .skills
            .iter()
            .filter(|skill| filter.matches(skill))
            .cloned()
            .collect())
    }

    async fn list_skill_categories(&self) -> Result<Vec<SkillCategory>, ChatError> {
        let state = lock_unpoisoned(&self.state);
        state.check_available()?;
        let mut counts: BTreeMap<&str, u32> = BTreeMap::new();
        for skill in &state.skills {
            if !skill.category.is_empty() {
                *counts.entry(skill.category.as_str()).or_default() += 1;
            }
        }
        Ok(counts
            .into_iter()
            .map(|(id, count)| SkillCategory {
                id: id.to_string(),
                name: capitalize(id),
                icon: String::new(),
                count,
            })
            .collect())
    }

    async fn preview(&self, request: &PreviewRequest) -> Result<CompositionResult, ChatError> {
        let state = lock_unpoisoned(&self.state);
        state.check_available()?;
        let enabled: BTreeSet<String> = request.skill_ids.iter().cloned().collect();
        let manual: BTreeSet<String> = request.manual_tools.iter().cloned().collect();
        Ok(compose(
            &request.base_prompt,
            &state.skills,
            &enabled,
            &manual,
            &PromptOverrides::new(),
        )?)
    }
}

fn capitalize(id: &str) -> String {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[async_trait]
impl BindingStore for MockBackend {
    async fn list_bindings(&self, agent_id: &str) -> Result<Vec<SkillBinding>, ChatError> {
        let state = lock_unpoisoned(&self.state);
        state.check_available()?;
        state.agent(agent_id)?;
        Ok(state
            .bindings
            .iter()
            .filter(|binding| binding.agent_id == agent_id)
            .cloned()
            .collect())
    }

    async fn bind(
        &self,
        agent_id: &str,
        skill_id: &str,
        enabled: bool,
        prompt_override: Option<String>,
    ) -> Result<SkillBinding, ChatError> {
        let mut state = lock_unpoisoned(&self.state);
        state.check_skill_writable(skill_id)?;
        state.agent(agent_id)?;
        if !state.skills.iter().any(|skill| skill.id == skill_id) {
            return Err(ChatError::not_found(ResourceKind::Skill, skill_id));
        }
        if state
            .bindings
            .iter()
            .any(|binding| binding.agent_id == agent_id && binding.skill_id == skill_id)
        {
            return Err(ChatError::conflict(format!(
                "skill '{skill_id}' is already bound to agent '{agent_id}'"
            )));
        }

        let binding = SkillBinding {
            binding_id: state.next_id("b"),
            agent_id: agent_id.to_string(),
            skill_id: skill_id.to_string(),
            is_enabled: enabled,
            custom_prompt_override: prompt_override.clone(),
        };
        state.bindings.push(binding.clone());
        state.ops.push(StoreOp::Bind {
            agent_id: agent_id.to_string(),
            skill_id: skill_id.to_string(),
            enabled,
            prompt_override,
        });
        debug!(agent_id, skill_id, binding_id = %binding.binding_id, "mock bind");
        Ok(binding)
    }

    async fn update_binding(
        &self,
        agent_id: &str,
        binding_id: &str,
        patch: BindingPatch,
    ) -> Result<SkillBinding, ChatError> {
        let mut state = lock_unpoisoned(&self.state);
        let skill_id = state
            .bindings
            .iter()
            .find(|binding| binding.agent_id == agent_id && binding.binding_id == binding_id)
            .map(|binding| binding.skill_id.clone())
            .ok_or_else(|| ChatError::not_found(ResourceKind::Binding, binding_id))?;
        state.check_skill_writable(&skill_id)?;

        let mut updated = None;
        for binding in &mut state.bindings {
            if binding.binding_id == binding_id {
                patch.apply_to(binding);
                updated = Some(binding.clone());
            }
        }
        let updated =
            updated.ok_or_else(|| ChatError::not_found(ResourceKind::Binding, binding_id))?;
        state.ops.push(StoreOp::UpdateBinding {
            binding_id: binding_id.to_string(),
            skill_id,
            patch,
        });
        Ok(updated)
    }

    async fn unbind(&self, agent_id: &str, binding_id: &str) -> Result<(), ChatError> {
        let mut state = lock_unpoisoned(&self.state);
        state.check_available()?;
        let before = state.bindings.len();
        state
            .bindings
            .retain(|binding| !(binding.agent_id == agent_id && binding.binding_id == binding_id));
        if state.bindings.len() == before {
            return Err(ChatError::not_found(ResourceKind::Binding, binding_id));
        }
        state.ops.push(StoreOp::Unbind {
            binding_id: binding_id.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl AgentStore for MockBackend {
    async fn list_agents(&self) -> Result<Vec<AgentConfig>, ChatError> {
        let state = lock_unpoisoned(&self.state);
        state.check_available()?;
        Ok(state.agents.values().cloned().collect())
    }

    async fn get_agent(&self, agent_id: &str) -> Result<AgentConfig, ChatError> {
        let state = lock_unpoisoned(&self.state);
        state.check_available()?;
        state.agent(agent_id).cloned()
    }

    async fn create_agent(&self, agent: &AgentConfig) -> Result<AgentConfig, ChatError> {
        let mut state = lock_unpoisoned(&self.state);
        state.check_available()?;
        agent.validate(&state.tools)?;

        let mut created = agent.clone();
        if created.id.trim().is_empty() {
            created.id = state.next_id("agent-");
        }
        if state.agents.contains_key(&created.id) {
            return Err(ChatError::conflict(format!(
                "agent '{}' already exists",
                created.id
            )));
        }
        state.agents.insert(created.id.clone(), created.clone());
        state.ops.push(StoreOp::CreateAgent {
            agent_id: created.id.clone(),
        });
        Ok(created)
    }

    async fn update_agent(&self, agent: &AgentConfig) -> Result<AgentConfig, ChatError> {
        let mut state = lock_unpoisoned(&self.state);
        state.check_available()?;
        state.agent(&agent.id)?;
        agent.validate(&state.tools)?;
        state.agents.insert(agent.id.clone(), agent.clone());
        state.ops.push(StoreOp::UpdateAgent {
            agent_id: agent.id.clone(),
        });
        Ok(agent.clone())
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<(), ChatError> {
        let mut state = lock_unpoisoned(&self.state);
        state.check_available()?;
        state.agent(agent_id)?.ensure_deletable()?;
        state.agents.remove(agent_id);
        state.bindings.retain(|binding| binding.agent_id != agent_id);
        state.ops.push(StoreOp::DeleteAgent {
            agent_id: agent_id.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MockBackend {
    async fn list_sessions(&self) -> Result<Vec<ChatSession>, ChatError> {
        let state = lock_unpoisoned(&self.state);
        state.check_available()?;
        let mut sessions: Vec<ChatSession> = state
            .sessions
            .values()
            .map(|stored| stored.session.clone())
            .collect();
        sessions.sort_by(|left, right| right.updated_at.cmp(&left.updated_at));
        Ok(sessions)
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionDetail, ChatError> {
        let mut state = lock_unpoisoned(&self.state);
        state.check_available()?;
        let stored = state.session_mut(session_id)?;
        Ok(SessionDetail {
            session: stored.session.clone(),
            messages: stored.messages.clone(),
        })
    }

    async fn update_session(
        &self,
        session_id: &str,
        title: &str,
    ) -> Result<ChatSession, ChatError> {
        let mut state = lock_unpoisoned(&self.state);
        state.check_available()?;
        if title.trim().is_empty() {
            return Err(ChatError::validation("session title must not be empty"));
        }
        let stored = state.session_mut(session_id)?;
        stored.session.title = title.to_string();
        stored.session.updated_at = now_rfc3339();
        let session = stored.session.clone();
        state.ops.push(StoreOp::UpdateSession {
            session_id: session_id.to_string(),
            title: title.to_string(),
        });
        Ok(session)
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), ChatError> {
        let mut state = lock_unpoisoned(&self.state);
        state.check_available()?;
        state
            .sessions
            .remove(session_id)
            .ok_or_else(|| ChatError::not_found(ResourceKind::Session, session_id))?;
        state.ops.push(StoreOp::DeleteSession {
            session_id: session_id.to_string(),
        });
        Ok(())
    }

    async fn update_message(
        &self,
        session_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), ChatError> {
        let mut state = lock_unpoisoned(&self.state);
        state.check_available()?;
        let stored = state.session_mut(session_id)?;
        let message = stored
            .messages
            .iter_mut()
            .find(|message| message.id.as_deref() == Some(message_id))
            .ok_or_else(|| ChatError::not_found(ResourceKind::Message, message_id))?;
        message.content = content.to_string();
        state.ops.push(StoreOp::UpdateMessage {
            session_id: session_id.to_string(),
            message_id: message_id.to_string(),
            content: content.to_string(),
        });
        Ok(())
    }

    async fn delete_messages_after(
        &self,
        session_id: &str,
        message_id: &str,
    ) -> Result<u32, ChatError> {
        let mut state = lock_unpoisoned(&self.state);
        state.check_available()?;
        let stored = state.session_mut(session_id)?;
        let index = stored
            .messages
            .iter()
            .position(|message| message.id.as_deref() == Some(message_id))
            .ok_or_else(|| ChatError::not_found(ResourceKind::Message, message_id))?;
        let deleted = stored.messages.split_off(index + 1).len() as u32;
        stored.session.message_count = stored.messages.len() as u32;
        state.ops.push(StoreOp::DeleteMessagesAfter {
            session_id: session_id.to_string(),
            message_id: message_id.to_string(),
            deleted,
        });
        Ok(deleted)
    }
}
