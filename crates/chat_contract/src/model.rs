use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::config_schema::{ConfigValues, ToolConfigSchema};
use crate::error::{ChatError, ResourceKind};

/// Callable tool exposed by the platform. Immutable within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameter_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_schema: Option<ToolConfigSchema>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolBinding {
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

impl ToolBinding {
    #[must_use]
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            priority: None,
        }
    }
}

/// Reusable prompt fragment plus the tools it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub prompt_template: String,
    #[serde(default)]
    pub tool_bindings: Vec<ToolBinding>,
    #[serde(default)]
    pub is_builtin: bool,
    /// Opaque edit counter owned by the store.
    #[serde(default)]
    pub version: u32,
}

impl Skill {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            icon: String::new(),
            category: String::new(),
            prompt_template: String::new(),
            tool_bindings: Vec::new(),
            is_builtin: false,
            version: 1,
        }
    }

    #[must_use]
    pub fn with_prompt(mut self, prompt_template: impl Into<String>) -> Self {
        self.prompt_template = prompt_template.into();
        self
    }

    #[must_use]
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tool_bindings
            .extend(tools.into_iter().map(ToolBinding::new));
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    #[must_use]
    pub fn builtin(mut self) -> Self {
        self.is_builtin = true;
        self
    }

    /// Tool names in binding order.
    pub fn bound_tools(&self) -> impl Iterator<Item = &str> {
        self.tool_bindings
            .iter()
            .map(|binding| binding.tool_name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillCategory {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub count: u32,
}

/// Query for listing skills from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillFilter {
    pub include_builtin: bool,
    pub category: Option<String>,
}

impl Default for SkillFilter {
    fn default() -> Self {
        Self {
            include_builtin: true,
            category: None,
        }
    }
}

impl SkillFilter {
    #[must_use]
    pub fn matches(&self, skill: &Skill) -> bool {
        (self.include_builtin || !skill.is_builtin)
            && self
                .category
                .as_deref()
                .map_or(true, |category| skill.category == category)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Agent document. Read and written as a whole per save.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub enabled_tools: Vec<String>,
    #[serde(default)]
    pub tool_configs: BTreeMap<String, ConfigValues>,
    #[serde(default)]
    pub model_config: ModelConfig,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_system: bool,
}

impl AgentConfig {
    #[must_use]
    pub fn manual_tools(&self) -> BTreeSet<String> {
        self.enabled_tools.iter().cloned().collect()
    }

    pub fn ensure_deletable(&self) -> Result<(), ChatError> {
        if self.is_system {
            return Err(ChatError::validation(format!(
                "system agent '{}' cannot be deleted",
                self.id
            )));
        }
        Ok(())
    }

    /// Checks the document against the tool catalogue before it is written.
    pub fn validate(&self, tools: &[Tool]) -> Result<(), ChatError> {
        if self.name.trim().is_empty() {
            return Err(ChatError::validation("agent name must not be empty"));
        }

        for tool_name in &self.enabled_tools {
            if !tools.iter().any(|tool| &tool.name == tool_name) {
                return Err(ChatError::not_found(ResourceKind::Tool, tool_name.clone()));
            }
        }

        for (tool_name, values) in &self.tool_configs {
            let tool = tools
                .iter()
                .find(|tool| &tool.name == tool_name)
                .ok_or_else(|| ChatError::not_found(ResourceKind::Tool, tool_name.clone()))?;
            match &tool.config_schema {
                Some(schema) => schema.validate(values)?,
                None if values.is_empty() => {}
                None => {
                    return Err(ChatError::validation(format!(
                        "tool '{tool_name}' does not accept configuration"
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Attachment of a skill to an agent. Unique per `(agent_id, skill_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillBinding {
    #[serde(deserialize_with = "deserialize_id")]
    pub binding_id: String,
    #[serde(deserialize_with = "deserialize_id")]
    pub agent_id: String,
    #[serde(deserialize_with = "deserialize_id")]
    pub skill_id: String,
    pub is_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_prompt_override: Option<String>,
}

impl SkillBinding {
    /// Override text when it carries any non-whitespace content.
    #[must_use]
    pub fn effective_override(&self) -> Option<&str> {
        normalize_override(self.custom_prompt_override.as_deref())
    }
}

/// Treats blank override text as absent.
#[must_use]
pub fn normalize_override(value: Option<&str>) -> Option<&str> {
    value.filter(|text| !text.trim().is_empty())
}

/// How an update touches a binding's prompt override.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OverridePatch {
    #[default]
    Unchanged,
    Set(String),
    Clear,
}

/// Partial update for one binding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingPatch {
    pub enabled: Option<bool>,
    pub prompt_override: OverridePatch,
}

impl BindingPatch {
    pub fn apply_to(&self, binding: &mut SkillBinding) {
        if let Some(enabled) = self.enabled {
            binding.is_enabled = enabled;
        }
        match &self.prompt_override {
            OverridePatch::Unchanged => {}
            OverridePatch::Set(text) => binding.custom_prompt_override = Some(text.clone()),
            OverridePatch::Clear => binding.custom_prompt_override = None,
        }
    }
}

/// Effective configuration derived from a base prompt, skills and manual tools.
/// Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionResult {
    pub system_prompt: String,
    pub enabled_tools: BTreeSet<String>,
    pub tool_to_skills: BTreeMap<String, Vec<String>>,
    pub skill_count: usize,
    /// UX hint only; not billed usage.
    pub estimated_tokens: usize,
    pub base_prompt_length: usize,
    pub full_prompt_length: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewRequest {
    pub base_prompt: String,
    pub skill_ids: Vec<String>,
    pub manual_tools: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSession {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default)]
    pub message_count: u32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    #[serde(alias = "toolCall")]
    ToolCall,
    #[serde(alias = "toolResult")]
    ToolResult,
}

/// One flat message row as stored for a session, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedMessage {
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub id: Option<String>,
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Object or JSON-encoded string; malformed values degrade to `{}` on replay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_args: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl PersistedMessage {
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: None,
            role,
            content: content.into(),
            tool_name: None,
            tool_args: None,
            model_name: None,
            response_time_ms: None,
            created_at: None,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_tool(mut self, tool_name: impl Into<String>, tool_args: Option<Value>) -> Self {
        self.tool_name = Some(tool_name.into());
        self.tool_args = tool_args;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: ChatSession,
    #[serde(default)]
    pub messages: Vec<PersistedMessage>,
}

/// Inputs for one streamed turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl TurnRequest {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(serde_json::Number),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(text) => text,
            RawId::Number(number) => number.to_string(),
        }
    }
}

/// Accepts string or numeric identifiers and renders both as strings.
pub fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(String::from)
}

pub fn deserialize_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawId>::deserialize(deserializer).map(|raw| raw.map(String::from))
}
