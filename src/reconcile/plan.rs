use std::collections::BTreeMap;

use chat_contract::{normalize_override, BindingPatch, OverridePatch, SkillBinding};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Target state for one skill on one agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredBinding {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_override: Option<String>,
}

impl DesiredBinding {
    #[must_use]
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            prompt_override: None,
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_override(mut self, prompt_override: impl Into<String>) -> Self {
        self.prompt_override = Some(prompt_override.into());
        self
    }
}

/// Desired enablement keyed by skill id. Iteration order fixes operation order.
pub type DesiredBindings = BTreeMap<String, DesiredBinding>;

/// One write against exactly one binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingOp {
    Create {
        skill_id: String,
        enabled: bool,
        prompt_override: Option<String>,
    },
    Update {
        binding_id: String,
        skill_id: String,
        patch: BindingPatch,
    },
}

impl BindingOp {
    #[must_use]
    pub fn skill_id(&self) -> &str {
        match self {
            Self::Create { skill_id, .. } | Self::Update { skill_id, .. } => skill_id,
        }
    }
}

/// Named ordered list of skill ids applied as "exactly these skills".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillTemplate {
    pub name: String,
    pub skill_ids: Vec<String>,
}

impl SkillTemplate {
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, skill_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            skill_ids: skill_ids.into_iter().map(Into::into).collect(),
        }
    }
}

/// Computes the minimal operations that move `current` to `desired`.
///
/// Bindings belonging to other agents are ignored. Skills absent from
/// `desired` are left untouched.
pub fn reconcile(
    agent_id: &str,
    desired: &DesiredBindings,
    current: &[SkillBinding],
) -> Vec<BindingOp> {
    let existing = index_bindings(agent_id, current);
    let mut ops = Vec::new();

    for (skill_id, want) in desired {
        let wanted_override = normalize_override(want.prompt_override.as_deref());

        match (want.enabled, existing.get(skill_id.as_str())) {
            (true, None) => ops.push(BindingOp::Create {
                skill_id: skill_id.clone(),
                enabled: true,
                prompt_override: wanted_override.map(str::to_string),
            }),
            (true, Some(binding)) => {
                let override_changed = binding.effective_override() != wanted_override;
                if binding.is_enabled && !override_changed {
                    continue;
                }
                let prompt_override = match (override_changed, wanted_override) {
                    (false, _) => OverridePatch::Unchanged,
                    (true, Some(text)) => OverridePatch::Set(text.to_string()),
                    (true, None) => OverridePatch::Clear,
                };
                ops.push(BindingOp::Update {
                    binding_id: binding.binding_id.clone(),
                    skill_id: skill_id.clone(),
                    patch: BindingPatch {
                        enabled: Some(true),
                        prompt_override,
                    },
                });
            }
            (false, Some(binding)) if binding.is_enabled => ops.push(BindingOp::Update {
                binding_id: binding.binding_id.clone(),
                skill_id: skill_id.clone(),
                patch: BindingPatch {
                    enabled: Some(false),
                    prompt_override: OverridePatch::Unchanged,
                },
            }),
            (false, _) => {}
        }
    }

    ops
}

/// Template skills become enabled and every other enabled skill is disabled.
/// Existing overrides on template skills are kept.
pub fn desired_from_template(
    agent_id: &str,
    template: &SkillTemplate,
    current: &[SkillBinding],
) -> DesiredBindings {
    let existing = index_bindings(agent_id, current);
    let mut desired = DesiredBindings::new();

    for skill_id in &template.skill_ids {
        let prompt_override = existing
            .get(skill_id.as_str())
            .and_then(|binding| binding.custom_prompt_override.clone());
        desired.insert(
            skill_id.clone(),
            DesiredBinding {
                enabled: true,
                prompt_override,
            },
        );
    }

    for (skill_id, binding) in &existing {
        if binding.is_enabled && !desired.contains_key(*skill_id) {
            desired.insert((*skill_id).to_string(), DesiredBinding::disabled());
        }
    }

    desired
}

pub fn reconcile_template(
    agent_id: &str,
    template: &SkillTemplate,
    current: &[SkillBinding],
) -> Vec<BindingOp> {
    reconcile(
        agent_id,
        &desired_from_template(agent_id, template, current),
        current,
    )
}

fn index_bindings<'a>(
    agent_id: &str,
    current: &'a [SkillBinding],
) -> BTreeMap<&'a str, &'a SkillBinding> {
    let mut index = BTreeMap::new();
    for binding in current.iter().filter(|binding| binding.agent_id == agent_id) {
        if index.contains_key(binding.skill_id.as_str()) {
            warn!(
                agent_id,
                skill_id = %binding.skill_id,
                binding_id = %binding.binding_id,
                "duplicate skill binding ignored"
            );
            continue;
        }
        index.insert(binding.skill_id.as_str(), binding);
    }
    index
}
