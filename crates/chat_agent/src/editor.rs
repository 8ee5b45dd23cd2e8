//! Operator-side editing of one agent: local skill and tool selection with a
//! live composition preview, and a save that writes the agent document then
//! reconciles its skill bindings.

use std::collections::BTreeSet;

use chat_contract::{
    AgentConfig, ChatError, CompositionResult, ConfigValues, PreviewRequest, ResourceKind, Skill,
    SkillBinding, SkillFilter, Tool,
};
use futures_util::future::try_join4;
use stockpilot::{
    apply, compose, reconcile, reconcile_template, verify_preview, ApplyReport, BindingOp,
    DesiredBinding, DesiredBindings, PreviewMismatch, PromptOverrides, SkillTemplate,
};
use tracing::{debug, warn};

use crate::backend::Backend;

/// Local preview plus the outcome of comparing it with the store's preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewCheck {
    pub local: CompositionResult,
    /// `None` when the previews agree or the remote one was not compared.
    pub mismatch: Option<PreviewMismatch>,
}

pub struct AgentEditor {
    backend: Backend,
    agent: AgentConfig,
    tools: Vec<Tool>,
    skills: Vec<Skill>,
    bindings: Vec<SkillBinding>,
    enabled_skills: BTreeSet<String>,
    overrides: PromptOverrides,
    last_report: Option<ApplyReport>,
}

impl AgentEditor {
    /// Fetches the agent, the catalogue and the agent's bindings.
    pub async fn load(backend: &Backend, agent_id: &str) -> Result<Self, ChatError> {
        let filter = SkillFilter::default();
        let (agent, tools, skills, bindings) = try_join4(
            backend.agents.get_agent(agent_id),
            backend.registry.list_tools(true),
            backend.registry.list_skills(&filter),
            backend.bindings.list_bindings(agent_id),
        )
        .await?;

        let mut enabled_skills = BTreeSet::new();
        let mut overrides = PromptOverrides::new();
        for binding in bindings.iter().filter(|binding| binding.agent_id == agent.id) {
            if let Some(text) = binding.effective_override() {
                overrides.insert(binding.skill_id.clone(), Some(text.to_string()));
            }
            if !binding.is_enabled {
                continue;
            }
            if skills.iter().any(|skill| skill.id == binding.skill_id) {
                enabled_skills.insert(binding.skill_id.clone());
            } else {
                warn!(agent_id, skill_id = %binding.skill_id, "binding references a skill missing from the catalogue");
            }
        }

        debug!(
            agent_id,
            skills = skills.len(),
            enabled = enabled_skills.len(),
            "agent editor loaded"
        );
        Ok(Self {
            backend: backend.clone(),
            agent,
            tools,
            skills,
            bindings,
            enabled_skills,
            overrides,
            last_report: None,
        })
    }

    #[must_use]
    pub fn agent(&self) -> &AgentConfig {
        &self.agent
    }

    #[must_use]
    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    #[must_use]
    pub fn skills(&self) -> &[Skill] {
        &self.skills
    }

    #[must_use]
    pub fn bindings(&self) -> &[SkillBinding] {
        &self.bindings
    }

    #[must_use]
    pub fn enabled_skills(&self) -> &BTreeSet<String> {
        &self.enabled_skills
    }

    #[must_use]
    pub fn last_report(&self) -> Option<&ApplyReport> {
        self.last_report.as_ref()
    }

    pub fn set_base_prompt(&mut self, prompt: impl Into<String>) {
        self.agent.system_prompt = prompt.into();
    }

    pub fn set_skill_enabled(&mut self, skill_id: &str, enabled: bool) -> Result<(), ChatError> {
        self.ensure_skill(skill_id)?;
        if enabled {
            self.enabled_skills.insert(skill_id.to_string());
        } else {
            self.enabled_skills.remove(skill_id);
        }
        Ok(())
    }

    /// Flips a skill and returns its new state.
    pub fn toggle_skill(&mut self, skill_id: &str) -> Result<bool, ChatError> {
        let enabled = !self.enabled_skills.contains(skill_id);
        self.set_skill_enabled(skill_id, enabled)?;
        Ok(enabled)
    }

    /// Blank text clears the override.
    pub fn set_override(&mut self, skill_id: &str, text: Option<&str>) -> Result<(), ChatError> {
        self.ensure_skill(skill_id)?;
        let text = text.map(str::trim).filter(|text| !text.is_empty());
        self.overrides
            .insert(skill_id.to_string(), text.map(str::to_string));
        Ok(())
    }

    pub fn set_tool_enabled(&mut self, tool_name: &str, enabled: bool) -> Result<(), ChatError> {
        self.ensure_tool(tool_name)?;
        let present = self.agent.enabled_tools.iter().any(|name| name == tool_name);
        if enabled && !present {
            self.agent.enabled_tools.push(tool_name.to_string());
        } else if !enabled {
            self.agent.enabled_tools.retain(|name| name != tool_name);
        }
        Ok(())
    }

    /// Stores per-agent configuration for a tool after checking it against
    /// the tool's schema.
    pub fn set_tool_config(
        &mut self,
        tool_name: &str,
        values: ConfigValues,
    ) -> Result<(), ChatError> {
        let tool = self.ensure_tool(tool_name)?;
        match &tool.config_schema {
            Some(schema) => schema.validate(&values)?,
            None if values.is_empty() => {}
            None => {
                return Err(ChatError::validation(format!(
                    "tool '{tool_name}' does not accept configuration"
                )))
            }
        }
        self.agent.tool_configs.insert(tool_name.to_string(), values);
        Ok(())
    }

    /// Enables exactly the template's skills. Overrides are kept.
    pub fn apply_template(&mut self, template: &SkillTemplate) -> Result<(), ChatError> {
        for skill_id in &template.skill_ids {
            self.ensure_skill(skill_id)?;
        }
        self.enabled_skills = template.skill_ids.iter().cloned().collect();
        debug!(template = %template.name, skills = self.enabled_skills.len(), "template applied locally");
        Ok(())
    }

    /// Composition of the current local edits. Cheap enough to run on every change.
    pub fn preview(&self) -> Result<CompositionResult, ChatError> {
        Ok(compose(
            &self.agent.system_prompt,
            &self.skills,
            &self.enabled_skills,
            &self.agent.manual_tools(),
            &self.overrides,
        )?)
    }

    /// Local preview cross-checked against the store's preview endpoint.
    ///
    /// The local result always wins. The store's preview has no notion of
    /// overrides, so the comparison is skipped while an enabled skill has one.
    pub async fn preview_checked(&self) -> Result<PreviewCheck, ChatError> {
        let local = self.preview()?;
        let overridden = self
            .enabled_skills
            .iter()
            .any(|skill_id| matches!(self.overrides.get(skill_id), Some(Some(_))));
        if overridden {
            debug!(agent_id = %self.agent.id, "preview cross-check skipped for overridden skills");
            return Ok(PreviewCheck {
                local,
                mismatch: None,
            });
        }

        let request = PreviewRequest {
            base_prompt: self.agent.system_prompt.clone(),
            skill_ids: self.enabled_skills.iter().cloned().collect(),
            manual_tools: self.agent.enabled_tools.clone(),
        };
        let mismatch = match self.backend.registry.preview(&request).await {
            Ok(remote) => verify_preview(&local, &remote).err(),
            Err(error) => {
                warn!(agent_id = %self.agent.id, %error, "remote preview unavailable");
                None
            }
        };
        if let Some(mismatch) = &mismatch {
            warn!(agent_id = %self.agent.id, %mismatch, "local and remote previews disagree");
        }

        Ok(PreviewCheck { local, mismatch })
    }

    /// Desired binding state for every skill that is enabled locally or
    /// currently enabled in the store.
    #[must_use]
    pub fn desired(&self) -> DesiredBindings {
        let mut desired = DesiredBindings::new();
        for skill_id in &self.enabled_skills {
            let prompt_override = self.overrides.get(skill_id).cloned().flatten();
            desired.insert(
                skill_id.clone(),
                DesiredBinding {
                    enabled: true,
                    prompt_override,
                },
            );
        }
        for binding in &self.bindings {
            if binding.agent_id == self.agent.id
                && binding.is_enabled
                && !desired.contains_key(&binding.skill_id)
            {
                desired.insert(binding.skill_id.clone(), DesiredBinding::disabled());
            }
        }
        desired
    }

    /// Binding writes the next save would issue.
    #[must_use]
    pub fn plan(&self) -> Vec<BindingOp> {
        reconcile(&self.agent.id, &self.desired(), &self.bindings)
    }

    /// Writes the agent document, then reconciles its bindings.
    ///
    /// Binding failures do not fail the save; they are listed in the report
    /// and can be retried with [`AgentEditor::retry_failed`].
    pub async fn save(&mut self) -> Result<ApplyReport, ChatError> {
        self.agent.validate(&self.tools)?;
        self.preview()?;

        self.agent = self.backend.agents.update_agent(&self.agent).await?;
        let ops = self.plan();
        debug!(agent_id = %self.agent.id, ops = ops.len(), "saving agent bindings");
        Ok(self.apply_ops(ops).await)
    }

    /// Re-applies only the operations that failed in the last save.
    pub async fn retry_failed(&mut self) -> ApplyReport {
        let ops = self
            .last_report
            .as_ref()
            .map(ApplyReport::retry_operations)
            .unwrap_or_default();
        if ops.is_empty() {
            return ApplyReport::default();
        }
        self.apply_ops(ops).await
    }

    async fn apply_ops(&mut self, ops: Vec<BindingOp>) -> ApplyReport {
        let report = apply(self.backend.bindings.as_ref(), &self.agent.id, ops).await;
        report.merge_into(&mut self.bindings);
        if !report.is_success() {
            warn!(agent_id = %self.agent.id, failed = ?report.failed_skill_ids(), "some bindings were not saved");
        }
        self.last_report = Some(report.clone());
        report
    }

    fn ensure_skill(&self, skill_id: &str) -> Result<&Skill, ChatError> {
        self.skills
            .iter()
            .find(|skill| skill.id == skill_id)
            .ok_or_else(|| ChatError::not_found(ResourceKind::Skill, skill_id))
    }

    fn ensure_tool(&self, tool_name: &str) -> Result<&Tool, ChatError> {
        self.tools
            .iter()
            .find(|tool| tool.name == tool_name)
            .ok_or_else(|| ChatError::not_found(ResourceKind::Tool, tool_name))
    }
}

/// Sets exactly `template`'s skills on an agent straight against the store.
pub async fn apply_template_to_agent(
    backend: &Backend,
    agent_id: &str,
    template: &SkillTemplate,
) -> Result<ApplyReport, ChatError> {
    let filter = SkillFilter::default();
    let (agent, skills) = futures_util::future::try_join(
        backend.agents.get_agent(agent_id),
        backend.registry.list_skills(&filter),
    )
    .await?;
    if let Some(unknown) = template
        .skill_ids
        .iter()
        .find(|skill_id| !skills.iter().any(|skill| &skill.id == *skill_id))
    {
        return Err(ChatError::not_found(ResourceKind::Skill, unknown.clone()));
    }

    let current = backend.bindings.list_bindings(&agent.id).await?;
    let ops = reconcile_template(&agent.id, template, &current);
    debug!(agent_id = %agent.id, template = %template.name, ops = ops.len(), "applying template");
    Ok(apply(backend.bindings.as_ref(), &agent.id, ops).await)
}
