use chat_contract::CompositionResult;
use thiserror::Error;

/// Fields that differ between a locally composed result and the store's preview.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("composition preview mismatch in: {}", fields.join(", "))]
pub struct PreviewMismatch {
    pub fields: Vec<&'static str>,
}

/// Compares the local result with the remote preview field by field.
///
/// `estimated_tokens` is excluded since the store may estimate differently.
pub fn verify_preview(
    local: &CompositionResult,
    remote: &CompositionResult,
) -> Result<(), PreviewMismatch> {
    let mut fields = Vec::new();
    if local.system_prompt != remote.system_prompt {
        fields.push("system_prompt");
    }
    if local.enabled_tools != remote.enabled_tools {
        fields.push("enabled_tools");
    }
    if local.tool_to_skills != remote.tool_to_skills {
        fields.push("tool_to_skills");
    }
    if local.skill_count != remote.skill_count {
        fields.push("skill_count");
    }
    if local.base_prompt_length != remote.base_prompt_length {
        fields.push("base_prompt_length");
    }
    if local.full_prompt_length != remote.full_prompt_length {
        fields.push("full_prompt_length");
    }

    if fields.is_empty() {
        Ok(())
    } else {
        Err(PreviewMismatch { fields })
    }
}
