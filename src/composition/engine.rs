use std::collections::{BTreeMap, BTreeSet, HashSet};

use chat_contract::{normalize_override, ChatError, CompositionResult, ResourceKind, Skill};
use thiserror::Error;

/// Separator placed between the base prompt and each skill fragment.
pub const PROMPT_DELIMITER: &str = "\n\n";
/// Fixed divisor for the character-based token estimate.
pub const CHARS_PER_TOKEN: usize = 4;

/// Per-skill prompt overrides keyed by skill id. `None` or blank means "use the template".
pub type PromptOverrides = BTreeMap<String, Option<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    #[error("nothing to compose: the prompt is empty and no tools are enabled")]
    Empty,
    #[error("unknown skill id '{0}'")]
    UnknownSkill(String),
}

impl From<ComposeError> for ChatError {
    fn from(error: ComposeError) -> Self {
        match error {
            ComposeError::Empty => ChatError::validation(error.to_string()),
            ComposeError::UnknownSkill(id) => ChatError::not_found(ResourceKind::Skill, id),
        }
    }
}

/// Resolves the effective system prompt and tool set.
///
/// Selected skills are visited in the order of `skills`, so identical inputs
/// always produce byte-identical output. A skill id listed twice in `skills`
/// is only applied once.
pub fn compose(
    base_prompt: &str,
    skills: &[Skill],
    enabled_skill_ids: &BTreeSet<String>,
    manual_tools: &BTreeSet<String>,
    overrides: &PromptOverrides,
) -> Result<CompositionResult, ComposeError> {
    if let Some(unknown) = enabled_skill_ids
        .iter()
        .find(|id| !skills.iter().any(|skill| &skill.id == *id))
    {
        return Err(ComposeError::UnknownSkill(unknown.clone()));
    }

    let mut seen = HashSet::new();
    let selected: Vec<&Skill> = skills
        .iter()
        .filter(|skill| enabled_skill_ids.contains(&skill.id))
        .filter(|skill| seen.insert(skill.id.as_str()))
        .collect();

    let mut system_prompt = String::new();
    push_fragment(&mut system_prompt, base_prompt);

    let mut enabled_tools = manual_tools.clone();
    let mut tool_to_skills: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for skill in &selected {
        let fragment = overrides
            .get(&skill.id)
            .and_then(|value| normalize_override(value.as_deref()))
            .unwrap_or(&skill.prompt_template);
        push_fragment(&mut system_prompt, fragment);

        for tool in skill.bound_tools() {
            enabled_tools.insert(tool.to_string());
            let owners = tool_to_skills.entry(tool.to_string()).or_default();
            if !owners.contains(&skill.id) {
                owners.push(skill.id.clone());
            }
        }
    }

    if system_prompt.is_empty() && enabled_tools.is_empty() {
        return Err(ComposeError::Empty);
    }

    let full_prompt_length = system_prompt.chars().count();

    Ok(CompositionResult {
        system_prompt,
        enabled_tools,
        tool_to_skills,
        skill_count: selected.len(),
        estimated_tokens: estimate_tokens(full_prompt_length),
        base_prompt_length: base_prompt.chars().count(),
        full_prompt_length,
    })
}

/// Cheap, monotonic token approximation. A UX hint, never billed usage.
#[must_use]
pub fn estimate_tokens(chars: usize) -> usize {
    chars.div_ceil(CHARS_PER_TOKEN)
}

fn push_fragment(prompt: &mut String, fragment: &str) {
    if fragment.trim().is_empty() {
        return;
    }
    if !prompt.is_empty() {
        prompt.push_str(PROMPT_DELIMITER);
    }
    prompt.push_str(fragment);
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn ids(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|value| (*value).to_string()).collect()
    }

    fn catalogue() -> Vec<Skill> {
        vec![
            Skill::new("s2", "Technicals")
                .with_prompt("Explain indicators.")
                .with_tools(["technical_analysis", "get_quote"]),
            Skill::new("s1", "Quotes")
                .with_prompt("Use quotes.")
                .with_tools(["get_quote"]),
            Skill::new("s3", "News")
                .with_prompt("Cite headlines.")
                .with_tools(["search_news"]),
        ]
    }

    #[test]
    fn single_skill_contributes_prompt_and_tool() {
        let skills = vec![Skill::new("s1", "Quotes")
            .with_prompt("Use quotes.")
            .with_tools(["get_quote"])];

        let result = compose(
            "You are helpful.",
            &skills,
            &ids(&["s1"]),
            &BTreeSet::new(),
            &PromptOverrides::new(),
        )
        .expect("composition should succeed");

        assert_eq!(result.enabled_tools, ids(&["get_quote"]));
        assert_eq!(result.system_prompt, "You are helpful.\n\nUse quotes.");
        assert_eq!(result.skill_count, 1);
        assert_eq!(result.base_prompt_length, 16);
        assert_eq!(result.full_prompt_length, 29);
        assert_eq!(result.estimated_tokens, 8);
    }

    #[test]
    fn fragments_follow_catalogue_order_not_id_order() {
        let result = compose(
            "Base.",
            &catalogue(),
            &ids(&["s1", "s2"]),
            &BTreeSet::new(),
            &PromptOverrides::new(),
        )
        .expect("composition should succeed");

        assert_eq!(
            result.system_prompt,
            "Base.\n\nExplain indicators.\n\nUse quotes."
        );
        assert_eq!(
            result.tool_to_skills.get("get_quote"),
            Some(&vec!["s2".to_string(), "s1".to_string()])
        );
    }

    #[test]
    fn repeated_calls_are_byte_identical() {
        let skills = catalogue();
        let enabled = ids(&["s3", "s1"]);
        let manual = ids(&["export_csv"]);
        let mut overrides = PromptOverrides::new();
        overrides.insert("s3".to_string(), Some("Only cite Reuters.".to_string()));

        let first = compose("Base.", &skills, &enabled, &manual, &overrides).expect("first");
        for _ in 0..8 {
            let again = compose("Base.", &skills, &enabled, &manual, &overrides).expect("again");
            assert_eq!(again, first);
        }
    }

    #[test]
    fn enabled_tools_is_union_of_manual_and_skill_bound_tools() {
        let skills = catalogue();
        let manual = ids(&["export_csv", "get_quote"]);

        let result = compose(
            "",
            &skills,
            &ids(&["s2", "s3"]),
            &manual,
            &PromptOverrides::new(),
        )
        .expect("composition should succeed");
        assert_eq!(
            result.enabled_tools,
            ids(&["export_csv", "get_quote", "search_news", "technical_analysis"])
        );

        // Dropping s2 removes technical_analysis but keeps get_quote, which is manual.
        let result = compose("", &skills, &ids(&["s3"]), &manual, &PromptOverrides::new())
            .expect("composition should succeed");
        assert_eq!(
            result.enabled_tools,
            ids(&["export_csv", "get_quote", "search_news"])
        );
        assert!(!result.tool_to_skills.contains_key("get_quote"));
    }

    #[test]
    fn shared_tool_survives_removal_of_one_owner() {
        let skills = catalogue();
        let result = compose(
            "Base.",
            &skills,
            &ids(&["s1"]),
            &BTreeSet::new(),
            &PromptOverrides::new(),
        )
        .expect("composition should succeed");
        assert_eq!(result.enabled_tools, ids(&["get_quote"]));
    }

    #[test]
    fn override_replaces_template_unless_blank() {
        let skills = catalogue();
        let mut overrides = PromptOverrides::new();
        overrides.insert("s1".to_string(), Some("Quote in USD.".to_string()));
        overrides.insert("s3".to_string(), Some("   ".to_string()));

        let result = compose(
            "",
            &skills,
            &ids(&["s1", "s3"]),
            &BTreeSet::new(),
            &overrides,
        )
        .expect("composition should succeed");
        assert_eq!(result.system_prompt, "Quote in USD.\n\nCite headlines.");
    }

    #[test]
    fn empty_base_prompt_is_legal() {
        let result = compose(
            "",
            &catalogue(),
            &ids(&["s3"]),
            &BTreeSet::new(),
            &PromptOverrides::new(),
        )
        .expect("skills alone may define behavior");
        assert_eq!(result.system_prompt, "Cite headlines.");
        assert_eq!(result.base_prompt_length, 0);
    }

    #[test]
    fn manual_tools_alone_are_enough() {
        let result = compose(
            "",
            &[],
            &BTreeSet::new(),
            &ids(&["get_quote"]),
            &PromptOverrides::new(),
        )
        .expect("tools alone are composable");
        assert_eq!(result.system_prompt, "");
        assert_eq!(result.estimated_tokens, 0);
    }

    #[test]
    fn nothing_to_compose_is_a_validation_error() {
        let error = compose(
            "  ",
            &[],
            &BTreeSet::new(),
            &BTreeSet::new(),
            &PromptOverrides::new(),
        )
        .expect_err("empty composition must fail");
        assert_eq!(error, ComposeError::Empty);
        assert!(matches!(ChatError::from(error), ChatError::Validation(_)));
    }

    #[test]
    fn unknown_enabled_skill_is_reported() {
        let error = compose(
            "Base.",
            &catalogue(),
            &ids(&["s1", "s9"]),
            &BTreeSet::new(),
            &PromptOverrides::new(),
        )
        .expect_err("unknown skill must fail");
        assert_eq!(error, ComposeError::UnknownSkill("s9".to_string()));
        assert_eq!(
            ChatError::from(error),
            ChatError::not_found(ResourceKind::Skill, "s9")
        );
    }

    #[test]
    fn duplicate_catalogue_entries_apply_once() {
        let mut skills = catalogue();
        skills.push(Skill::new("s1", "Quotes again").with_prompt("Duplicate."));

        let result = compose(
            "",
            &skills,
            &ids(&["s1"]),
            &BTreeSet::new(),
            &PromptOverrides::new(),
        )
        .expect("composition should succeed");
        assert_eq!(result.system_prompt, "Use quotes.");
        assert_eq!(result.skill_count, 1);
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(0), 0);
        assert_eq!(estimate_tokens(1), 1);
        assert_eq!(estimate_tokens(4), 1);
        assert_eq!(estimate_tokens(5), 2);
    }
}
