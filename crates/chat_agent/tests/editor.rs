use std::collections::BTreeSet;
use std::sync::Arc;

use assert_matches::assert_matches;
use backend_mock::{MockBackend, StoreOp, DEMO_AGENT_ID};
use chat_agent::{apply_template_to_agent, AgentEditor, Backend};
use chat_contract::{ChatError, ConfigValue, ConfigValues, ResourceKind, SkillBinding};
use pretty_assertions::assert_eq;
use stockpilot::{BindingOp, SkillTemplate};

fn demo() -> (Arc<MockBackend>, Backend) {
    let store = Arc::new(MockBackend::demo());
    let backend = Backend::from_shared(store.clone());
    (store, backend)
}

fn enabled_skills(bindings: &[SkillBinding]) -> BTreeSet<&str> {
    bindings
        .iter()
        .filter(|binding| binding.is_enabled)
        .map(|binding| binding.skill_id.as_str())
        .collect()
}

#[tokio::test]
async fn load_reflects_persisted_bindings() {
    let (_store, backend) = demo();
    let editor = AgentEditor::load(&backend, DEMO_AGENT_ID)
        .await
        .expect("editor loads");

    assert_eq!(editor.agent().id, DEMO_AGENT_ID);
    assert_eq!(
        editor.enabled_skills().iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["market-quotes"]
    );
    assert!(editor.plan().is_empty());
}

#[tokio::test]
async fn preview_tracks_local_edits() {
    let (_store, backend) = demo();
    let mut editor = AgentEditor::load(&backend, DEMO_AGENT_ID)
        .await
        .expect("editor loads");

    assert!(editor.toggle_skill("technicals").expect("known skill"));
    let preview = editor.preview().expect("preview");

    assert_eq!(
        preview.enabled_tools.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["get_quote", "technical_analysis"]
    );
    assert_eq!(
        preview.tool_to_skills["get_quote"],
        vec!["market-quotes".to_string(), "technicals".to_string()]
    );
    assert!(preview.system_prompt.starts_with("You are a careful stock analysis assistant."));
    assert_eq!(preview.skill_count, 2);

    editor
        .set_override("technicals", Some("Use RSI only."))
        .expect("override");
    let overridden = editor.preview().expect("preview");
    assert!(overridden.system_prompt.ends_with("Use RSI only."));

    assert_eq!(
        editor.toggle_skill("missing"),
        Err(ChatError::not_found(ResourceKind::Skill, "missing"))
    );
}

#[tokio::test]
async fn checked_preview_agrees_with_store() {
    let (_store, backend) = demo();
    let mut editor = AgentEditor::load(&backend, DEMO_AGENT_ID)
        .await
        .expect("editor loads");
    editor
        .set_skill_enabled("news-digest", true)
        .expect("known skill");

    let check = editor.preview_checked().await.expect("preview");

    assert_eq!(check.mismatch, None);
    assert_eq!(check.local, editor.preview().expect("preview"));
}

#[tokio::test]
async fn save_writes_agent_then_minimal_binding_changes() {
    let (store, backend) = demo();
    let mut editor = AgentEditor::load(&backend, DEMO_AGENT_ID)
        .await
        .expect("editor loads");
    store.clear_ops();

    editor.set_skill_enabled("market-quotes", false).expect("skill");
    editor.set_skill_enabled("technicals", true).expect("skill");
    editor
        .set_override("technicals", Some("  Prefer weekly charts. "))
        .expect("override");
    editor.set_base_prompt("You are a cautious analyst.");

    let report = editor.save().await.expect("save");

    assert!(report.is_success());
    assert_eq!(report.applied.len(), 2);
    let ops = store.ops();
    assert_matches!(&ops[0], StoreOp::UpdateAgent { agent_id } if agent_id == DEMO_AGENT_ID);
    assert_eq!(store.binding_writes(), 2);

    let bindings = store.bindings_snapshot(DEMO_AGENT_ID);
    assert_eq!(enabled_skills(&bindings), BTreeSet::from(["technicals"]));
    let technicals = bindings
        .iter()
        .find(|binding| binding.skill_id == "technicals")
        .expect("created binding");
    assert_eq!(
        technicals.custom_prompt_override.as_deref(),
        Some("Prefer weekly charts.")
    );

    assert!(editor.plan().is_empty());
    store.clear_ops();
    let again = editor.save().await.expect("second save");
    assert!(again.applied.is_empty());
    assert_eq!(store.binding_writes(), 0);
}

#[tokio::test]
async fn failed_bindings_are_reported_and_retried_alone() {
    let (store, backend) = demo();
    store.fail_skill("news-digest");
    let mut editor = AgentEditor::load(&backend, DEMO_AGENT_ID)
        .await
        .expect("editor loads");
    editor.set_skill_enabled("technicals", true).expect("skill");
    editor.set_skill_enabled("news-digest", true).expect("skill");

    let report = editor.save().await.expect("save");

    assert_eq!(report.failed_skill_ids(), vec!["news-digest"]);
    assert_eq!(report.applied.len(), 1);
    assert_matches!(
        report.retry_operations().as_slice(),
        [BindingOp::Create { skill_id, enabled: true, .. }] if skill_id == "news-digest"
    );

    store.fail_skill("news-digest");
    let still_failing = editor.retry_failed().await;
    assert_eq!(still_failing.failed_skill_ids(), vec!["news-digest"]);

    store.clear_failures();
    store.clear_ops();
    let retried = editor.retry_failed().await;

    assert!(retried.is_success());
    assert_eq!(store.binding_writes(), 1);
    assert_eq!(
        enabled_skills(&store.bindings_snapshot(DEMO_AGENT_ID)),
        BTreeSet::from(["market-quotes", "news-digest", "technicals"])
    );
    assert!(editor.plan().is_empty());
    assert!(editor.retry_failed().await.applied.is_empty());
}

#[tokio::test]
async fn tool_configuration_is_validated_against_schema() {
    let (_store, backend) = demo();
    let mut editor = AgentEditor::load(&backend, DEMO_AGENT_ID)
        .await
        .expect("editor loads");

    let out_of_range = ConfigValues::from([("period".to_string(), ConfigValue::Number(500.0))]);
    assert_matches!(
        editor.set_tool_config("technical_analysis", out_of_range),
        Err(ChatError::Validation(_))
    );

    let valid = ConfigValues::from([("period".to_string(), ConfigValue::Number(20.0))]);
    editor
        .set_tool_config("technical_analysis", valid.clone())
        .expect("valid config");
    assert_eq!(editor.agent().tool_configs["technical_analysis"], valid);

    assert_eq!(
        editor.set_tool_config("options_chain", ConfigValues::new()),
        Err(ChatError::not_found(ResourceKind::Tool, "options_chain"))
    );
}

#[tokio::test]
async fn manual_tools_join_the_preview() {
    let (_store, backend) = demo();
    let mut editor = AgentEditor::load(&backend, DEMO_AGENT_ID)
        .await
        .expect("editor loads");

    editor.set_tool_enabled("search_news", true).expect("tool");
    editor.set_tool_enabled("search_news", true).expect("tool");
    assert_eq!(
        editor.agent().enabled_tools,
        vec!["get_quote".to_string(), "search_news".to_string()]
    );
    let preview = editor.preview().expect("preview");
    assert!(preview.enabled_tools.contains("search_news"));
    assert!(!preview.tool_to_skills.contains_key("search_news"));

    editor.set_tool_enabled("search_news", false).expect("tool");
    assert!(!editor.preview().expect("preview").enabled_tools.contains("search_news"));
}

#[tokio::test]
async fn local_template_sets_exactly_its_skills() {
    let (_store, backend) = demo();
    let mut editor = AgentEditor::load(&backend, DEMO_AGENT_ID)
        .await
        .expect("editor loads");

    editor
        .apply_template(&SkillTemplate::new("research", ["technicals", "news-digest"]))
        .expect("template");
    assert_eq!(
        editor.enabled_skills().iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["news-digest", "technicals"]
    );
    assert_eq!(editor.plan().len(), 3);

    assert_eq!(
        editor.apply_template(&SkillTemplate::new("bad", ["ghost"])),
        Err(ChatError::not_found(ResourceKind::Skill, "ghost"))
    );
    assert_eq!(editor.enabled_skills().len(), 2);
}

#[tokio::test]
async fn template_applied_to_store_replaces_enabled_set() {
    let (store, backend) = demo();
    store.seed_binding(DEMO_AGENT_ID, "technicals", false, Some("Weekly only."));
    store.clear_ops();
    let template = SkillTemplate::new("research", ["news-digest", "technicals"]);

    let report = apply_template_to_agent(&backend, DEMO_AGENT_ID, &template)
        .await
        .expect("template applies");

    assert!(report.is_success());
    assert_eq!(store.binding_writes(), 3);
    let bindings = store.bindings_snapshot(DEMO_AGENT_ID);
    assert_eq!(
        enabled_skills(&bindings),
        BTreeSet::from(["news-digest", "technicals"])
    );
    let technicals = bindings
        .iter()
        .find(|binding| binding.skill_id == "technicals")
        .expect("binding");
    assert_eq!(technicals.custom_prompt_override.as_deref(), Some("Weekly only."));

    store.clear_ops();
    let again = apply_template_to_agent(&backend, DEMO_AGENT_ID, &template)
        .await
        .expect("template applies");
    assert!(again.applied.is_empty());
    assert_eq!(store.binding_writes(), 0);

    assert_eq!(
        apply_template_to_agent(&backend, DEMO_AGENT_ID, &SkillTemplate::new("bad", ["ghost"]))
            .await,
        Err(ChatError::not_found(ResourceKind::Skill, "ghost"))
    );
    assert_matches!(
        apply_template_to_agent(&backend, "nobody", &template).await,
        Err(ChatError::NotFound {
            kind: ResourceKind::Agent,
            ..
        })
    );
}
