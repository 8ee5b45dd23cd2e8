use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use backend_mock::{MockBackend, ScriptStep, ScriptedTransport, StoreOp};
use chat_agent::turn::{CANCELLED_MARKER, STREAM_ENDED_UNEXPECTEDLY};
use chat_agent::{Backend, SessionController, TurnSettings, TurnState};
use chat_contract::{ChatError, MessageRole, PersistedMessage};
use pretty_assertions::assert_eq;
use serde_json::json;
use transcript::ToolCallStatus;

fn scripted() -> (Arc<ScriptedTransport>, Arc<MockBackend>, Backend) {
    let transport = Arc::new(ScriptedTransport::new());
    let store = Arc::new(MockBackend::demo());
    let backend = Backend {
        turns: transport.clone(),
        ..Backend::from_shared(store.clone())
    };
    (transport, store, backend)
}

fn answer(session_id: &str, message_id: &str, text: &str) -> Vec<ScriptStep> {
    vec![
        ScriptStep::session(session_id, false),
        ScriptStep::token(text),
        ScriptStep::done(session_id, message_id, 0),
    ]
}

async fn wait_for_content(controller: &SessionController, index: usize, expected: &str) {
    for _ in 0..400 {
        let content = controller.with_transcript(|transcript| {
            transcript
                .get(index)
                .map(|entry| entry.content.clone())
                .unwrap_or_default()
        });
        if content == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("entry {index} never reached {expected:?}");
}

#[tokio::test]
async fn tool_call_and_tokens_fold_into_one_assistant_entry() {
    let (transport, _store, backend) = scripted();
    transport.push_turn(vec![
        ScriptStep::session("s1", true),
        ScriptStep::tool_call("get_quote", json!({"symbol": "AAPL"}), 1),
        ScriptStep::token("Price"),
        ScriptStep::tool_result("get_quote", "123"),
        ScriptStep::token(" is 123"),
        ScriptStep::done("s1", "m2", 1),
    ]);
    let controller = SessionController::new(&backend, TurnSettings::default());

    let outcome = controller.send("AAPL price?").await.expect("turn starts");

    assert_eq!(outcome.state, TurnState::Completed);
    assert!(outcome.is_new_session);
    assert_eq!(outcome.session_id.as_deref(), Some("s1"));
    assert_eq!(
        outcome.usage.and_then(|usage| usage.message_id).as_deref(),
        Some("m2")
    );

    let transcript = controller.transcript();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript.entries()[0].content, "AAPL price?");
    let assistant = &transcript.entries()[1];
    assert_eq!(assistant.content, "Price is 123");
    assert!(!assistant.streaming);
    assert_eq!(assistant.id.as_deref(), Some("m2"));
    assert_eq!(assistant.tool_calls.len(), 1);
    assert_eq!(assistant.tool_calls[0].status, ToolCallStatus::Done);
    assert_eq!(assistant.tool_calls[0].result.as_deref(), Some("123"));
    assert_eq!(controller.session_id().as_deref(), Some("s1"));
    assert!(!controller.is_streaming());
}

#[tokio::test]
async fn abort_after_two_tokens_ends_aborted_with_marker() {
    let (transport, _store, backend) = scripted();
    transport.push_turn(vec![
        ScriptStep::session("s1", true),
        ScriptStep::token("Price"),
        ScriptStep::token(" is"),
        ScriptStep::Hang,
        ScriptStep::done("s1", "m2", 0),
    ]);
    let controller = SessionController::new(&backend, TurnSettings::default());

    let task = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.send("AAPL?").await }
    });
    wait_for_content(&controller, 1, "Price is").await;

    assert!(controller.is_streaming());
    assert_matches!(
        controller.send("another question").await,
        Err(ChatError::Validation(_))
    );
    assert!(controller.abort());

    let outcome = task.await.expect("task joins").expect("turn starts");
    assert_eq!(outcome.state, TurnState::Aborted);
    let assistant = controller.transcript().entries()[1].clone();
    assert_eq!(assistant.content, format!("Price is{CANCELLED_MARKER}"));
    assert!(!assistant.streaming);
    assert!(assistant.error.is_none());
    assert!(!controller.is_streaming());
    assert!(!controller.abort());
}

#[tokio::test]
async fn open_failure_leaves_error_notice() {
    let (transport, _store, backend) = scripted();
    transport.push_open_failure(ChatError::transport("connection refused"));
    let controller = SessionController::new(&backend, TurnSettings::default());

    let outcome = controller.send("hi").await.expect("turn starts");

    assert_eq!(outcome.state, TurnState::Errored);
    assert_eq!(
        outcome.error.as_deref(),
        Some("transport error: connection refused")
    );
    let transcript = controller.transcript();
    assert_eq!(transcript.len(), 2);
    assert_eq!(
        transcript.entries()[1].error.as_deref(),
        Some("transport error: connection refused")
    );
    assert!(!transcript.is_streaming());
}

#[tokio::test]
async fn transport_failure_mid_stream_keeps_partial_text() {
    let (transport, _store, backend) = scripted();
    transport.push_turn(vec![
        ScriptStep::session("s1", true),
        ScriptStep::token("Partial"),
        ScriptStep::Fail(ChatError::transport("connection reset")),
    ]);
    let controller = SessionController::new(&backend, TurnSettings::default());

    let outcome = controller.send("hi").await.expect("turn starts");

    assert_eq!(outcome.state, TurnState::Errored);
    let assistant = controller.transcript().entries()[1].clone();
    assert_eq!(assistant.content, "Partial");
    assert_eq!(
        assistant.error.as_deref(),
        Some("transport error: connection reset")
    );
}

#[tokio::test]
async fn close_without_done_is_errored() {
    let (transport, _store, backend) = scripted();
    transport.push_turn(vec![
        ScriptStep::session("s1", true),
        ScriptStep::token("Half"),
    ]);
    let controller = SessionController::new(&backend, TurnSettings::default());

    let outcome = controller.send("hi").await.expect("turn starts");

    assert_eq!(outcome.state, TurnState::Errored);
    assert_eq!(outcome.error.as_deref(), Some(STREAM_ENDED_UNEXPECTEDLY));
    assert_eq!(controller.transcript().entries()[1].content, "Half");
}

#[tokio::test]
async fn malformed_frames_are_dropped_without_ending_the_turn() {
    let (transport, _store, backend) = scripted();
    transport.push_turn(vec![
        ScriptStep::session("s1", true),
        ScriptStep::Malformed("unknown tag 'heartbeat'".to_string()),
        ScriptStep::token("ok"),
        ScriptStep::done("s1", "m2", 0),
    ]);
    let controller = SessionController::new(&backend, TurnSettings::default());

    let outcome = controller.send("hi").await.expect("turn starts");

    assert_eq!(outcome.state, TurnState::Completed);
    assert_eq!(outcome.dropped_frames, 1);
    assert_eq!(controller.transcript().entries()[1].content, "ok");
}

#[tokio::test]
async fn turn_timeout_is_an_error() {
    let (transport, _store, backend) = scripted();
    transport.push_turn(vec![
        ScriptStep::session("s1", true),
        ScriptStep::token("thinking"),
        ScriptStep::Hang,
    ]);
    let settings = TurnSettings {
        timeout: Some(Duration::from_millis(80)),
        ..TurnSettings::default()
    };
    let controller = SessionController::new(&backend, settings);

    let outcome = controller.send("hi").await.expect("turn starts");

    assert_eq!(outcome.state, TurnState::Errored);
    assert!(outcome
        .error
        .as_deref()
        .is_some_and(|error| error.contains("timed out")));
    assert_eq!(controller.transcript().entries()[1].content, "thinking");
}

#[tokio::test]
async fn follow_up_turn_reuses_session_and_settings() {
    let (transport, _store, backend) = scripted();
    transport.push_turn(answer("s1", "m2", "first"));
    transport.push_turn(answer("s1", "m4", "second"));
    let settings = TurnSettings {
        agent_id: Some("default".to_string()),
        model_name: Some("analyst".to_string()),
        stock_code: Some("AAPL".to_string()),
        timeout: None,
    };
    let controller = SessionController::new(&backend, settings);

    controller.send("one").await.expect("first turn");
    controller.send("two").await.expect("second turn");

    let requests = transport.requests();
    assert_eq!(requests[0].session_id, None);
    assert_eq!(requests[1].session_id.as_deref(), Some("s1"));
    assert_eq!(requests[1].agent_id.as_deref(), Some("default"));
    assert_eq!(requests[1].model_name.as_deref(), Some("analyst"));
    assert_eq!(requests[1].stock_code.as_deref(), Some("AAPL"));
    let transcript = controller.transcript();
    assert_eq!(transcript.len(), 4);
    assert_eq!(transcript.entries()[3].model_name.as_deref(), Some("analyst"));
}

#[tokio::test]
async fn regenerate_resubmits_last_user_message() {
    let (transport, _store, backend) = scripted();
    transport.push_turn(answer("s1", "m2", "draft answer"));
    transport.push_turn(answer("s1", "m4", "better answer"));
    let controller = SessionController::new(&backend, TurnSettings::default());

    controller.send("Summarise AAPL").await.expect("first turn");
    let outcome = controller.regenerate().await.expect("regenerate");

    assert_eq!(outcome.state, TurnState::Completed);
    let transcript = controller.transcript();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript.entries()[0].content, "Summarise AAPL");
    assert_eq!(transcript.entries()[1].content, "better answer");
    assert_eq!(transport.requests()[1].message, "Summarise AAPL");
}

#[tokio::test]
async fn regenerate_without_history_is_rejected() {
    let (_transport, _store, backend) = scripted();
    let controller = SessionController::new(&backend, TurnSettings::default());

    assert_matches!(
        controller.regenerate().await,
        Err(ChatError::Validation(_))
    );
    assert!(!controller.is_streaming());
}

#[tokio::test]
async fn duplicate_tool_names_pair_with_most_recent_open_call() {
    let (transport, _store, backend) = scripted();
    transport.push_turn(vec![
        ScriptStep::session("s1", true),
        ScriptStep::tool_call("get_quote", json!({"symbol": "AAPL"}), 1),
        ScriptStep::tool_call("get_quote", json!({"symbol": "MSFT"}), 1),
        ScriptStep::tool_result("get_quote", "410"),
        ScriptStep::tool_result("get_quote", "189"),
        ScriptStep::tool_result("get_quote", "stray"),
        ScriptStep::done("s1", "m2", 2),
    ]);
    let controller = SessionController::new(&backend, TurnSettings::default());

    let outcome = controller.send("compare").await.expect("turn starts");

    assert_eq!(outcome.dropped_frames, 1);
    let calls = controller.transcript().entries()[1].tool_calls.clone();
    let results: Vec<Option<&str>> = calls.iter().map(|call| call.result.as_deref()).collect();
    assert_eq!(results, vec![Some("189"), Some("410")]);
    assert!(calls.iter().all(|call| call.status == ToolCallStatus::Done));
}

#[tokio::test]
async fn streamed_text_is_only_ever_appended() {
    let store = Arc::new(MockBackend::demo());
    let backend = Backend::from_shared(store);
    let controller = SessionController::new(&backend, TurnSettings::default());

    let task = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.send("How is AAPL today?").await }
    });

    let mut snapshots: Vec<String> = Vec::new();
    while !task.is_finished() {
        let content = controller.with_transcript(|transcript| {
            transcript.get(1).map(|entry| entry.content.clone())
        });
        if let Some(content) = content {
            snapshots.push(content);
        }
        tokio::time::sleep(Duration::from_millis(3)).await;
    }
    let outcome = task.await.expect("task joins").expect("turn starts");
    snapshots.push(controller.transcript().entries()[1].content.clone());

    assert_eq!(outcome.state, TurnState::Completed);
    for pair in snapshots.windows(2) {
        assert!(
            pair[1].starts_with(&pair[0]),
            "{:?} rewrote {:?}",
            pair[1],
            pair[0]
        );
    }
    assert_eq!(controller.transcript().entries()[0].content, "How is AAPL today?");
}

#[tokio::test]
async fn edit_and_regenerate_rewrites_store_then_streams() {
    let store = Arc::new(MockBackend::demo());
    let backend = Backend::from_shared(store.clone());
    let controller = SessionController::new(&backend, TurnSettings::default());

    controller.send("How is AAPL?").await.expect("first turn");
    controller.send("And MSFT?").await.expect("second turn");
    let session_id = controller.session_id().expect("session bound");
    store.clear_ops();

    let outcome = controller
        .edit_and_regenerate(2, "And NVDA?")
        .await
        .expect("edit");

    assert_eq!(outcome.state, TurnState::Completed);
    let ops = store.ops();
    assert_matches!(&ops[0], StoreOp::UpdateMessage { content, .. } if content == "And NVDA?");
    assert_matches!(&ops[1], StoreOp::DeleteMessagesAfter { deleted: 3, .. });

    let transcript = controller.transcript();
    assert_eq!(transcript.len(), 4);
    assert_eq!(transcript.entries()[2].content, "And NVDA?");
    assert!(transcript.entries()[3].content.contains("NVDA"));

    let stored = store.session_messages(&session_id);
    let users: Vec<&str> = stored
        .iter()
        .filter(|message| message.role == MessageRole::User)
        .map(|message| message.content.as_str())
        .collect();
    assert_eq!(users, vec!["How is AAPL?", "And NVDA?"]);
    assert_eq!(stored.len(), 8);
}

#[tokio::test]
async fn edit_rejects_assistant_entries_without_writing() {
    let store = Arc::new(MockBackend::demo());
    let backend = Backend::from_shared(store.clone());
    let controller = SessionController::new(&backend, TurnSettings::default());
    controller.send("How is AAPL?").await.expect("first turn");
    store.clear_ops();

    assert_matches!(
        controller.edit_and_regenerate(1, "nope").await,
        Err(ChatError::Validation(_))
    );
    assert_matches!(
        controller.edit_and_regenerate(9, "nope").await,
        Err(ChatError::Validation(_))
    );
    assert!(store.ops().is_empty());
    assert_eq!(controller.transcript().len(), 2);
}

#[tokio::test]
async fn resumed_session_can_be_edited_by_stored_id() {
    let store = Arc::new(MockBackend::demo().with_session(
        "s9",
        vec![
            PersistedMessage::new(MessageRole::User, "hello").with_id("m1"),
            PersistedMessage::new(MessageRole::Assistant, "Quote follows.").with_id("m2"),
            PersistedMessage::new(MessageRole::ToolCall, "")
                .with_id("m3")
                .with_tool("get_quote", Some(json!({"symbol": "AAPL"}))),
            PersistedMessage::new(MessageRole::ToolResult, "189.2")
                .with_id("m4")
                .with_tool("get_quote", None),
        ],
    ));
    let backend = Backend::from_shared(store.clone());
    let controller = SessionController::new(&backend, TurnSettings::default());

    let session = controller.resume("s9").await.expect("resume");
    assert_eq!(session.id, "s9");
    let transcript = controller.transcript();
    assert_eq!(transcript.len(), 2);
    assert_eq!(
        transcript.entries()[1].tool_calls[0].result.as_deref(),
        Some("189.2")
    );

    controller
        .edit_and_regenerate(0, "hello again")
        .await
        .expect("edit");

    assert_eq!(
        store.ops()[..2].to_vec(),
        vec![
            StoreOp::UpdateMessage {
                session_id: "s9".to_string(),
                message_id: "m1".to_string(),
                content: "hello again".to_string(),
            },
            StoreOp::DeleteMessagesAfter {
                session_id: "s9".to_string(),
                message_id: "m1".to_string(),
                deleted: 3,
            },
        ]
    );
    assert_eq!(controller.transcript().entries()[0].content, "hello again");
}

#[tokio::test]
async fn resume_of_unknown_session_is_not_found() {
    let (_transport, _store, backend) = scripted();
    let controller = SessionController::new(&backend, TurnSettings::default());

    assert_matches!(
        controller.resume("missing").await,
        Err(ChatError::NotFound { .. })
    );
    assert!(controller.transcript().is_empty());
}
