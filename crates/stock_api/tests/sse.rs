use assert_matches::assert_matches;
use chat_contract::{ChatError, TurnFrame};
use pretty_assertions::assert_eq;
use serde_json::json;
use stock_api::FrameParser;

#[test]
fn sse_framing_parses_every_tag_in_order() {
    let payload = concat!(
        "event: session\ndata: {\"session_id\":\"s1\",\"is_new\":true}\n\n",
        "event: tool_call\ndata: {\"name\":\"get_quote\",\"args\":{\"symbol\":\"AAPL\"},\"round\":1}\n\n",
        "event: token\ndata: {\"content\":\"Price\"}\n\n",
        "event: tool_result\ndata: {\"name\":\"get_quote\",\"result\":\"123\"}\n\n",
        "event: token\ndata: {\"content\":\" is 123\"}\n\n",
        "event: done\ndata: {\"session_id\":\"s1\",\"message_id\":9,\"tool_calls_count\":1,\"response_time_ms\":640}\n\n",
    );

    let frames: Vec<TurnFrame> = FrameParser::parse_all(payload)
        .into_iter()
        .map(|frame| frame.expect("every frame is valid"))
        .collect();

    let tags: Vec<&str> = frames.iter().map(TurnFrame::tag).collect();
    assert_eq!(
        tags,
        vec!["session", "tool_call", "token", "tool_result", "token", "done"]
    );
    assert_eq!(
        frames[1],
        TurnFrame::ToolCall {
            name: "get_quote".to_string(),
            args: json!({"symbol": "AAPL"}),
            round: 1,
        }
    );
}

#[test]
fn sse_parser_accepts_crlf_and_ignores_comments() {
    let payload = ": keep-alive\r\nevent: token\r\ndata: {\"content\":\"A\"}\r\n\r\n: ping\r\n";

    let frames = FrameParser::parse_all(payload);
    assert_eq!(
        frames,
        vec![Ok(TurnFrame::Token {
            content: "A".to_string()
        })]
    );
}

#[test]
fn sse_parser_buffers_frames_split_across_reads() {
    let payload = "event: token\ndata: {\"content\":\"caf\u{e9} \u{1f4c8}\"}\n\n".as_bytes();
    let mut parser = FrameParser::default();
    let mut frames = Vec::new();

    for byte in payload {
        frames.extend(parser.feed(std::slice::from_ref(byte)));
    }

    assert_eq!(
        frames,
        vec![Ok(TurnFrame::Token {
            content: "caf\u{e9} \u{1f4c8}".to_string()
        })]
    );
}

#[test]
fn sse_parser_reports_unknown_malformed_and_orphan_frames() {
    let payload = concat!(
        "event: heartbeat\ndata: {}\n\n",
        "event: token\ndata: {oops\n\n",
        "data: {\"content\":\"orphan\"}\n\n",
        "event: token\ndata: {\"content\":\"kept\"}\n\n",
    );

    let frames = FrameParser::parse_all(payload);

    assert_eq!(frames.len(), 4);
    assert_matches!(&frames[0], Err(ChatError::StreamProtocol(message)) if message.contains("heartbeat"));
    assert_matches!(&frames[1], Err(ChatError::StreamProtocol(_)));
    assert_matches!(&frames[2], Err(ChatError::StreamProtocol(_)));
    assert_eq!(
        frames[3],
        Ok(TurnFrame::Token {
            content: "kept".to_string()
        })
    );
}

#[test]
fn sse_parser_discards_trailing_partial_line() {
    let mut parser = FrameParser::default();
    let frames = parser.feed(b"event: token\ndata: {\"content\":\"never terminated\"}");
    assert!(frames.is_empty());
    assert!(!parser.is_empty_buffer());

    parser.finish();
    assert!(parser.is_empty_buffer());
}
