//! Demo catalogue and canned turns for local runs without a platform.

use async_trait::async_trait;
use chat_contract::{
    AgentConfig, ChatError, ConfigField, FieldKind, FrameStream, MessageRole, PersistedMessage,
    ResourceKind, SelectOption, Skill, Tool, ToolConfigSchema, TurnRequest, TurnTransport,
};
use serde_json::json;
use tracing::debug;

use crate::lock_unpoisoned;
use crate::script::{script_stream, ScriptStep};
use crate::store::MockBackend;

pub const DEMO_AGENT_ID: &str = "default";
pub const DEMO_MODEL: &str = "mock-analyst";
const TOKEN_DELAY_MS: u64 = 15;

impl MockBackend {
    /// Store seeded with three tools, three skills and one system agent.
    #[must_use]
    pub fn demo() -> Self {
        let backend = Self::new()
            .with_tools(demo_tools())
            .with_skills(demo_skills())
            .with_agent(AgentConfig {
                id: DEMO_AGENT_ID.to_string(),
                name: "Stock Assistant".to_string(),
                description: "General purpose market assistant".to_string(),
                system_prompt: "You are a careful stock analysis assistant.".to_string(),
                enabled_tools: vec!["get_quote".to_string()],
                is_default: true,
                is_system: true,
                ..AgentConfig::default()
            });
        backend.seed_binding(DEMO_AGENT_ID, "market-quotes", true, None);
        backend
    }
}

pub fn demo_tools() -> Vec<Tool> {
    vec![
        Tool {
            name: "get_quote".to_string(),
            description: "Latest price and daily change for a ticker".to_string(),
            parameter_schema: json!({
                "type": "object",
                "properties": {"symbol": {"type": "string"}},
                "required": ["symbol"]
            }),
            config_schema: Some(ToolConfigSchema::new(vec![ConfigField {
                key: "market".to_string(),
                label: "Market".to_string(),
                description: None,
                required: false,
                kind: FieldKind::Select {
                    options: ["us", "hk", "cn"]
                        .into_iter()
                        .map(|value| SelectOption {
                            value: value.to_string(),
                            label: value.to_uppercase(),
                        })
                        .collect(),
                    default: Some("us".to_string()),
                },
            }])),
        },
        Tool {
            name: "technical_analysis".to_string(),
            description: "Moving averages and momentum indicators".to_string(),
            parameter_schema: json!({
                "type": "object",
                "properties": {"symbol": {"type": "string"}, "period": {"type": "integer"}}
            }),
            config_schema: Some(ToolConfigSchema::new(vec![ConfigField {
                key: "period".to_string(),
                label: "Lookback period".to_string(),
                description: Some("Trading days".to_string()),
                required: false,
                kind: FieldKind::Number {
                    min: Some(5.0),
                    max: Some(250.0),
                    default: Some(14.0),
                },
            }])),
        },
        Tool {
            name: "search_news".to_string(),
            description: "Recent headlines for a company".to_string(),
            parameter_schema: json!({
                "type": "object",
                "properties": {"query": {"type": "string"}}
            }),
            config_schema: Some(ToolConfigSchema::new(vec![ConfigField {
                key: "include_social".to_string(),
                label: "Include social posts".to_string(),
                description: None,
                required: false,
                kind: FieldKind::Boolean { default: false },
            }])),
        },
    ]
}

pub fn demo_skills() -> Vec<Skill> {
    vec![
        Skill::new("market-quotes", "Market quotes")
            .with_category("market")
            .with_prompt("Quote live prices before commenting on a stock.")
            .with_tools(["get_quote"])
            .builtin(),
        Skill::new("technicals", "Technical analysis")
            .with_category("analysis")
            .with_prompt("Support views with moving averages and momentum.")
            .with_tools(["technical_analysis", "get_quote"]),
        Skill::new("news-digest", "News digest")
            .with_category("news")
            .with_prompt("Summarise recent headlines and their likely impact.")
            .with_tools(["search_news"]),
    ]
}

/// First token that looks like a ticker: two to five ASCII capitals.
fn find_symbol(request: &TurnRequest) -> Option<String> {
    if let Some(code) = request.stock_code.as_deref().map(str::trim) {
        if !code.is_empty() {
            return Some(code.to_uppercase());
        }
    }
    request
        .message
        .split_whitespace()
        .map(|word| word.trim_matches(|ch: char| !ch.is_ascii_alphanumeric()))
        .find(|word| {
            (2..=5).contains(&word.len()) && word.chars().all(|ch| ch.is_ascii_uppercase())
        })
        .map(str::to_string)
}

fn demo_price(symbol: &str) -> f64 {
    let seed: u32 = symbol.bytes().map(u32::from).sum();
    f64::from(seed % 400 + 20) + f64::from(seed % 100) / 100.0
}

#[async_trait]
impl TurnTransport for MockBackend {
    async fn open_turn(&self, request: TurnRequest) -> Result<FrameStream, ChatError> {
        if request.message.trim().is_empty() {
            return Err(ChatError::validation("message must not be empty"));
        }

        let (session_id, is_new) = match request.session_id.clone() {
            Some(session_id) => {
                if !lock_unpoisoned(&self.state).sessions.contains_key(&session_id) {
                    return Err(ChatError::not_found(ResourceKind::Session, session_id));
                }
                (session_id, false)
            }
            None => (uuid::Uuid::new_v4().to_string(), true),
        };

        let model_name = request
            .model_name
            .clone()
            .unwrap_or_else(|| DEMO_MODEL.to_string());
        let mut steps = vec![ScriptStep::session(&session_id, is_new)];
        let mut tool_rows = Vec::new();
        let mut tool_calls = 0;

        let reply = match find_symbol(&request) {
            Some(symbol) => {
                let args = json!({ "symbol": symbol });
                let result = format!("{symbol} last {:.2}", demo_price(&symbol));
                steps.push(ScriptStep::tool_call("get_quote", args.clone(), 1));
                steps.push(ScriptStep::delay_ms(TOKEN_DELAY_MS));
                steps.push(ScriptStep::tool_result("get_quote", &result));
                tool_rows.push(
                    PersistedMessage::new(MessageRole::ToolCall, "")
                        .with_tool("get_quote", Some(args)),
                );
                tool_rows.push(
                    PersistedMessage::new(MessageRole::ToolResult, result)
                        .with_tool("get_quote", None),
                );
                tool_calls = 1;
                format!("{symbol} is trading at {:.2} in this demo feed.", demo_price(&symbol))
            }
            None => "Ask about a ticker such as AAPL and I will look up a quote.".to_string(),
        };

        for (index, word) in reply.split(' ').enumerate() {
            let content = if index == 0 {
                word.to_string()
            } else {
                format!(" {word}")
            };
            steps.push(ScriptStep::delay_ms(TOKEN_DELAY_MS));
            steps.push(ScriptStep::token(&content));
        }

        // An edited message is already stored as the last row; it is not stored twice.
        let resubmitted = self
            .session_messages(&session_id)
            .last()
            .is_some_and(|last| last.role == MessageRole::User && last.content == request.message);
        let mut rows = Vec::new();
        if !resubmitted {
            rows.push(PersistedMessage::new(MessageRole::User, request.message.clone()));
        }
        let mut assistant = PersistedMessage::new(MessageRole::Assistant, reply);
        assistant.model_name = Some(model_name.clone());
        assistant.response_time_ms = Some(42);
        rows.push(assistant);
        rows.extend(tool_rows);

        self.append_messages(&session_id, Some(&model_name), rows);
        let message_id = self
            .session_messages(&session_id)
            .iter()
            .rev()
            .find(|message| message.role == MessageRole::Assistant)
            .and_then(|message| message.id.clone())
            .unwrap_or_default();
        steps.push(ScriptStep::done(&session_id, &message_id, tool_calls));

        debug!(session_id = %session_id, is_new, tool_calls, "mock turn opened");
        Ok(script_stream(steps))
    }
}
