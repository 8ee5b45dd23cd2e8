use chat_contract::frame::normalize_args;
use chat_contract::{MessageRole, PersistedMessage};
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::warn;

use crate::display::{DisplayMessage, ToolCallRecord};

/// Rebuilds display entries from flat persisted rows, oldest first.
///
/// `user` and `assistant` rows start entries. `toolCall` rows become `done`
/// records on the assistant entry of the current turn, and `toolResult` rows
/// attach to the first same-named record still lacking a result. Never fails:
/// malformed args degrade to `{}` and orphan results are dropped.
#[must_use]
pub fn reconstruct(rows: &[PersistedMessage]) -> Vec<DisplayMessage> {
    let mut entries: Vec<DisplayMessage> = Vec::new();
    // Assistant entry of the current turn and whether it was synthesized to
    // host tool rows that arrived before any assistant row.
    let mut host: Option<(usize, bool)> = None;

    for (row_index, row) in rows.iter().enumerate() {
        match row.role {
            MessageRole::User => {
                let mut entry = DisplayMessage::user(row.content.clone());
                fill_metadata(&mut entry, row, row_index);
                entries.push(entry);
                host = None;
            }
            MessageRole::Assistant => match host {
                Some((index, true)) => {
                    let entry = &mut entries[index];
                    entry.content = row.content.clone();
                    fill_metadata(entry, row, row_index);
                    host = Some((index, false));
                }
                _ => {
                    let mut entry = DisplayMessage::assistant(row.content.clone());
                    fill_metadata(&mut entry, row, row_index);
                    entries.push(entry);
                    host = Some((entries.len() - 1, false));
                }
            },
            MessageRole::ToolCall => {
                let index = match host {
                    Some((index, _)) => index,
                    None => {
                        entries.push(DisplayMessage::assistant(String::new()));
                        let index = entries.len() - 1;
                        host = Some((index, true));
                        index
                    }
                };
                let name = tool_name(row);
                let args = row
                    .tool_args
                    .clone()
                    .map(normalize_args)
                    .unwrap_or_else(|| Value::Object(Map::new()));
                entries[index]
                    .tool_calls
                    .push(ToolCallRecord::done(name, args));
            }
            MessageRole::ToolResult => {
                let name = tool_name(row);
                let Some((index, _)) = host else {
                    warn!(row = row_index, tool = %name, "tool result row without a tool call; dropped");
                    continue;
                };
                let records = &mut entries[index].tool_calls;
                let target = records
                    .iter()
                    .position(|record| record.result.is_none() && record.name == name)
                    .or_else(|| records.len().checked_sub(1));
                match target {
                    Some(position) => records[position].result = Some(row.content.clone()),
                    None => {
                        warn!(row = row_index, tool = %name, "tool result row on an entry without tool calls; dropped");
                    }
                }
            }
        }
    }

    entries
}

fn tool_name(row: &PersistedMessage) -> String {
    row.tool_name.clone().unwrap_or_default()
}

fn fill_metadata(entry: &mut DisplayMessage, row: &PersistedMessage, row_index: usize) {
    entry.id = row.id.clone();
    entry.model_name = row.model_name.clone();
    entry.response_time_ms = row.response_time_ms;
    entry.created_at = row
        .created_at
        .as_deref()
        .filter(|value| {
            let valid = is_rfc3339(value);
            if !valid {
                warn!(row = row_index, value = %value, "ignoring non-RFC3339 created_at");
            }
            valid
        })
        .map(str::to_string);
}

#[must_use]
pub fn is_rfc3339(value: &str) -> bool {
    OffsetDateTime::parse(value, &Rfc3339).is_ok()
}
