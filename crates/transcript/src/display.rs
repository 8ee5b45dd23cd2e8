use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Calling,
    Done,
}

/// One tool invocation hosted by an assistant entry, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub args: Value,
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default)]
    pub round: u32,
}

impl ToolCallRecord {
    #[must_use]
    pub fn calling(name: impl Into<String>, args: Value, round: u32) -> Self {
        Self {
            name: name.into(),
            args,
            status: ToolCallStatus::Calling,
            result: None,
            round,
        }
    }

    #[must_use]
    pub fn done(name: impl Into<String>, args: Value) -> Self {
        Self {
            status: ToolCallStatus::Done,
            ..Self::calling(name, args, 0)
        }
    }

    #[must_use]
    pub fn is_calling(&self) -> bool {
        self.status == ToolCallStatus::Calling
    }

    pub fn close(&mut self, result: Option<String>) {
        self.status = ToolCallStatus::Done;
        if result.is_some() {
            self.result = result;
        }
    }
}

/// One transcript entry as observed by the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default)]
    pub streaming: bool,
    /// Visible error notice for a turn that ended in `Errored`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DisplayMessage {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into())
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content.into())
    }

    fn new(role: Role, content: String) -> Self {
        Self {
            id: None,
            role,
            content,
            tool_calls: Vec::new(),
            model_name: None,
            response_time_ms: None,
            created_at: None,
            streaming: false,
            error: None,
        }
    }

    #[must_use]
    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    #[must_use]
    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    #[must_use]
    pub fn open_tool_calls(&self) -> usize {
        self.tool_calls
            .iter()
            .filter(|record| record.is_calling())
            .count()
    }

    /// Marks every still-calling record done without a result.
    pub fn close_open_tool_calls(&mut self) -> usize {
        let mut closed = 0;
        for record in self.tool_calls.iter_mut().filter(|record| record.is_calling()) {
            record.close(None);
            closed += 1;
        }
        closed
    }
}
