use crate::progress::{Progress, ProgressError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

// Context keys the verification flow writes. External consumers (the LLM
// decision layer, UI sidebars) read these as advisory hints only.
pub const CTX_ID_CARD_URL: &str = "id_card_url";
pub const CTX_SCAN_RESULT: &str = "scan_result";
pub const CTX_VERIFICATION_SUCCESS: &str = "verification_success";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded argument object, exactly as the model produced it.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub ts_unix_ms: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            ts_unix_ms: now_unix_ms(),
            tool_calls: vec![],
            tool_call_id: None,
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }
}

fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Persistence wire contract for one session: what the snapshot store keeps
/// and what a fresh orchestrator hydrates from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub messages: Vec<Message>,
    pub context: BTreeMap<String, serde_json::Value>,
    pub progress: Progress,
}

/// Mutable per-session conversational/verification state.
///
/// The message sequence is append-only except on `reset`, which clears it
/// back to a single system message.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    messages: Vec<Message>,
    context: BTreeMap<String, serde_json::Value>,
    progress: Progress,
}

impl Conversation {
    pub fn with_system(system_content: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::new(Role::System, system_content)],
            context: BTreeMap::new(),
            progress: Progress::Idle,
        }
    }

    pub fn from_snapshot(snapshot: ConversationSnapshot) -> Self {
        Self {
            messages: snapshot.messages,
            context: snapshot.context,
            progress: snapshot.progress,
        }
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            messages: self.messages.clone(),
            context: self.context.clone(),
            progress: self.progress,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    pub fn set_progress(&mut self, to: Progress) -> Result<(), ProgressError> {
        self.progress.transition(to)
    }

    pub fn set_context(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.context.insert(key.into(), value);
    }

    pub fn context_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.context.get(key)
    }

    pub fn context(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.context
    }

    pub fn id_card_url(&self) -> Option<&str> {
        self.context.get(CTX_ID_CARD_URL).and_then(|v| v.as_str())
    }

    pub fn verification_succeeded(&self) -> bool {
        self.context
            .get(CTX_VERIFICATION_SUCCESS)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Clears messages and context and returns progress to `Idle`, leaving a
    /// single fresh system message behind.
    pub fn reset(&mut self, system_content: impl Into<String>) {
        self.messages.clear();
        self.messages.push(Message::new(Role::System, system_content));
        self.context.clear();
        self.progress = Progress::Idle;
    }
}
