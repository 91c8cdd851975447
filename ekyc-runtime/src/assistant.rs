use anyhow::anyhow;
use ekyc_core::conversation::{Conversation, Message, Role, ToolCall};
use ekyc_providers::chat::{
    ChatClientConfig, ChatMessage, ChatOutcome, TOOL_START_EKYC, build_chat_completions_request,
    parse_chat_completion,
};

const DEFAULT_START_MESSAGE: &str =
    "Let's begin your identity verification. Please upload a clear photo of your ID document.";

/// What the model decided to do with the user's message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssistantAction {
    Reply(String),
    /// The model invoked the verification tool; the caller drives the flow
    /// from here while `message` guides the user into it.
    StartEkyc { message: String },
}

#[derive(Clone)]
pub struct Assistant {
    cfg: ChatClientConfig,
}

impl std::fmt::Debug for Assistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assistant")
            .field("base_url", &self.cfg.base_url)
            .field("model", &self.cfg.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl Assistant {
    pub fn new(cfg: ChatClientConfig) -> Self {
        Self { cfg }
    }

    /// Appends the user's message, runs one completion over the whole
    /// transcript, and records the model's reply (or tool call) back into
    /// the conversation before returning the action.
    pub async fn respond(
        &self,
        conversation: &mut Conversation,
        user_text: &str,
    ) -> anyhow::Result<AssistantAction> {
        conversation.push(Message::new(Role::User, user_text));

        let messages: Vec<ChatMessage> = conversation
            .messages()
            .iter()
            .map(|m| ChatMessage {
                role: role_str(m.role).into(),
                content: m.content.clone(),
            })
            .collect();

        let req = build_chat_completions_request(&self.cfg, &messages);
        let resp = ekyc_providers::runtime::execute(&req).await?;
        if !(200..=299).contains(&resp.status) {
            return Err(anyhow!(
                "chat completion failed: status={} body={}",
                resp.status,
                String::from_utf8_lossy(&resp.body)
            ));
        }

        match parse_chat_completion(&resp.body)? {
            ChatOutcome::Text(text) => {
                conversation.push(Message::new(Role::Assistant, text.clone()));
                Ok(AssistantAction::Reply(text))
            }
            ChatOutcome::ToolCalls(calls) => {
                let call = calls
                    .iter()
                    .find(|c| c.name == TOOL_START_EKYC)
                    .ok_or_else(|| {
                        anyhow!(
                            "model invoked unknown tool(s): {}",
                            calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ")
                        )
                    })?;

                let message = start_message(&call.arguments);

                conversation.push(Message::new(Role::Assistant, "").with_tool_calls(vec![
                    ToolCall {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                ]));
                let mut tool_reply = Message::new(Role::Tool, message.clone());
                tool_reply.tool_call_id = Some(call.id.clone());
                conversation.push(tool_reply);

                Ok(AssistantAction::StartEkyc { message })
            }
        }
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn start_message(arguments: &str) -> String {
    serde_json::from_str::<serde_json::Value>(arguments)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| DEFAULT_START_MESSAGE.to_string())
}
