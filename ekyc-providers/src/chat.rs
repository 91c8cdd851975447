use crate::request::{Body, HttpRequest};
use anyhow::{Context, anyhow};
use serde::Deserialize;
use serde_json::json;

/// Tool the model may call to kick off the verification flow. The chat
/// collaborator only ever picks an action; it never touches session state.
pub const TOOL_START_EKYC: &str = "start_ekyc_process";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallReply {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatOutcome {
    Text(String),
    ToolCalls(Vec<ToolCallReply>),
}

pub fn build_chat_completions_request(
    cfg: &ChatClientConfig,
    messages: &[ChatMessage],
) -> HttpRequest {
    let url = join_url(&cfg.base_url, "/chat/completions");

    let payload = json!({
        "model": cfg.model,
        "messages": messages.iter().map(|m| json!({"role": m.role, "content": m.content})).collect::<Vec<_>>(),
        "tools": [start_ekyc_tool()],
        "temperature": 0.3,
    });

    HttpRequest {
        method: "POST".into(),
        url,
        headers: vec![
            ("Content-Type".into(), "application/json".into()),
            ("Authorization".into(), format!("Bearer {}", cfg.api_key)),
        ],
        body: Body::Json(payload.to_string()),
    }
}

fn start_ekyc_tool() -> serde_json::Value {
    json!({
        "type": "function",
        "function": {
            "name": TOOL_START_EKYC,
            "description": "Initiates the verification flow (ID upload -> scan -> face verification) when the user expresses intent to begin.",
            "parameters": {
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "Short message guiding the user into the flow."
                    }
                },
                "required": ["message"]
            }
        }
    })
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{}/{}", base, path)
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<RawToolCall>,
}

#[derive(Debug, Deserialize)]
struct RawToolCall {
    id: String,
    function: RawFunction,
}

#[derive(Debug, Deserialize)]
struct RawFunction {
    name: String,
    arguments: String,
}

pub fn parse_chat_completion(body: &[u8]) -> anyhow::Result<ChatOutcome> {
    let resp: ChatResponse = serde_json::from_slice(body).context("decode chat JSON")?;
    let message = resp
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| anyhow!("no choices in chat completion response"))?;

    if !message.tool_calls.is_empty() {
        return Ok(ChatOutcome::ToolCalls(
            message
                .tool_calls
                .into_iter()
                .map(|t| ToolCallReply {
                    id: t.id,
                    name: t.function.name,
                    arguments: t.function.arguments,
                })
                .collect(),
        ));
    }

    message
        .content
        .map(ChatOutcome::Text)
        .ok_or_else(|| anyhow!("chat completion had neither content nor tool calls"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ChatClientConfig {
        ChatClientConfig {
            base_url: "https://api.example.com/v1".into(),
            api_key: "k".into(),
            model: "glm-4.5".into(),
        }
    }

    #[test]
    fn join_url_handles_trailing_slash() {
        assert_eq!(
            join_url("https://api.example.com/", "/chat/completions"),
            "https://api.example.com/chat/completions"
        );
    }

    #[test]
    fn builds_authorized_request_with_tool_definition() {
        let req = build_chat_completions_request(
            &cfg(),
            &[ChatMessage { role: "user".into(), content: "hi".into() }],
        );

        assert_eq!(req.method, "POST");
        assert!(req.url.ends_with("/chat/completions"));
        assert_eq!(req.header("authorization"), Some("Bearer k"));
        match req.body {
            Body::Json(s) => {
                assert!(s.contains(TOOL_START_EKYC));
                assert!(s.contains("\"tools\""));
            }
            _ => panic!("expected json"),
        }
    }

    #[test]
    fn parses_plain_text_reply() {
        let body = br#"{"choices":[{"message":{"content":"hello"}}]}"#;
        assert_eq!(parse_chat_completion(body).unwrap(), ChatOutcome::Text("hello".into()));
    }

    #[test]
    fn tool_calls_take_precedence_over_content() {
        let body = br#"{"choices":[{"message":{
            "content": null,
            "tool_calls": [{"id":"c1","type":"function","function":{"name":"start_ekyc_process","arguments":"{\"message\":\"go\"}"}}]
        }}]}"#;
        match parse_chat_completion(body).unwrap() {
            ChatOutcome::ToolCalls(calls) => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].name, TOOL_START_EKYC);
                assert!(calls[0].arguments.contains("go"));
            }
            other => panic!("expected tool calls, got {other:?}"),
        }
    }

    #[test]
    fn empty_message_errors() {
        let body = br#"{"choices":[{"message":{}}]}"#;
        assert!(parse_chat_completion(body).is_err());
    }
}
