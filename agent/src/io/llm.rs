//! Model backend abstraction and the OpenAI-compatible chat client.
//!
//! The [`ModelBackend`] trait decouples the control loop from the chat endpoint.
//! Tests use scripted backends that return predetermined replies.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::types::Message;
use crate::io::http::{build_client, endpoint, read_json};

/// One model reply: the text payload plus whatever metadata the backend returned.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelReply {
    pub content: String,
    /// Raw response metadata; token usage may be reachable in several shapes.
    pub metadata: Value,
}

impl ModelReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Abstraction over chat model backends.
pub trait ModelBackend {
    /// Send the full message list and return the single reply.
    fn complete(&self, messages: &[Message]) -> Result<ModelReply>;
}

impl<T: ModelBackend + ?Sized> ModelBackend for &T {
    fn complete(&self, messages: &[Message]) -> Result<ModelReply> {
        (**self).complete(messages)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: &'a [Message],
}

/// Client for `POST {base}/chat/completions`.
#[derive(Debug, Clone)]
pub struct OpenAiChat {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiChat {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            http: build_client(timeout)?,
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature,
        })
    }
}

impl ModelBackend for OpenAiChat {
    #[instrument(skip_all, fields(model = %self.model, messages = messages.len()))]
    fn complete(&self, messages: &[Message]) -> Result<ModelReply> {
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages,
        };
        let response = self
            .http
            .post(endpoint(&self.base_url, "chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .context("send chat completion request")?;
        let value = read_json(response, "chat completion")?;
        let reply = parse_chat_response(value)?;
        debug!(chars = reply.content.len(), "received model reply");
        Ok(reply)
    }
}

/// Extract the first choice's content; the whole response is kept as metadata.
pub fn parse_chat_response(value: Value) -> Result<ModelReply> {
    let content = value
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("chat completion response has no message content"))?
        .to_string();
    Ok(ModelReply {
        content,
        metadata: value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::usage::extract_total_tokens;
    use serde_json::json;

    #[test]
    fn parses_content_and_keeps_usage_metadata() {
        let reply = parse_chat_response(json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "{\"action\":\"exit\"}"}}],
            "usage": {"prompt_tokens": 40, "completion_tokens": 17, "total_tokens": 57}
        }))
        .expect("parse");

        assert_eq!(reply.content, r#"{"action":"exit"}"#);
        assert_eq!(extract_total_tokens(&reply.metadata), Some(57));
    }

    #[test]
    fn missing_content_is_an_error() {
        let err = parse_chat_response(json!({"choices": []})).unwrap_err();
        assert!(err.to_string().contains("no message content"));
    }

    #[test]
    fn request_serializes_roles_in_lowercase() {
        let messages = [Message::system("rules"), Message::user("url")];
        let body = ChatRequest {
            model: "gpt-4o-mini",
            temperature: 0.5,
            messages: &messages,
        };
        let value = serde_json::to_value(&body).expect("serialize");
        assert_eq!(value["messages"][0], json!({"role": "system", "content": "rules"}));
        assert_eq!(value["messages"][1]["role"], "user");
    }
}
