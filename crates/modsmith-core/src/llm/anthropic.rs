//! Anthropic Messages API backend.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ContentBlock, LlmError, Message, Model, ModelReply, ToolDefinition, TurnRequest};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "sonnet";
pub const DEFAULT_MAX_TOKENS: u32 = 8192;
const API_VERSION: &str = "2023-06-01";

/// Resolve model aliases to full Anthropic model IDs.
pub fn resolve_model(alias: &str) -> &str {
    match alias {
        "opus" => "claude-opus-4-20250514",
        "sonnet" => "claude-sonnet-4-5-20250929",
        "haiku" => "claude-haiku-4-5-20251001",
        _ => alias,
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    tools: &'a [ToolDefinition],
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
}

/// A [`Model`] backed by the Anthropic Messages API.
#[derive(Debug)]
pub struct AnthropicModel {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl AnthropicModel {
    /// Create a client against the public API.
    pub fn new(api_key: String, model: &str) -> Self {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL.into())
    }

    /// Create a client with a custom base URL (proxies, mock servers).
    pub fn with_base_url(api_key: String, model: &str, base_url: String) -> Self {
        Self {
            http: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: resolve_model(model).to_string(),
        }
    }

    /// Create a client reading `ANTHROPIC_API_KEY` from the environment.
    pub fn from_env(model: &str) -> Result<Self, LlmError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
            LlmError::MissingApiKey("ANTHROPIC_API_KEY environment variable not set".into())
        })?;
        Ok(Self::new(api_key, model))
    }

    /// The resolved model ID.
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Model for AnthropicModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &TurnRequest) -> Result<ModelReply, LlmError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            messages: &request.messages,
            tools: &request.tools,
        };

        debug!(model = %self.model, messages = request.messages.len(), "sending messages request");
        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            return Err(LlmError::RateLimited { retry_after });
        }

        if status >= 400 {
            let message = response.text().await.unwrap_or_else(|_| "(no body)".into());
            return Err(LlmError::ApiError { status, message });
        }

        let resp: MessagesResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("failed to parse response: {e}")))?;

        Ok(ModelReply {
            content: resp.content,
            stop_reason: resp.stop_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn aliases_resolve() {
        assert_eq!(resolve_model("opus"), "claude-opus-4-20250514");
        assert_eq!(resolve_model("custom-model-id"), "custom-model-id");
    }

    #[test]
    fn base_url_is_trimmed() {
        let model =
            AnthropicModel::with_base_url("k".into(), "haiku", "http://localhost:8080/".into());
        assert_eq!(model.base_url, "http://localhost:8080");
        assert_eq!(model.model(), "claude-haiku-4-5-20251001");
    }

    #[test]
    fn request_omits_empty_tools() {
        let messages = vec![Message::user_text("hello")];
        let body = MessagesRequest {
            model: "m",
            max_tokens: 16,
            messages: &messages,
            tools: &[],
        };
        let v = serde_json::to_value(&body).unwrap();
        assert!(v.get("tools").is_none());
        assert!(v.get("system").is_none());
        assert_eq!(v["messages"][0]["role"], "user");
    }

    #[test]
    fn request_carries_tools() {
        let tools = vec![ToolDefinition {
            name: "read".into(),
            description: "Read the file".into(),
            input_schema: json!({"type": "object", "properties": {}}),
        }];
        let body = MessagesRequest {
            model: "m",
            max_tokens: 16,
            messages: &[],
            tools: &tools,
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["tools"][0]["name"], "read");
    }

    #[test]
    fn response_with_tool_use_parses() {
        let raw = r#"{
            "id": "msg_1",
            "model": "claude",
            "content": [
                {"type": "text", "text": "Let me write it."},
                {"type": "tool_use", "id": "toolu_1", "name": "write", "input": {"content": "package main"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 1, "output_tokens": 1}
        }"#;
        let resp: MessagesResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.content.len(), 2);
        assert_eq!(resp.stop_reason.as_deref(), Some("tool_use"));
        assert!(matches!(&resp.content[1], ContentBlock::ToolUse { name, .. } if name == "write"));
    }
}
