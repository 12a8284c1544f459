use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{classify_failure, http_client, transport_failure, ContentBlock, LlmBackend, LlmError, LlmResponse};
use crate::config::LlmConfig;
use crate::models::Credential;

const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1";

pub struct AnthropicBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
}

impl AnthropicBackend {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let base = config.url.as_deref().unwrap_or(ANTHROPIC_URL);
        Ok(Self {
            client: http_client(config).context("failed to build Anthropic HTTP client")?,
            endpoint: format!("{}/messages", base.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_output_tokens,
        })
    }
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn invoke(&self, prompt: &str, credential: &Credential) -> Result<LlmResponse, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(credential.secret.trim()).map_err(|_| {
                LlmError::Upstream(format!("credential {} is not a valid header value", credential.label))
            })?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: vec![Message {
                role: "user",
                content: vec![RequestBlock {
                    kind: "text",
                    text: prompt,
                }],
            }],
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_failure("anthropic", e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(classify_failure("anthropic", status.as_u16(), &text));
        }

        let parsed: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Upstream(format!("failed to parse Anthropic response: {}", e)))?;
        Ok(into_response(parsed))
    }
}

fn into_response(parsed: MessagesResponse) -> LlmResponse {
    LlmResponse::Blocks(
        parsed
            .content
            .into_iter()
            .map(|block| match block {
                ResponseBlock::Text { text } => ContentBlock::Text(text),
                ResponseBlock::Thinking { signature } => ContentBlock::Signature(signature),
                ResponseBlock::RedactedThinking => ContentBlock::Other("redacted_thinking".into()),
                ResponseBlock::Other => ContentBlock::Other("unknown".into()),
            })
            .collect(),
    )
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    temperature: f32,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: Vec<RequestBlock<'a>>,
}

#[derive(Serialize)]
struct RequestBlock<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    Thinking {
        #[serde(default)]
        signature: String,
    },
    RedactedThinking,
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thinking_blocks_are_dropped_on_clean() {
        let parsed: MessagesResponse = serde_json::from_value(serde_json::json!({
            "id": "msg_01",
            "type": "message",
            "content": [
                { "type": "thinking", "thinking": "Let me see", "signature": "EqQBCg" },
                { "type": "text", "text": "The total is " },
                { "type": "text", "text": "1200 EUR." },
                { "type": "tool_use", "id": "t1", "name": "x", "input": {} }
            ]
        }))
        .unwrap();
        let response = into_response(parsed);
        assert_eq!(response.clean(), "The total is 1200 EUR.");
    }

    #[test]
    fn test_rate_limit_error_body_is_classified() {
        let body = r#"{"type":"error","error":{"type":"rate_limit_error","message":"slow down"}}"#;
        assert!(matches!(
            classify_failure("anthropic", 429, body),
            LlmError::RateLimited(_)
        ));
        let overloaded = r#"{"type":"error","error":{"type":"overloaded_error"}}"#;
        assert!(matches!(
            classify_failure("anthropic", 529, overloaded),
            LlmError::Upstream(_)
        ));
    }
}
