//! OpenAI-compatible API client.

use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::providers::lines::response_lines;
use crate::providers::provider::{
    ChatMessage, GenerationOptions, Provider, ProviderError, ProviderResponse, ProviderStream,
    ProviderUsage, StreamEvent, body_preview,
};

/// OpenAI-compatible API client (OpenAI, vLLM, llama.cpp server, ...).
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    http_client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

/// Request body for the Chat Completions API
#[derive(Debug, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

/// OpenAI-compatible message format
#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completion response
#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    model: Option<String>,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

/// Choice in the response
#[derive(Debug, Deserialize)]
struct Choice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

/// One `data:` payload of a streamed completion
#[derive(Debug, Deserialize)]
struct ChatCompletionsChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

/// Usage information
#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl From<Usage> for ProviderUsage {
    fn from(usage: Usage) -> Self {
        ProviderUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }
    }
}

impl OpenAiCompatibleClient {
    /// Create a new OpenAI-compatible client.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http_client,
            api_key,
            model: model.into(),
            base_url: base_url.into(),
        })
    }

    /// Build request headers with optional auth.
    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(api_key) = &self.api_key {
            let auth_value = format!("Bearer {}", api_key);
            if let Ok(header_value) = HeaderValue::from_str(&auth_value) {
                headers.insert(AUTHORIZATION, header_value);
            }
        }
        headers
    }

    fn normalized_base_url(&self) -> String {
        self.base_url.trim_end_matches('/').to_string()
    }

    fn chat_completions_url(&self) -> String {
        let base = self.normalized_base_url();
        if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    fn build_request(
        &self,
        system: &str,
        history: &[ChatMessage],
        options: GenerationOptions,
        stream: bool,
    ) -> ChatCompletionsRequest {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !system.is_empty() {
            messages.push(OpenAiMessage {
                role: "system".to_string(),
                content: Some(system.to_string()),
            });
        }
        messages.extend(history.iter().map(|m| OpenAiMessage {
            role: m.role.as_str().to_string(),
            content: Some(m.content.clone()),
        }));

        ChatCompletionsRequest {
            model: self.model.clone(),
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }

    async fn post(&self, body: &ChatCompletionsRequest) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .http_client
            .post(self.chat_completions_url())
            .headers(self.build_headers())
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message: error_text,
            });
        }
        Ok(response)
    }
}

/// Parse one SSE line. `Ok(None)` for comments, blank lines and `[DONE]`.
fn parse_sse_line(line: &str) -> Result<Option<ChatCompletionsChunk>, ProviderError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }
    serde_json::from_str(data).map(Some).map_err(|e| {
        ProviderError::InvalidFormat(format!(
            "Failed to parse OpenAI-compatible stream chunk: {e}\nChunk: {}",
            body_preview(data)
        ))
    })
}

#[async_trait::async_trait]
impl Provider for OpenAiCompatibleClient {
    fn name(&self) -> &str {
        "openai_compatible"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        system: &str,
        history: &[ChatMessage],
        options: GenerationOptions,
    ) -> Result<ProviderResponse, ProviderError> {
        let request_body = self.build_request(system, history, options, false);
        let response = self.post(&request_body).await?;
        let response_text = response.text().await?;

        let completions_response: ChatCompletionsResponse = serde_json::from_str(&response_text)
            .map_err(|e| {
                ProviderError::InvalidFormat(format!(
                    "Failed to parse OpenAI-compatible response: {e}\nBody preview: {}",
                    body_preview(&response_text)
                ))
            })?;

        let usage = completions_response.usage.map(ProviderUsage::from);
        let choice = completions_response
            .choices
            .into_iter()
            .next()
            .ok_or(ProviderError::NoContent)?;
        let text = choice
            .message
            .content
            .filter(|text| !text.is_empty())
            .ok_or(ProviderError::NoContent)?;

        Ok(ProviderResponse {
            model: completions_response
                .model
                .unwrap_or_else(|| self.model.clone()),
            text,
            usage,
            stop_reason: choice.finish_reason,
        })
    }

    async fn generate_stream(
        &self,
        system: &str,
        history: &[ChatMessage],
        options: GenerationOptions,
    ) -> Result<ProviderStream, ProviderError> {
        let request_body = self.build_request(system, history, options, true);
        let response = self.post(&request_body).await?;
        debug!(model = %self.model, "streaming chat completion");

        let mut lines = response_lines(response);
        Ok(Box::pin(async_stream::stream! {
            while let Some(line) = lines.next().await {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                if line.trim() == "data: [DONE]" {
                    return;
                }
                match parse_sse_line(&line) {
                    Ok(Some(chunk)) => {
                        for choice in chunk.choices {
                            if let Some(content) = choice.delta.content
                                && !content.is_empty()
                            {
                                yield Ok(StreamEvent::Delta(content));
                            }
                        }
                        if let Some(usage) = chunk.usage {
                            yield Ok(StreamEvent::Usage(usage.into()));
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }))
    }
}
