use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::providers::lines::response_lines;
use crate::providers::provider::{
    ChatMessage, GenerationOptions, Provider, ProviderError, ProviderResponse, ProviderStream,
    ProviderUsage, StreamEvent, body_preview,
};

/// Client for Ollama's `/api/chat` endpoint.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
}

/// Full response, and also the shape of every streamed NDJSON line
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    model: Option<String>,
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    done_reason: Option<String>,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
    error: Option<String>,
}

impl OllamaChatResponse {
    fn usage(&self) -> Option<ProviderUsage> {
        if self.prompt_eval_count.is_none() && self.eval_count.is_none() {
            return None;
        }
        Some(ProviderUsage {
            input_tokens: self.prompt_eval_count.unwrap_or(0),
            output_tokens: self.eval_count.unwrap_or(0),
        })
    }
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_request(
        &self,
        system: &str,
        history: &[ChatMessage],
        options: GenerationOptions,
        stream: bool,
    ) -> OllamaChatRequest {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !system.is_empty() {
            messages.push(OllamaMessage {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }
        messages.extend(history.iter().map(|m| OllamaMessage {
            role: m.role.as_str().to_string(),
            content: m.content.clone(),
        }));

        OllamaChatRequest {
            model: self.model.clone(),
            messages,
            stream,
            options: OllamaOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        }
    }

    async fn post(&self, body: &OllamaChatRequest) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let response = self.client.post(&url).json(body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message: error_text,
            });
        }
        Ok(response)
    }
}

fn parse_line(line: &str) -> Result<Option<OllamaChatResponse>, ProviderError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let parsed: OllamaChatResponse = serde_json::from_str(line).map_err(|e| {
        ProviderError::InvalidFormat(format!(
            "Failed to parse Ollama stream line: {e}\nLine: {}",
            body_preview(line)
        ))
    })?;
    if let Some(error) = parsed.error {
        return Err(ProviderError::ApiError {
            status: 200,
            message: error,
        });
    }
    Ok(Some(parsed))
}

#[async_trait::async_trait]
impl Provider for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
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
        let body = self.build_request(system, history, options, false);
        let response = self.post(&body).await?;
        let response_text = response.text().await?;

        let parsed = parse_line(&response_text)?.ok_or(ProviderError::NoContent)?;
        let usage = parsed.usage();
        let text = parsed
            .message
            .map(|m| m.content)
            .filter(|text| !text.is_empty())
            .ok_or(ProviderError::NoContent)?;

        Ok(ProviderResponse {
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
            text,
            usage,
            stop_reason: parsed.done_reason,
        })
    }

    async fn generate_stream(
        &self,
        system: &str,
        history: &[ChatMessage],
        options: GenerationOptions,
    ) -> Result<ProviderStream, ProviderError> {
        let body = self.build_request(system, history, options, true);
        let response = self.post(&body).await?;
        debug!(model = %self.model, "streaming ollama chat");

        let mut lines = response_lines(response);
        Ok(Box::pin(async_stream::stream! {
            while let Some(line) = lines.next().await {
                let parsed = match line.and_then(|line| parse_line(&line)) {
                    Ok(Some(parsed)) => parsed,
                    Ok(None) => continue,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                let usage = parsed.usage();
                if let Some(message) = parsed.message
                    && !message.content.is_empty()
                {
                    yield Ok(StreamEvent::Delta(message.content));
                }
                if parsed.done {
                    if let Some(usage) = usage {
                        yield Ok(StreamEvent::Usage(usage));
                    }
                    return;
                }
            }
        }))
    }
}
