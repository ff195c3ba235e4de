//! Generation with fallback-on-failure semantics.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use medixlm_core::GenerationSettings;
use tracing::warn;

use crate::chat::context::AssembledContext;
use crate::providers::{GenerationOptions, Provider, StreamEvent};

/// Result of one generation attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedResponse {
    pub text: String,
    pub tokens_used: Option<u32>,
    /// The backend failed and `text` is the configured fallback.
    pub fallback: bool,
}

/// Infallible stream of generation events.
pub type GenerationStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Wraps a [`Provider`] so chat never fails because generation did.
///
/// Exactly one backend call per request; there is no retry.
#[derive(Clone)]
pub struct ResponseGenerator {
    provider: Arc<dyn Provider>,
    fallback_message: String,
    options: GenerationOptions,
}

impl ResponseGenerator {
    pub fn new(
        provider: Arc<dyn Provider>,
        fallback_message: impl Into<String>,
        options: GenerationOptions,
    ) -> Self {
        Self {
            provider,
            fallback_message: fallback_message.into(),
            options,
        }
    }

    pub fn from_settings(provider: Arc<dyn Provider>, settings: &GenerationSettings) -> Self {
        Self::new(
            provider,
            settings.fallback_message.clone(),
            GenerationOptions {
                temperature: settings.temperature,
                max_tokens: settings.max_tokens,
            },
        )
    }

    pub fn fallback_message(&self) -> &str {
        &self.fallback_message
    }

    fn fallback(&self) -> GeneratedResponse {
        GeneratedResponse {
            text: self.fallback_message.clone(),
            tokens_used: None,
            fallback: true,
        }
    }

    pub async fn generate(&self, context: &AssembledContext) -> GeneratedResponse {
        match self
            .provider
            .generate(&context.system_instructions, &context.history, self.options)
            .await
        {
            Ok(response) if !response.text.trim().is_empty() => GeneratedResponse {
                text: response.text,
                tokens_used: response.usage.map(|u| u.total()),
                fallback: false,
            },
            Ok(_) => {
                warn!(provider = self.provider.name(), "empty generation, using fallback");
                self.fallback()
            }
            Err(e) => {
                warn!(provider = self.provider.name(), error = %e, "generation failed, using fallback");
                self.fallback()
            }
        }
    }

    /// Stream fragments of the reply.
    ///
    /// If the backend fails or produces only whitespace before any real
    /// text, the fallback message is yielded as a single fragment. A failure
    /// after some text ends the stream, keeping what was produced. Dropping
    /// the stream drops the backend connection.
    pub async fn generate_stream(&self, context: &AssembledContext) -> GenerationStream {
        let fallback = self.fallback_message.clone();
        let provider_name = self.provider.name().to_string();

        let mut upstream = match self
            .provider
            .generate_stream(&context.system_instructions, &context.history, self.options)
            .await
        {
            Ok(upstream) => upstream,
            Err(e) => {
                warn!(provider = %provider_name, error = %e, "generation stream failed to start, using fallback");
                return Box::pin(futures::stream::once(async move {
                    StreamEvent::Delta(fallback)
                }));
            }
        };

        Box::pin(async_stream::stream! {
            let mut produced_text = false;
            // leading blank fragments wait until real text shows up
            let mut held = String::new();
            while let Some(event) = upstream.next().await {
                match event {
                    Ok(StreamEvent::Delta(text)) if produced_text => {
                        yield StreamEvent::Delta(text);
                    }
                    Ok(StreamEvent::Delta(text)) if text.trim().is_empty() => {
                        held.push_str(&text);
                    }
                    Ok(StreamEvent::Delta(text)) => {
                        produced_text = true;
                        held.push_str(&text);
                        yield StreamEvent::Delta(std::mem::take(&mut held));
                    }
                    Ok(usage @ StreamEvent::Usage(_)) => yield usage,
                    Err(e) => {
                        warn!(provider = %provider_name, error = %e, "generation stream failed mid-way");
                        break;
                    }
                }
            }
            if !produced_text {
                yield StreamEvent::Delta(fallback);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::providers::{
        ChatMessage, ProviderError, ProviderResponse, ProviderStream, ProviderUsage,
    };

    /// Scripted backend: `Ok` fragments or an error at a given point.
    struct Scripted {
        fragments: Vec<&'static str>,
        fail_after: Option<usize>,
        fail_start: bool,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(fragments: Vec<&'static str>) -> Self {
            Self {
                fragments,
                fail_after: None,
                fail_start: false,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Provider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-1"
        }

        async fn generate(
            &self,
            _system: &str,
            _history: &[ChatMessage],
            _options: GenerationOptions,
        ) -> Result<ProviderResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_start {
                return Err(ProviderError::NoContent);
            }
            Ok(ProviderResponse {
                model: "scripted-1".to_string(),
                text: self.fragments.concat(),
                usage: Some(ProviderUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                }),
                stop_reason: None,
            })
        }

        async fn generate_stream(
            &self,
            _system: &str,
            _history: &[ChatMessage],
            _options: GenerationOptions,
        ) -> Result<ProviderStream, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_start {
                return Err(ProviderError::NoContent);
            }
            let mut items: Vec<Result<StreamEvent, ProviderError>> = self
                .fragments
                .iter()
                .map(|f| Ok(StreamEvent::Delta(f.to_string())))
                .collect();
            if let Some(n) = self.fail_after {
                items.truncate(n);
                items.push(Err(ProviderError::InvalidFormat("broken".to_string())));
            }
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    fn context() -> AssembledContext {
        AssembledContext {
            system_instructions: "persona".to_string(),
            history: vec![ChatMessage::user("hi")],
        }
    }

    fn generator(provider: Arc<Scripted>) -> ResponseGenerator {
        ResponseGenerator::new(
            provider,
            "fallback text",
            GenerationOptions {
                temperature: 0.7,
                max_tokens: 100,
            },
        )
    }

    async fn collect(stream: GenerationStream) -> String {
        stream
            .filter_map(|event| async move {
                match event {
                    StreamEvent::Delta(text) => Some(text),
                    StreamEvent::Usage(_) => None,
                }
            })
            .collect::<Vec<_>>()
            .await
            .concat()
    }

    #[tokio::test]
    async fn test_generate_success_reports_tokens() {
        let provider = Arc::new(Scripted::new(vec!["Hello", " there"]));
        let response = generator(provider.clone()).generate(&context()).await;
        assert_eq!(response.text, "Hello there");
        assert_eq!(response.tokens_used, Some(15));
        assert!(!response.fallback);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_generate_failure_uses_fallback_without_retry() {
        let mut scripted = Scripted::new(vec![]);
        scripted.fail_start = true;
        let provider = Arc::new(scripted);
        let response = generator(provider.clone()).generate(&context()).await;
        assert_eq!(response.text, "fallback text");
        assert!(response.fallback);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_generation_uses_fallback() {
        let provider = Arc::new(Scripted::new(vec!["  "]));
        let response = generator(provider).generate(&context()).await;
        assert!(response.fallback);
    }

    #[tokio::test]
    async fn test_stream_failure_at_start_yields_fallback() {
        let mut scripted = Scripted::new(vec![]);
        scripted.fail_start = true;
        let stream = generator(Arc::new(scripted)).generate_stream(&context()).await;
        assert_eq!(collect(stream).await, "fallback text");
    }

    #[tokio::test]
    async fn test_stream_failure_midway_keeps_partial() {
        let mut scripted = Scripted::new(vec!["Part", "ial", "never"]);
        scripted.fail_after = Some(2);
        let stream = generator(Arc::new(scripted)).generate_stream(&context()).await;
        assert_eq!(collect(stream).await, "Partial");
    }

    #[tokio::test]
    async fn test_blank_stream_uses_fallback_like_sync_path() {
        let provider = Arc::new(Scripted::new(vec![" ", " \n"]));
        let sync = generator(provider.clone()).generate(&context()).await;
        let stream = generator(provider).generate_stream(&context()).await;

        assert_eq!(sync.text, "fallback text");
        assert_eq!(collect(stream).await, "fallback text");
    }

    #[tokio::test]
    async fn test_stream_leading_whitespace_kept_once_text_arrives() {
        let provider = Arc::new(Scripted::new(vec!["\n", "Rest", " well"]));
        let stream = generator(provider).generate_stream(&context()).await;
        assert_eq!(collect(stream).await, "\nRest well");
    }

    #[tokio::test]
    async fn test_stream_failure_before_text_yields_fallback() {
        let mut scripted = Scripted::new(vec!["lost"]);
        scripted.fail_after = Some(0);
        let stream = generator(Arc::new(scripted)).generate_stream(&context()).await;
        assert_eq!(collect(stream).await, "fallback text");
    }
}
