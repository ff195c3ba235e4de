//! Live tests against the configured generation backend.
//!
//! Run with: cargo test -p medixlm-gateway --features live-tests

#![cfg(feature = "live-tests")]

use futures::StreamExt;
use medixlm_gateway::providers::{self, ChatMessage, GenerationOptions, StreamEvent};

fn options() -> GenerationOptions {
    GenerationOptions {
        temperature: 0.0,
        max_tokens: 64,
    }
}

#[tokio::test]
async fn test_configured_backend_answers() {
    medixlm_core::load_dotenv();
    let config = medixlm_core::Config::load().expect("Failed to load config for live tests");
    let provider = providers::from_config(&config).expect("Failed to build provider");

    let response = provider
        .generate(
            "Answer in one short sentence.",
            &[ChatMessage::user("Name one common symptom of the flu.")],
            options(),
        )
        .await
        .expect("generation failed");

    assert!(!response.text.trim().is_empty());
}

#[tokio::test]
async fn test_configured_backend_streams() {
    medixlm_core::load_dotenv();
    let config = medixlm_core::Config::load().expect("Failed to load config for live tests");
    let provider = providers::from_config(&config).expect("Failed to build provider");

    let mut stream = provider
        .generate_stream(
            "Answer in one short sentence.",
            &[ChatMessage::user("What organ pumps blood?")],
            options(),
        )
        .await
        .expect("stream failed to start");

    let mut text = String::new();
    while let Some(event) = stream.next().await {
        if let StreamEvent::Delta(fragment) = event.expect("stream failed") {
            text.push_str(&fragment);
        }
    }
    assert!(!text.trim().is_empty());
}
