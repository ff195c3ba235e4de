//! Streaming chat: fragment delivery, fallback and caller cancellation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FALLBACK, HarnessBuilder, Script};
use medixlm_db::{ConversationLog, MessageRole};
use medixlm_gateway::orchestrator::{ChatError, ChatRequest, ChatResponse, ChatStreamEvent};
use tokio::sync::mpsc;

fn request(message: &str) -> ChatRequest {
    ChatRequest {
        message: message.to_string(),
        conversation_id: None,
        user_id: "U1".to_string(),
    }
}

/// Drain the receiver into fragments and the final response.
async fn collect(mut events: mpsc::Receiver<ChatStreamEvent>) -> (Vec<String>, ChatResponse) {
    let mut fragments = Vec::new();
    while let Some(event) = events.recv().await {
        match event {
            ChatStreamEvent::Fragment(text) => fragments.push(text),
            ChatStreamEvent::Done(response) => return (fragments, response),
            ChatStreamEvent::Error(message) => panic!("stream failed: {message}"),
        }
    }
    panic!("stream ended without a final response");
}

#[tokio::test]
async fn test_stream_delivers_fragments_then_persisted_response() {
    let harness = HarnessBuilder::default().build();

    let events = harness
        .orchestrator
        .process_message_stream(request("What is diabetes?"))
        .await
        .unwrap();
    let (fragments, response) = collect(events).await;

    assert_eq!(fragments, vec!["Diabetes is ", "a chronic condition."]);
    assert_eq!(response.message, fragments.concat());
    assert_eq!(response.tokens_used, Some(42));

    let messages = harness
        .log
        .list_messages(&response.conversation_id, 0, 10)
        .await
        .unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].id, response.message_id);
    assert_eq!(messages[1].content, response.message);
}

#[tokio::test]
async fn test_stream_generation_failure_yields_fallback() {
    let harness = HarnessBuilder::default().script(Script::Fail).build();

    let events = harness
        .orchestrator
        .process_message_stream(request("What is diabetes?"))
        .await
        .unwrap();
    let (fragments, response) = collect(events).await;

    assert_eq!(fragments, vec![FALLBACK]);
    assert_eq!(response.message, FALLBACK);
}

#[tokio::test]
async fn test_stream_rejects_unknown_conversation_up_front() {
    let harness = HarnessBuilder::default().build();

    let result = harness
        .orchestrator
        .process_message_stream(ChatRequest {
            message: "Hello".to_string(),
            conversation_id: Some("conv_missing".to_string()),
            user_id: "U1".to_string(),
        })
        .await;

    assert!(matches!(result, Err(ChatError::NotFound(_))));
    assert_eq!(harness.provider.call_count(), 0);
}

/// Open a stream on a fresh conversation, receive `count` fragments, then
/// hang up. Returns the conversation id.
async fn cancel_after(harness: &common::Harness, count: usize) -> String {
    let conversation = harness.log.create("U1", None).await.unwrap();
    let mut events = harness
        .orchestrator
        .process_message_stream(ChatRequest {
            message: "Explain insulin resistance".to_string(),
            conversation_id: Some(conversation.id.clone()),
            user_id: "U1".to_string(),
        })
        .await
        .unwrap();

    for _ in 0..count {
        match events.recv().await {
            Some(ChatStreamEvent::Fragment(_)) => {}
            other => panic!("expected a fragment, got {other:?}"),
        }
    }
    drop(events);

    let provider = Arc::clone(&harness.provider);
    assert!(
        common::eventually(|| {
            let provider = Arc::clone(&provider);
            async move { provider.stream_dropped() }
        })
        .await,
        "backend stream should be dropped after the caller disconnects"
    );

    conversation.id
}

#[tokio::test]
async fn test_cancelled_stream_persists_nothing_by_default() {
    let harness = HarnessBuilder::default()
        .script(Script::StallAfter(vec!["Insulin resistance ", "is"]))
        .sqlite_log()
        .await
        .build();

    let conversation_id = cancel_after(&harness, 2).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    let messages = harness
        .log
        .list_messages(&conversation_id, 0, 10)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, MessageRole::User);
    assert_eq!(messages[0].content, "Explain insulin resistance");
}

#[tokio::test]
async fn test_cancelled_stream_persists_partial_when_enabled() {
    let harness = HarnessBuilder::default()
        .script(Script::StallAfter(vec!["Insulin resistance ", "is"]))
        .chat(|chat| chat.persist_partial_on_cancel = true)
        .sqlite_log()
        .await
        .build();

    let conversation_id = cancel_after(&harness, 2).await;

    let log = Arc::clone(&harness.log);
    let id = conversation_id.clone();
    assert!(
        common::eventually(|| {
            let log = Arc::clone(&log);
            let id = id.clone();
            async move { log.count_messages(&id).await.unwrap() == 2 }
        })
        .await
    );

    let messages = harness
        .log
        .list_messages(&conversation_id, 0, 10)
        .await
        .unwrap();
    assert_eq!(messages[1].role, MessageRole::Assistant);
    assert_eq!(messages[1].content, "Insulin resistance is");
    assert_eq!(
        messages[1].metadata.get("partial"),
        Some(&serde_json::Value::Bool(true))
    );
}

#[tokio::test]
async fn test_hang_up_while_backend_connects_releases_the_call() {
    let harness = HarnessBuilder::default()
        .script(Script::SlowStart(
            Duration::from_secs(3),
            vec!["Too ", "late."],
        ))
        .chat(|chat| chat.persist_partial_on_cancel = true)
        .build();

    let conversation = harness.log.create("U1", None).await.unwrap();
    let events = harness
        .orchestrator
        .process_message_stream(ChatRequest {
            message: "Is a fever of 39C dangerous?".to_string(),
            conversation_id: Some(conversation.id.clone()),
            user_id: "U1".to_string(),
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(events);

    let provider = Arc::clone(&harness.provider);
    assert!(
        common::eventually(|| {
            let provider = Arc::clone(&provider);
            async move { provider.stream_dropped() }
        })
        .await,
        "pending backend call should be abandoned once the caller is gone"
    );

    // nothing was generated, so even the partial policy stores nothing
    assert_eq!(harness.log.count_messages(&conversation.id).await.unwrap(), 1);
}
