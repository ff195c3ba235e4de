//! Chat orchestration: the per-message pipeline.
//!
//! One request runs
//! `resolve conversation -> persist user message -> retrieve knowledge ->
//! assemble context -> generate -> persist assistant message -> cache -> return`.
//! Only the two persistence steps can fail a request; retrieval, history
//! reads, generation and caching degrade instead.
//!
//! Two concurrent requests on the same conversation are not serialized;
//! their messages may interleave in the log.

use std::sync::Arc;

use futures::StreamExt;
use medixlm_core::ChatSettings;
use medixlm_db::{
    Conversation, ConversationLog, DbError, Message, MessageRole, Metadata, NewMessage,
};
use medixlm_knowledge::{KnowledgeRetriever, KnowledgeSummary, ScoredNode};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cache::Cache;
use crate::chat::{ContextAssembler, ResponseGenerator};
use crate::providers::StreamEvent;

/// Chat errors surfaced to callers.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("persistence failed: {0}")]
    Persistence(#[from] DbError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub message: String,
    pub conversation_id: String,
    /// Id of the stored assistant message
    pub message_id: String,
    pub related_knowledge: Vec<KnowledgeSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
    /// Best similarity among the retrieved knowledge
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f32>,
}

/// Events delivered to a streaming caller.
#[derive(Debug, Clone)]
pub enum ChatStreamEvent {
    Fragment(String),
    Done(ChatResponse),
    /// The assistant reply could not be stored; nothing was returned as final.
    Error(String),
}

/// Knobs taken from `[chat]`.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub retrieval_limit: usize,
    pub cache_ttl_seconds: u64,
    pub persist_partial_on_cancel: bool,
}

impl From<&ChatSettings> for OrchestratorSettings {
    fn from(settings: &ChatSettings) -> Self {
        Self {
            retrieval_limit: settings.retrieval_limit,
            cache_ttl_seconds: settings.cache_ttl_seconds,
            persist_partial_on_cancel: settings.persist_partial_on_cancel,
        }
    }
}

/// Turn state shared by the sync and streaming paths once the user
/// message is stored.
struct PreparedTurn {
    conversation: Conversation,
    user_message: Message,
    knowledge: Vec<ScoredNode>,
    context: crate::chat::AssembledContext,
}

/// Composes the conversation log, retriever, generator and cache.
///
/// All collaborators are injected; cloning is cheap.
#[derive(Clone)]
pub struct ChatOrchestrator {
    log: Arc<dyn ConversationLog>,
    retriever: KnowledgeRetriever,
    assembler: ContextAssembler,
    generator: ResponseGenerator,
    cache: Arc<dyn Cache>,
    settings: OrchestratorSettings,
}

const STREAM_CHANNEL_CAPACITY: usize = 32;

impl ChatOrchestrator {
    pub fn new(
        log: Arc<dyn ConversationLog>,
        retriever: KnowledgeRetriever,
        assembler: ContextAssembler,
        generator: ResponseGenerator,
        cache: Arc<dyn Cache>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            log,
            retriever,
            assembler,
            generator,
            cache,
            settings,
        }
    }

    /// Process one chat message end to end.
    pub async fn process_message(&self, request: ChatRequest) -> Result<ChatResponse, ChatError> {
        let turn = self.prepare_turn(&request).await?;
        let generated = self.generator.generate(&turn.context).await;

        let assistant = self
            .persist_assistant(
                &turn.conversation.id,
                generated.text,
                generated.tokens_used,
                Metadata::new(),
            )
            .await?;

        self.cache_response(&turn, &assistant.content);
        Ok(build_response(&turn, assistant))
    }

    /// Like [`Self::process_message`], but the reply arrives as fragments.
    ///
    /// Validation, conversation lookup and the user message write happen
    /// before this returns, so those failures are ordinary errors. The
    /// receiver yields fragments followed by exactly one `Done` or `Error`.
    /// Dropping the receiver cancels generation; the partial reply is
    /// stored only when `persist_partial_on_cancel` is set.
    pub async fn process_message_stream(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<ChatStreamEvent>, ChatError> {
        let turn = self.prepare_turn(&request).await?;
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator.drive_stream(turn, tx).await;
        });

        Ok(rx)
    }

    /// Stored messages of a conversation, oldest first.
    ///
    /// With `user_id`, a conversation owned by someone else is reported as
    /// not found.
    pub async fn conversation_history(
        &self,
        conversation_id: &str,
        user_id: Option<&str>,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Message>, ChatError> {
        let conversation = self
            .log
            .get_by_id(conversation_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("conversation {conversation_id}")))?;
        if let Some(user_id) = user_id
            && conversation.user_id != user_id
        {
            return Err(ChatError::NotFound(format!("conversation {conversation_id}")));
        }

        Ok(self.log.list_messages(conversation_id, skip, limit).await?)
    }

    async fn prepare_turn(&self, request: &ChatRequest) -> Result<PreparedTurn, ChatError> {
        validate(request)?;

        let conversation = self.resolve_conversation(request).await?;

        let user_message = self
            .log
            .append_message(NewMessage::new(
                &conversation.id,
                MessageRole::User,
                request.message.clone(),
            ))
            .await
            .map_err(|e| {
                error!(
                    "[conversation:{}] failed to store user message: {}",
                    conversation.id, e
                );
                ChatError::Persistence(e)
            })?;

        // the user message is committed; retrieval and history read are independent
        let (knowledge, recent) = tokio::join!(
            self.retriever
                .retrieve(&request.message, None, self.settings.retrieval_limit),
            self.recent_history(&conversation.id, &user_message.id),
        );

        let context = self
            .assembler
            .assemble(&recent, &knowledge, &request.message);

        debug!(
            "[conversation:{}] context ready ({} prior messages, {} knowledge nodes)",
            conversation.id,
            context.history.len().saturating_sub(1),
            knowledge.len()
        );

        Ok(PreparedTurn {
            conversation,
            user_message,
            knowledge,
            context,
        })
    }

    async fn resolve_conversation(&self, request: &ChatRequest) -> Result<Conversation, ChatError> {
        match request.conversation_id.as_deref() {
            Some(id) => {
                let conversation = self
                    .log
                    .get_by_id(id)
                    .await?
                    .ok_or_else(|| ChatError::NotFound(format!("conversation {id}")))?;
                if conversation.user_id != request.user_id {
                    warn!(
                        "[conversation:{}] requested by non-owner {}",
                        id, request.user_id
                    );
                    return Err(ChatError::NotFound(format!("conversation {id}")));
                }
                Ok(conversation)
            }
            None => {
                let conversation = self.log.create(&request.user_id, None).await?;
                info!(
                    "[conversation:{}] started for user {}",
                    conversation.id, request.user_id
                );
                Ok(conversation)
            }
        }
    }

    /// The last `history_window` messages before `current_id`.
    ///
    /// A failed read yields an empty history.
    async fn recent_history(&self, conversation_id: &str, current_id: &str) -> Vec<Message> {
        let window = self.assembler.history_window();
        if window == 0 {
            return Vec::new();
        }

        let result = async {
            let count = self.log.count_messages(conversation_id).await?;
            let offset = count.saturating_sub(window + 1);
            self.log
                .list_messages(conversation_id, offset, window + 1)
                .await
        }
        .await;

        match result {
            Ok(messages) => {
                let mut prior: Vec<Message> = messages
                    .into_iter()
                    .filter(|m| m.id != current_id)
                    .collect();
                let excess = prior.len().saturating_sub(window);
                prior.split_off(excess)
            }
            Err(e) => {
                warn!(
                    "[conversation:{}] history read failed, continuing without history: {}",
                    conversation_id, e
                );
                Vec::new()
            }
        }
    }

    async fn persist_assistant(
        &self,
        conversation_id: &str,
        text: String,
        tokens_used: Option<u32>,
        metadata: Metadata,
    ) -> Result<Message, ChatError> {
        self.log
            .append_message(
                NewMessage::new(conversation_id, MessageRole::Assistant, text)
                    .with_tokens_used(tokens_used)
                    .with_metadata(metadata),
            )
            .await
            .map_err(|e| {
                error!(
                    "[conversation:{}] failed to store assistant message: {}",
                    conversation_id, e
                );
                ChatError::Persistence(e)
            })
    }

    /// Fire-and-forget write under `"{conversationId}:{userMessageId}"`.
    fn cache_response(&self, turn: &PreparedTurn, text: &str) {
        let cache = Arc::clone(&self.cache);
        let key = cache_key(&turn.conversation.id, &turn.user_message.id);
        let value = text.to_string();
        let ttl = self.settings.cache_ttl_seconds;

        tokio::spawn(async move {
            if let Err(e) = cache.set(&key, &value, Some(ttl)).await {
                warn!(key = %key, error = %e, "failed to cache chat response");
            }
        });
    }

    async fn drive_stream(&self, turn: PreparedTurn, tx: mpsc::Sender<ChatStreamEvent>) {
        // the caller may hang up while the backend is still connecting
        let mut fragments = tokio::select! {
            _ = tx.closed() => {
                info!(
                    "[conversation:{}] stream cancelled before generation started",
                    turn.conversation.id
                );
                return;
            }
            stream = self.generator.generate_stream(&turn.context) => stream,
        };
        let mut text = String::new();
        let mut tokens_used = None;
        let mut cancelled = false;

        loop {
            tokio::select! {
                _ = tx.closed() => {
                    cancelled = true;
                    break;
                }
                event = fragments.next() => match event {
                    Some(StreamEvent::Delta(fragment)) => {
                        text.push_str(&fragment);
                        if tx.send(ChatStreamEvent::Fragment(fragment)).await.is_err() {
                            cancelled = true;
                            break;
                        }
                    }
                    Some(StreamEvent::Usage(usage)) => tokens_used = Some(usage.total()),
                    None => break,
                }
            }
        }
        // releases the backend connection
        drop(fragments);

        let conversation_id = turn.conversation.id.clone();

        if cancelled {
            info!("[conversation:{}] stream cancelled by caller", conversation_id);
            if self.settings.persist_partial_on_cancel && !text.is_empty() {
                let mut metadata = Metadata::new();
                metadata.insert("partial".to_string(), serde_json::Value::Bool(true));
                // nobody is listening; the error is already logged
                let _ = self
                    .persist_assistant(&conversation_id, text, tokens_used, metadata)
                    .await;
            }
            return;
        }

        match self
            .persist_assistant(&conversation_id, text, tokens_used, Metadata::new())
            .await
        {
            Ok(assistant) => {
                self.cache_response(&turn, &assistant.content);
                let _ = tx
                    .send(ChatStreamEvent::Done(build_response(&turn, assistant)))
                    .await;
            }
            Err(e) => {
                let _ = tx.send(ChatStreamEvent::Error(e.to_string())).await;
            }
        }
    }
}

pub fn cache_key(conversation_id: &str, user_message_id: &str) -> String {
    format!("{conversation_id}:{user_message_id}")
}

fn validate(request: &ChatRequest) -> Result<(), ChatError> {
    if request.message.trim().is_empty() {
        return Err(ChatError::Validation("message must not be empty".to_string()));
    }
    if request.user_id.trim().is_empty() {
        return Err(ChatError::Validation("userId must not be empty".to_string()));
    }
    if let Some(id) = &request.conversation_id
        && id.trim().is_empty()
    {
        return Err(ChatError::Validation(
            "conversationId must not be blank".to_string(),
        ));
    }
    Ok(())
}

fn build_response(turn: &PreparedTurn, assistant: Message) -> ChatResponse {
    ChatResponse {
        message: assistant.content,
        conversation_id: turn.conversation.id.clone(),
        message_id: assistant.id,
        related_knowledge: turn
            .knowledge
            .iter()
            .map(|scored| KnowledgeSummary::from(&scored.node))
            .collect(),
        tokens_used: assistant.tokens_used,
        confidence_score: turn
            .knowledge
            .iter()
            .map(|scored| scored.score)
            .reduce(f32::max),
    }
}
