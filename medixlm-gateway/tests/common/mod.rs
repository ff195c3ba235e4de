//! Shared fakes and builders for gateway integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use medixlm_core::ChatSettings;
use medixlm_db::{
    Conversation, ConversationLog, DbError, DbResult, InMemoryConversationLog, Message,
    MessageRole, NewMessage,
};
use medixlm_gateway::cache::{Cache, CacheError, CacheResult, InMemoryCache};
use medixlm_gateway::chat::{ContextAssembler, ResponseGenerator};
use medixlm_gateway::orchestrator::{ChatOrchestrator, OrchestratorSettings};
use medixlm_gateway::providers::{
    ChatMessage, GenerationOptions, Provider, ProviderError, ProviderResponse, ProviderStream,
    ProviderUsage, StreamEvent,
};
use medixlm_gateway::state::AppState;
use medixlm_knowledge::{
    EmbeddingProvider, HashingEmbedder, InMemoryKnowledgeStore, KnowledgeCurator, KnowledgeError,
    KnowledgeNode, KnowledgeResult, KnowledgeRetriever, KnowledgeSettings, KnowledgeStore,
    KnowledgeType, NewKnowledgeNode, Properties, Relationship, RelationshipType, ScoredNode,
};
use tokio::sync::Mutex;

pub const DIM: usize = 384;
pub const FALLBACK: &str = "Sorry, I cannot answer right now.";
pub const PERSONA: &str = "You are MediXLM, a careful medical information assistant.";

/// How the scripted backend behaves.
#[derive(Debug, Clone)]
pub enum Script {
    /// Reply with these fragments (concatenated for non-streaming calls).
    Reply(Vec<&'static str>),
    /// Every call fails.
    Fail,
    /// Stream the fragments, then never finish.
    StallAfter(Vec<&'static str>),
    /// Wait this long before answering, like a backend still loading.
    SlowStart(Duration, Vec<&'static str>),
}

/// One recorded generation call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub system: String,
    pub history: Vec<ChatMessage>,
}

/// Generation backend that replays a script and records what it was given.
pub struct ScriptedProvider {
    script: Script,
    calls: Mutex<Vec<RecordedCall>>,
    call_count: AtomicUsize,
    stream_dropped: Arc<AtomicBool>,
}

impl ScriptedProvider {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
            stream_dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn replying(fragments: Vec<&'static str>) -> Self {
        Self::new(Script::Reply(fragments))
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Whether a stream, or a pending call to open one, has been dropped.
    pub fn stream_dropped(&self) -> bool {
        self.stream_dropped.load(Ordering::SeqCst)
    }

    async fn record(&self, system: &str, history: &[ChatMessage]) {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().await.push(RecordedCall {
            system: system.to_string(),
            history: history.to_vec(),
        });
    }
}

/// Flags the provider when the stream holding it is dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-1"
    }

    async fn generate(
        &self,
        system: &str,
        history: &[ChatMessage],
        _options: GenerationOptions,
    ) -> Result<ProviderResponse, ProviderError> {
        self.record(system, history).await;
        if let Script::SlowStart(delay, _) = &self.script {
            tokio::time::sleep(*delay).await;
        }
        match &self.script {
            Script::Reply(fragments)
            | Script::StallAfter(fragments)
            | Script::SlowStart(_, fragments) => Ok(ProviderResponse {
                model: "scripted-1".to_string(),
                text: fragments.concat(),
                usage: Some(ProviderUsage {
                    input_tokens: 40,
                    output_tokens: 2,
                }),
                stop_reason: Some("stop".to_string()),
            }),
            Script::Fail => Err(ProviderError::ApiError {
                status: 503,
                message: "backend overloaded".to_string(),
            }),
        }
    }

    async fn generate_stream(
        &self,
        system: &str,
        history: &[ChatMessage],
        _options: GenerationOptions,
    ) -> Result<ProviderStream, ProviderError> {
        self.record(system, history).await;
        let flag = DropFlag(Arc::clone(&self.stream_dropped));
        let (fragments, stall) = match &self.script {
            Script::Reply(fragments) => (fragments.clone(), false),
            Script::SlowStart(delay, fragments) => {
                // the flag is dropped with this future if the caller gives up
                tokio::time::sleep(*delay).await;
                (fragments.clone(), false)
            }
            Script::StallAfter(fragments) => (fragments.clone(), true),
            Script::Fail => {
                return Err(ProviderError::ApiError {
                    status: 503,
                    message: "backend overloaded".to_string(),
                });
            }
        };

        Ok(Box::pin(async_stream::stream! {
            let _flag = flag;
            for fragment in fragments {
                yield Ok(StreamEvent::Delta(fragment.to_string()));
            }
            if stall {
                futures::future::pending::<()>().await;
            }
            yield Ok(StreamEvent::Usage(ProviderUsage {
                input_tokens: 40,
                output_tokens: 2,
            }));
        }))
    }
}

/// Which conversation log operations fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFaults {
    pub user_append: bool,
    pub assistant_append: bool,
    pub reads: bool,
}

/// In-memory log with injectable failures.
pub struct FaultyLog {
    inner: InMemoryConversationLog,
    faults: LogFaults,
}

impl FaultyLog {
    pub fn new(faults: LogFaults) -> Self {
        Self {
            inner: InMemoryConversationLog::new(),
            faults,
        }
    }
}

fn unavailable() -> DbError {
    DbError::Unavailable("disk full".to_string())
}

#[async_trait]
impl ConversationLog for FaultyLog {
    async fn create(&self, user_id: &str, title: Option<&str>) -> DbResult<Conversation> {
        self.inner.create(user_id, title).await
    }

    async fn get_by_id(&self, id: &str) -> DbResult<Option<Conversation>> {
        self.inner.get_by_id(id).await
    }

    async fn append_message(&self, message: NewMessage) -> DbResult<Message> {
        let fails = match message.role {
            MessageRole::User => self.faults.user_append,
            MessageRole::Assistant => self.faults.assistant_append,
            MessageRole::System => false,
        };
        if fails {
            return Err(unavailable());
        }
        self.inner.append_message(message).await
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        offset: usize,
        limit: usize,
    ) -> DbResult<Vec<Message>> {
        if self.faults.reads {
            return Err(unavailable());
        }
        self.inner
            .list_messages(conversation_id, offset, limit)
            .await
    }

    async fn count_messages(&self, conversation_id: &str) -> DbResult<usize> {
        if self.faults.reads {
            return Err(unavailable());
        }
        self.inner.count_messages(conversation_id).await
    }
}

/// Embedding provider that is always down.
pub struct DownEmbedder;

#[async_trait]
impl EmbeddingProvider for DownEmbedder {
    fn model_name(&self) -> &str {
        "down"
    }

    fn dims(&self) -> usize {
        DIM
    }

    async fn embed_batch(&self, _inputs: &[String]) -> KnowledgeResult<Vec<Vec<f32>>> {
        Err(KnowledgeError::Unavailable("embedding service down".to_string()))
    }
}

/// Knowledge store whose backend is unreachable.
pub struct DownStore;

fn store_down() -> KnowledgeError {
    KnowledgeError::Unavailable("graph store unreachable".to_string())
}

#[async_trait]
impl KnowledgeStore for DownStore {
    async fn create_node(&self, _node: KnowledgeNode) -> KnowledgeResult<KnowledgeNode> {
        Err(store_down())
    }

    async fn get_node_by_id(&self, _id: &str) -> KnowledgeResult<Option<KnowledgeNode>> {
        Err(store_down())
    }

    async fn update_node(&self, _node: &KnowledgeNode) -> KnowledgeResult<()> {
        Err(store_down())
    }

    async fn search_by_name(
        &self,
        _substring: &str,
        _type_filter: Option<KnowledgeType>,
        _limit: usize,
    ) -> KnowledgeResult<Vec<KnowledgeNode>> {
        Err(store_down())
    }

    async fn create_relationship(
        &self,
        _source_id: &str,
        _target_id: &str,
        _relationship_type: RelationshipType,
        _properties: Properties,
    ) -> KnowledgeResult<Relationship> {
        Err(store_down())
    }

    async fn neighbors(
        &self,
        _node_id: &str,
        _type_filter: Option<RelationshipType>,
    ) -> KnowledgeResult<Vec<KnowledgeNode>> {
        Err(store_down())
    }

    async fn similarity_search(
        &self,
        _vector: &[f32],
        _type_filter: Option<KnowledgeType>,
        _limit: usize,
    ) -> KnowledgeResult<Vec<ScoredNode>> {
        Err(store_down())
    }
}

/// Cache that rejects every operation.
pub struct DownCache;

#[async_trait]
impl Cache for DownCache {
    async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl_seconds: Option<u64>) -> CacheResult<()> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn delete(&self, _key: &str) -> CacheResult<bool> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn exists(&self, _key: &str) -> CacheResult<bool> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn ttl(&self, _key: &str) -> CacheResult<Option<u64>> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn clear(&self, _prefix: &str) -> CacheResult<usize> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn increment(&self, _key: &str) -> CacheResult<i64> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}

/// Everything a test needs to drive and inspect the pipeline.
pub struct Harness {
    pub orchestrator: ChatOrchestrator,
    pub log: Arc<dyn ConversationLog>,
    pub provider: Arc<ScriptedProvider>,
    pub cache: Arc<dyn Cache>,
    pub retriever: KnowledgeRetriever,
    pub curator: KnowledgeCurator,
}

impl Harness {
    pub fn state(&self) -> AppState {
        AppState::new(
            self.orchestrator.clone(),
            self.retriever.clone(),
            self.curator.clone(),
        )
    }

    /// Seed the knowledge graph with a few well-separated nodes.
    pub async fn seed_medical_knowledge(&self) {
        for (name, node_type, description) in [
            (
                "Diabetes mellitus",
                KnowledgeType::Disease,
                "A chronic metabolic disease characterized by high blood sugar",
            ),
            (
                "Metformin",
                KnowledgeType::Medication,
                "First-line oral medication that lowers blood glucose",
            ),
            (
                "Tibial fracture",
                KnowledgeType::Disease,
                "A break of the shin bone",
            ),
        ] {
            self.curator
                .add_knowledge(NewKnowledgeNode::new(name, node_type).with_description(description))
                .await
                .unwrap();
        }
    }
}

/// Builder for a [`Harness`] with swappable collaborators.
pub struct HarnessBuilder {
    script: Script,
    log: Option<Arc<dyn ConversationLog>>,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Option<Arc<dyn KnowledgeStore>>,
    cache: Arc<dyn Cache>,
    chat: ChatSettings,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            script: Script::Reply(vec!["Diabetes is ", "a chronic condition."]),
            log: None,
            embedder: Arc::new(HashingEmbedder::new(DIM)),
            store: None,
            cache: Arc::new(InMemoryCache::new()),
            chat: ChatSettings::default(),
        }
    }
}

impl HarnessBuilder {
    pub fn script(mut self, script: Script) -> Self {
        self.script = script;
        self
    }

    pub fn log(mut self, log: Arc<dyn ConversationLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn store(mut self, store: Arc<dyn KnowledgeStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn chat(mut self, edit: impl FnOnce(&mut ChatSettings)) -> Self {
        edit(&mut self.chat);
        self
    }

    /// Conversation log backed by an in-memory SQLite database.
    pub async fn sqlite_log(self) -> Self {
        let db = medixlm_db::test_helpers::create_test_pool().await.unwrap();
        self.log(Arc::new(db))
    }

    pub fn build(self) -> Harness {
        let log = self
            .log
            .unwrap_or_else(|| Arc::new(InMemoryConversationLog::new()));
        let provider = Arc::new(ScriptedProvider::new(self.script));

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryKnowledgeStore::new(DIM)));
        let knowledge_settings = KnowledgeSettings {
            embedding_dim: DIM,
            ..Default::default()
        };
        // curation always embeds locally so seeding works with a broken retriever embedder
        let curator = KnowledgeCurator::new(store.clone(), Arc::new(HashingEmbedder::new(DIM)));
        let retriever = KnowledgeRetriever::new(store, self.embedder, knowledge_settings);

        let generator = ResponseGenerator::new(
            provider.clone(),
            FALLBACK,
            GenerationOptions {
                temperature: 0.7,
                max_tokens: 2000,
            },
        );
        let orchestrator = ChatOrchestrator::new(
            log.clone(),
            retriever.clone(),
            ContextAssembler::from_settings(&self.chat, Some(PERSONA.to_string())),
            generator,
            self.cache.clone(),
            OrchestratorSettings::from(&self.chat),
        );

        Harness {
            orchestrator,
            log,
            provider,
            cache: self.cache,
            retriever,
            curator,
        }
    }
}

/// Poll `condition` until it holds or a second passes.
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
