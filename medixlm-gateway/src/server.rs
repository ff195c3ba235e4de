use std::convert::Infallible;

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::Stream;
use medixlm_db::Message;
use medixlm_knowledge::{
    KnowledgeError, KnowledgeNode, KnowledgeType, KnowledgeUpdate, NewKnowledgeNode, Properties,
    Relationship, RelationshipType, ScoredNode,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::orchestrator::{ChatError, ChatRequest, ChatResponse, ChatStreamEvent};
use crate::state::AppState;

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 500;
const DEFAULT_SEARCH_LIMIT: usize = 5;
const MAX_SEARCH_LIMIT: usize = 50;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Handler error carrying the HTTP status it maps to.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        let status = match &err {
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<KnowledgeError> for ApiError {
    fn from(err: KnowledgeError) -> Self {
        let status = if err.is_not_found() {
            StatusCode::NOT_FOUND
        } else if err.is_validation() {
            StatusCode::BAD_REQUEST
        } else {
            match &err {
                KnowledgeError::Http(_)
                | KnowledgeError::Embedding(_)
                | KnowledgeError::EmbeddingDimMismatch { .. }
                | KnowledgeError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            }
        };
        if status.is_server_error() {
            error!("knowledge request failed: {}", err);
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Run the HTTP server
pub async fn run(state: AppState, bind_addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("Server listening on {}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Create the router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/chat", post(chat_handler))
        .route("/api/v1/chat/stream", post(chat_stream_handler))
        .route(
            "/api/v1/chat/history/{conversation_id}",
            get(history_handler),
        )
        .route("/api/v1/knowledge", post(create_knowledge_handler))
        .route(
            "/api/v1/knowledge/relationships",
            post(create_relationship_handler),
        )
        .route(
            "/api/v1/knowledge/search",
            get(name_search_handler).post(semantic_search_handler),
        )
        .route(
            "/api/v1/knowledge/{id}",
            get(get_knowledge_handler).patch(update_knowledge_handler),
        )
        .route("/api/v1/knowledge/{id}/related", get(related_handler))
        .with_state(state)
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Health check handler
async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Chat handler - POST /api/v1/chat
async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Json<ChatResponse>> {
    let Json(request) = payload?;
    let response = state.orchestrator.process_message(request).await?;
    Ok(Json(response))
}

/// Streaming chat handler - POST /api/v1/chat/stream
///
/// Emits `fragment` events (`{"text": ...}`) followed by one `done` event
/// carrying the chat response, or one `error` event.
async fn chat_stream_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let Json(request) = payload?;
    let mut events = state.orchestrator.process_message_stream(request).await?;

    // dropping this stream on disconnect drops the receiver, which cancels generation
    let stream = async_stream::stream! {
        while let Some(event) = events.recv().await {
            yield Ok(to_sse_event(event));
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_sse_event(event: ChatStreamEvent) -> Event {
    let built = match event {
        ChatStreamEvent::Fragment(text) => Event::default()
            .event("fragment")
            .json_data(serde_json::json!({ "text": text })),
        ChatStreamEvent::Done(response) => Event::default().event("done").json_data(response),
        ChatStreamEvent::Error(message) => Event::default()
            .event("error")
            .json_data(ErrorResponse { error: message }),
    };
    built.unwrap_or_else(|e| {
        warn!("failed to encode stream event: {}", e);
        Event::default().event("error").data("event encoding failed")
    })
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    skip: usize,
    limit: Option<usize>,
    user_id: Option<String>,
}

/// History handler - GET /api/v1/chat/history/{conversation_id}
async fn history_handler(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Message>>> {
    let Query(query) = query?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);

    let messages = state
        .orchestrator
        .conversation_history(
            &conversation_id,
            query.user_id.as_deref(),
            query.skip,
            limit,
        )
        .await?;
    Ok(Json(messages))
}

/// Create node handler - POST /api/v1/knowledge
async fn create_knowledge_handler(
    State(state): State<AppState>,
    payload: Result<Json<NewKnowledgeNode>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<KnowledgeNode>)> {
    let Json(request) = payload?;
    let node = state.curator.add_knowledge(request).await?;
    Ok((StatusCode::CREATED, Json(node)))
}

/// Get node handler - GET /api/v1/knowledge/{id}
async fn get_knowledge_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<KnowledgeNode>> {
    Ok(Json(state.retriever.get_node(&id).await?))
}

/// Update node handler - PATCH /api/v1/knowledge/{id}
async fn update_knowledge_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<KnowledgeUpdate>, JsonRejection>,
) -> ApiResult<Json<KnowledgeNode>> {
    let Json(update) = payload?;
    Ok(Json(state.curator.update_knowledge(&id, update).await?))
}

#[derive(Debug, Deserialize)]
struct LinkRequest {
    source_id: String,
    target_id: String,
    relationship_type: String,
    #[serde(default)]
    properties: Properties,
}

/// Link handler - POST /api/v1/knowledge/relationships
async fn create_relationship_handler(
    State(state): State<AppState>,
    payload: Result<Json<LinkRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Relationship>)> {
    let Json(request) = payload?;
    let relationship_type: RelationshipType = request.relationship_type.parse()?;
    let relationship = state
        .curator
        .link_knowledge(
            &request.source_id,
            &request.target_id,
            relationship_type,
            request.properties,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(relationship)))
}

#[derive(Debug, Deserialize)]
struct SemanticSearchRequest {
    query: String,
    #[serde(default, rename = "type")]
    node_type: Option<String>,
    limit: Option<usize>,
}

/// Semantic search handler - POST /api/v1/knowledge/search
async fn semantic_search_handler(
    State(state): State<AppState>,
    payload: Result<Json<SemanticSearchRequest>, JsonRejection>,
) -> ApiResult<Json<Vec<ScoredNode>>> {
    let Json(request) = payload?;
    if request.query.trim().is_empty() {
        return Err(ApiError::bad_request("query must not be empty"));
    }
    let type_filter = parse_type_filter(request.node_type.as_deref())?;
    let limit = request
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .clamp(1, MAX_SEARCH_LIMIT);

    let results = state
        .retriever
        .try_retrieve(&request.query, type_filter, limit)
        .await?;
    Ok(Json(results))
}

#[derive(Debug, Deserialize)]
struct NameSearchQuery {
    name: String,
    #[serde(default, rename = "type")]
    node_type: Option<String>,
}

/// Name search handler - GET /api/v1/knowledge/search?name=&type=
async fn name_search_handler(
    State(state): State<AppState>,
    query: Result<Query<NameSearchQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<KnowledgeNode>>> {
    let Query(query) = query?;
    let type_filter = parse_type_filter(query.node_type.as_deref())?;
    let nodes = state
        .retriever
        .search_by_name(&query.name, type_filter)
        .await?;
    Ok(Json(nodes))
}

#[derive(Debug, Deserialize)]
struct RelatedQuery {
    relationship_type: Option<String>,
    depth: Option<u8>,
}

/// Related nodes handler - GET /api/v1/knowledge/{id}/related
async fn related_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<RelatedQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<KnowledgeNode>>> {
    let Query(query) = query?;
    let relationship_type = query
        .relationship_type
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .map(str::parse::<RelationshipType>)
        .transpose()?;

    let nodes = state
        .retriever
        .related(&id, relationship_type, query.depth.unwrap_or(1))
        .await?;
    Ok(Json(nodes))
}

fn parse_type_filter(value: Option<&str>) -> Result<Option<KnowledgeType>, KnowledgeError> {
    value
        .filter(|value| !value.trim().is_empty())
        .map(str::parse::<KnowledgeType>)
        .transpose()
}
