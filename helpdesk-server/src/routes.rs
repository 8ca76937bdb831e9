use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::HeaderMap,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use helpdesk_shared::{ChatMessage, ChatResponse, CHAT_COMPLETE_PATH, CHAT_PATH, HEALTH_PATH};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::{Config, PromptMode};
use crate::conversation::ConversationBuilder;
use crate::error::ServerError;
use crate::identity;
use crate::llm::{ChunkStream, Generator, Prompt};
use crate::rate_limit::RateLimiter;
use crate::relay;

/// Everything shared between requests. The limiter table is the only
/// mutable part.
pub struct AppState {
    pub limiter: RateLimiter,
    pub builder: ConversationBuilder,
    pub generator: Arc<dyn Generator>,
    pub prompt_mode: PromptMode,
    pub chunk_timeout: Option<Duration>,
    pub trust_proxy_headers: bool,
}

impl AppState {
    pub fn new(config: &Config, generator: Arc<dyn Generator>) -> Self {
        Self {
            limiter: RateLimiter::new(config.rate_limit, config.rate_window),
            builder: ConversationBuilder::new(config.max_history),
            generator,
            prompt_mode: config.prompt_mode,
            chunk_timeout: config.chunk_timeout,
            trust_proxy_headers: config.trust_proxy_headers,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health))
        .route(CHAT_PATH, post(chat))
        .route(CHAT_COMPLETE_PATH, post(chat_complete))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn chat(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ServerError> {
    let chunks = start_generation(&state, peer, &headers, &body).await?;
    relay::relay(chunks, state.chunk_timeout).await
}

async fn chat_complete(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ChatResponse>, ServerError> {
    let chunks = start_generation(&state, peer, &headers, &body).await?;
    let text = relay::collect(chunks, state.chunk_timeout).await?;
    Ok(Json(ChatResponse { text }))
}

/// Identity, body, quota, prompt, backend: in that order, so that malformed
/// requests are rejected before they cost quota.
async fn start_generation(
    state: &AppState,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<ChunkStream, ServerError> {
    let identity = identity::resolve(
        headers,
        peer.map(|ConnectInfo(addr)| addr),
        state.trust_proxy_headers,
    )
    .ok_or_else(|| ServerError::BadRequest("could not determine client identity".to_string()))?;

    let history: Vec<ChatMessage> = serde_json::from_slice(body)
        .map_err(|e| ServerError::BadRequest(format!("invalid chat history: {e}")))?;

    if !state.limiter.check(&identity) {
        warn!(%identity, "Rate limit exceeded");
        return Err(ServerError::RateLimited);
    }

    info!(%identity, messages = history.len(), model = state.generator.model(), "Chat request admitted");

    let prompt = match state.prompt_mode {
        PromptMode::Flat => Prompt::Text(state.builder.build(&history)),
        PromptMode::Structured => Prompt::Turns(state.builder.build_turns(&history)),
    };

    Ok(state.generator.generate(prompt).await?)
}
