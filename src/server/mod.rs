// HTTP server
// Streaming chat over Server-Sent Events plus a JSON search endpoint


use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{Method, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

use crate::chat::{ChatMessage, ResponseStreamer, StreamEvent};
use crate::retrieval::{DEFAULT_TOP_K, Retriever, SearchResponse};
use crate::{RagError, Result};

/// Shared, read-only state handed to every request
pub struct AppState {
    pub streamer: ResponseStreamer,
    pub retriever: Retriever,
    pub top_k: usize,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    records: u64,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

impl IntoResponse for RagError {
    fn into_response(self) -> Response {
        let status = if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        error_response(status, self.to_string())
    }
}

/// Browsers call the API cross-origin, so preflights are answered for any origin
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

/// Build the application router
#[inline]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/search", post(search))
        .route("/health", get(health))
        .layer(cors_layer())
        .with_state(state)
}

/// Bind `addr` and serve until the process is stopped
#[inline]
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .await
        .map_err(RagError::Io)
}

async fn chat(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!("Rejected chat request: {}", rejection);
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    if request.message.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "request must include at least one chat message",
        );
    }

    debug!("Starting chat stream for {} messages", request.message.len());
    let events = ReceiverStream::new(state.streamer.spawn(request.message)).map(to_sse_event);

    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn to_sse_event(event: StreamEvent) -> std::result::Result<Event, Infallible> {
    Ok(Event::default().json_data(&event).unwrap_or_else(|e| {
        error!("Failed to encode stream event: {}", e);
        Event::default().data(r#"{"type":"error","data":{"message":"failed to encode event"}}"#)
    }))
}

async fn search(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<SearchRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let top_k = request.top_k.unwrap_or(state.top_k);
    let outcome = state.retriever.retrieve(&request.query, top_k).await;
    let status = match &outcome {
        Ok(_) => StatusCode::OK,
        Err(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (status, Json(SearchResponse::from(outcome))).into_response()
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    match state.retriever.store().count().await {
        Ok(records) => Json(HealthResponse {
            status: "ok",
            records,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

impl AppState {
    #[inline]
    pub fn new(streamer: ResponseStreamer, retriever: Retriever) -> Self {
        Self {
            streamer,
            retriever,
            top_k: DEFAULT_TOP_K,
        }
    }

    #[inline]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }
}
