use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::logging::{RequestLogger, SharedLogger};
use crate::proxy;
use crate::translate::openai_types::{ChatRequest, ModelList, ModelEntry};
use crate::translate::request::{fallback_seed, to_backend_request};

use axum::body::Body;
use axum::extract::rejection::{BytesRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Response header carrying the id used in the request log.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub config: ProxyConfig,
    pub client: reqwest::Client,
    pub logger: SharedLogger,
}

#[derive(Debug, Deserialize)]
pub struct CompletionQuery {
    pub q: Option<String>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat/completions", post(handle_chat_completions))
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/health", get(handle_health))
        .route("/models", get(handle_models))
        .route("/v1/models", get(handle_models))
        .layer(DefaultBodyLimit::disable())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_chat_completions(
    State(state): State<Arc<AppState>>,
    query: std::result::Result<Query<CompletionQuery>, QueryRejection>,
    headers: HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    let logger = state
        .logger
        .for_request(uuid::Uuid::new_v4().simple().to_string());

    let mut resp = match (query, body) {
        (Ok(Query(query)), Ok(body)) => {
            chat_completions(&state, query, &headers, &body, &logger).await
        }
        (Err(e), _) => reject(&logger, e.body_text()),
        (_, Err(e)) => reject(&logger, e.body_text()),
    };
    if let Ok(value) = HeaderValue::from_str(logger.request_id()) {
        resp.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    resp
}

/// Inbound decode failure, reported with the usual `{error}` body.
fn reject(logger: &RequestLogger, message: String) -> Response {
    logger.warn("server", format!("Rejected request: {}", message));
    ProxyError::invalid_request(message).into_response()
}

async fn chat_completions(
    state: &AppState,
    query: CompletionQuery,
    headers: &HeaderMap,
    body: &[u8],
    logger: &RequestLogger,
) -> Response {
    let req: ChatRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => {
            logger.warn("server", format!("Failed to parse request: {}", e));
            return ProxyError::invalid_request(e.to_string()).into_response();
        }
    };

    let seed = fallback_seed(query.q.as_deref(), &state.config.default_greeting);
    let data = to_backend_request(&req, seed);

    logger.info_with_context(
        "server",
        "Chat completion request",
        serde_json::json!({
            "model": req.model,
            "stream": req.stream,
            "messages": req.messages.len(),
            "connectors": data.connectors.len(),
        }),
    );

    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    if data.stream {
        match proxy::proxy_streaming(&data, authorization, &state.config, &state.client, logger)
            .await
        {
            Ok(frames) => event_stream_response(Body::from_stream(frames)),
            Err(e) => {
                logger.error("server", format!("Streaming setup error: {}", e));
                e.into_response()
            }
        }
    } else {
        match proxy::proxy_non_streaming(
            &data,
            authorization,
            &state.config,
            &state.client,
            logger,
        )
        .await
        {
            Ok(resp) => Json(resp).into_response(),
            Err(e) => {
                logger.error("server", format!("Proxy error: {}", e));
                e.into_response()
            }
        }
    }
}

/// Wrap an SSE body with headers that keep intermediaries from buffering it.
fn event_stream_response(body: Body) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream; charset=UTF-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-accel-buffering", "no")
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(header::ACCESS_CONTROL_ALLOW_HEADERS, "*")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<ModelList> {
    let data = state
        .config
        .models
        .iter()
        .map(|id| ModelEntry {
            id: id.clone(),
            object: "model".to_string(),
            owned_by: "cohere".to_string(),
        })
        .collect();

    Json(ModelList {
        object: "list".to_string(),
        data,
    })
}
