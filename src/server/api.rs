use crate::relay::{ Relay, RelayError, MISSING_CREDENTIAL_MESSAGE };
use crate::models::chat::Conversation;

use std::num::NonZeroU32;
use std::sync::Arc;
use axum::{
    body::{ Body, Bytes },
    extract::{ DefaultBodyLimit, State },
    http::{ header, HeaderValue, StatusCode },
    response::{ IntoResponse, Response },
    routing::{ get, post },
    Json,
    Router,
};
use governor::{ clock::{ Clock, DefaultClock }, state::{ InMemoryState, NotKeyed }, Quota, RateLimiter };
use serde_json::json;
use tower_http::cors::{ Any, CorsLayer };
use log::{ debug, warn };

const GENERIC_UPSTREAM_MESSAGE: &str = "The assistant is unavailable right now. Please try again later.";

type RequestLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Clone)]
pub struct AppState {
    relay: Arc<Relay>,
    limiter: Option<Arc<RequestLimiter>>,
    expose_error_details: bool,
}

impl AppState {
    /// `rate_limit_per_second == 0` disables the limiter.
    pub fn new(relay: Arc<Relay>, rate_limit_per_second: u32, expose_error_details: bool) -> Self {
        let limiter = NonZeroU32::new(rate_limit_per_second).map(|per_second|
            Arc::new(RateLimiter::direct(Quota::per_second(per_second)))
        );
        Self {
            relay,
            limiter,
            expose_error_details,
        }
    }

    fn check_rate_limit(&self) -> Result<(), ApiError> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };
        limiter.check().map_err(|not_until| {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            warn!("Rate limit exceeded, rejecting chat request");
            ApiError::RateLimited { retry_after_secs: wait.as_secs().max(1) }
        })
    }

    fn relay_error(&self, err: RelayError) -> ApiError {
        match err {
            RelayError::Configuration => ApiError::Configuration,
            RelayError::InvalidInput(message) => ApiError::BadRequest(message),
            RelayError::Upstream(e) =>
                ApiError::Upstream {
                    detail: self.expose_error_details.then(|| e.to_string()),
                },
        }
    }
}

/// Everything a chat request can fail with, already mapped to what the caller may see.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    RateLimited {
        retry_after_secs: u64,
    },
    Configuration,
    Upstream {
        detail: Option<String>,
    },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) =>
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "Bad Request", "message": message })),
                ).into_response(),
            ApiError::RateLimited { retry_after_secs } =>
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, retry_after_secs.to_string())],
                    Json(
                        json!({ "error": "Too Many Requests", "message": "Slow down and try again shortly." })
                    ),
                ).into_response(),
            ApiError::Configuration =>
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": MISSING_CREDENTIAL_MESSAGE })),
                ).into_response(),
            ApiError::Upstream { detail } =>
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(
                        json!({
                        "error": "Internal Server Error",
                        "message": detail.unwrap_or_else(|| GENERIC_UPSTREAM_MESSAGE.to_string()),
                    })
                    ),
                ).into_response(),
        }
    }
}

fn parse_conversation(body: &[u8]) -> Result<Conversation, ApiError> {
    serde_json::from_slice::<Conversation>(body).map_err(|e| {
        debug!("Rejecting malformed chat body: {}", e);
        ApiError::BadRequest(
            format!("Request body must be a JSON array of {{role, content}} messages: {}", e)
        )
    })
}

pub fn create_router(state: AppState, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/stream", post(chat_stream_handler))
        .route("/api/health", get(health_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(cors)
        .with_state(state)
}

async fn chat_handler(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    state.check_rate_limit()?;
    let conversation = parse_conversation(&body)?;

    let result = state.relay.relay_chat(&conversation).await.map_err(|e| state.relay_error(e))?;

    let status = StatusCode::from_u16(result.status).unwrap_or(StatusCode::OK);
    Ok((status, Json(result.body)).into_response())
}

async fn chat_stream_handler(
    State(state): State<AppState>,
    body: Bytes
) -> Result<Response, ApiError> {
    state.check_rate_limit()?;
    let conversation = parse_conversation(&body)?;

    let stream = state.relay.relay_chat_stream(&conversation).await.map_err(|e| state.relay_error(e))?;

    Ok(
        (
            [
                (header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8")),
                (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
                (header::HeaderName::from_static("x-accel-buffering"), HeaderValue::from_static("no")),
            ],
            Body::from_stream(stream),
        ).into_response()
    )
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(
            json!({
            "status": "healthy",
            "assistant": state.relay.persona().assistant_name,
            "model": state.relay.model(),
            "credential_configured": state.relay.has_credential(),
        })
        ),
    )
}
