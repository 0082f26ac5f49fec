//! Usage: HTTP surface (messages endpoint + health) and error translation.

use crate::gateway::errors::{error_response, relay_error_response, RelayErrorCode};
use crate::gateway::pipeline::{Pipeline, RequestContext};
use crate::models::claude::MessagesRequest;
use crate::shared::time::{new_trace_id, now_unix_seconds};
use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{Request, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

pub(crate) const MAX_REQUEST_BODY_BYTES: usize = 32 * 1024 * 1024;

#[derive(Clone)]
pub struct RelayState {
    pub pipeline: Arc<Pipeline>,
}

pub fn build_router(state: RelayState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/v1/messages", post(messages))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    app: &'static str,
    version: &'static str,
    ts: i64,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        app: "claude-relay",
        version: env!("CARGO_PKG_VERSION"),
        ts: now_unix_seconds(),
    })
}

async fn root() -> &'static str {
    "claude-relay is running"
}

async fn messages(State(state): State<RelayState>, req: Request<Body>) -> Response {
    let trace_id = new_trace_id();
    let (parts, body) = req.into_parts();

    let body_bytes = match to_bytes(body, MAX_REQUEST_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                trace_id,
                RelayErrorCode::BodyTooLarge,
                format!("failed to read request body: {err}"),
            );
        }
    };

    let mut ctx = RequestContext::new(trace_id.clone(), parts.headers);
    match serde_json::from_slice::<MessagesRequest>(&body_bytes) {
        Ok(mut request) => {
            // Normalization happens exactly once, at request construction.
            if request.normalize() {
                tracing::debug!(
                    trace_id = %trace_id,
                    max_tokens = request.max_tokens,
                    "raised max_tokens above thinking budget"
                );
            }
            ctx.request = Some(request);
        }
        Err(err) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                trace_id,
                RelayErrorCode::BadRequest,
                format!("invalid messages request: {err}"),
            );
        }
    }

    if let Err(err) = state.pipeline.run(&mut ctx).await {
        return relay_error_response(&err, &trace_id, now_unix_seconds());
    }

    match ctx.response {
        Some(response) => response,
        // Every stage declined; the request is deferred with no fallback
        // handler configured behind this router.
        None => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            trace_id,
            RelayErrorCode::Unserved,
            "no stage served this request".to_string(),
        ),
    }
}
