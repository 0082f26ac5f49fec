//! Usage: Relay error taxonomy + standardized JSON error responses.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Terminal outcome of a relay stage, classified before any body byte is
/// handed to the caller.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Neither the affinity cache nor the pool could supply an eligible
    /// account. A deferral: the stage declines, it does not fail the request.
    #[error("no accounts available")]
    NoAccountsAvailable,
    /// Upstream rejected the model name outright. Also a deferral.
    #[error("upstream rejected model name: {model}")]
    InvalidModelName { model: String },
    #[error("upstream rate limited until {resets_at}")]
    RateLimited { resets_at: i64 },
    #[error("oauth authentication is not allowed for this organization")]
    OAuthNotAllowed,
    #[error("upstream error ({status}): {error_type}: {message}")]
    UpstreamHttp {
        status: u16,
        error_type: String,
        message: String,
    },
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to serialize upstream request: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl RelayError {
    /// Deferrals are swallowed at the stage boundary so a later stage or
    /// default handler may still serve the request.
    pub fn is_deferral(&self) -> bool {
        matches!(
            self,
            RelayError::NoAccountsAvailable | RelayError::InvalidModelName { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayErrorCode {
    BadRequest,
    BodyTooLarge,
    RateLimited,
    OAuthNotAllowed,
    UpstreamHttp,
    UpstreamSend,
    Internal,
    Unserved,
}

impl RelayErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "RELAY_BAD_REQUEST",
            Self::BodyTooLarge => "RELAY_BODY_TOO_LARGE",
            Self::RateLimited => "RELAY_RATE_LIMITED",
            Self::OAuthNotAllowed => "RELAY_OAUTH_NOT_ALLOWED",
            Self::UpstreamHttp => "RELAY_UPSTREAM_HTTP",
            Self::UpstreamSend => "RELAY_UPSTREAM_SEND",
            Self::Internal => "RELAY_INTERNAL_ERROR",
            Self::Unserved => "RELAY_UNSERVED",
        }
    }
}

#[derive(Debug, Serialize)]
struct RelayErrorResponse {
    trace_id: String,
    error_code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    resets_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_seconds: Option<u64>,
}

pub fn error_response(
    status: StatusCode,
    trace_id: String,
    error_code: RelayErrorCode,
    message: String,
) -> Response {
    build_error_response(status, trace_id, error_code, message, None, None)
}

fn build_error_response(
    status: StatusCode,
    trace_id: String,
    error_code: RelayErrorCode,
    message: String,
    resets_at: Option<i64>,
    retry_after_seconds: Option<u64>,
) -> Response {
    let payload = RelayErrorResponse {
        trace_id: trace_id.clone(),
        error_code: error_code.as_str(),
        message,
        resets_at,
        retry_after_seconds,
    };

    let mut resp = (status, Json(payload)).into_response();

    if let Ok(v) = HeaderValue::from_str(&trace_id) {
        resp.headers_mut().insert("x-trace-id", v);
    }

    if let Some(seconds) = retry_after_seconds.filter(|v| *v > 0) {
        if let Ok(v) = HeaderValue::from_str(&seconds.to_string()) {
            resp.headers_mut().insert(header::RETRY_AFTER, v);
        }
    }

    resp
}

/// Map a propagated relay error to the caller-facing JSON response.
pub fn relay_error_response(err: &RelayError, trace_id: &str, now_unix: i64) -> Response {
    match err {
        RelayError::RateLimited { resets_at } => {
            let retry_after = resets_at.saturating_sub(now_unix).max(1) as u64;
            build_error_response(
                StatusCode::TOO_MANY_REQUESTS,
                trace_id.to_string(),
                RelayErrorCode::RateLimited,
                err.to_string(),
                Some(*resets_at),
                Some(retry_after),
            )
        }
        RelayError::OAuthNotAllowed => error_response(
            StatusCode::FORBIDDEN,
            trace_id.to_string(),
            RelayErrorCode::OAuthNotAllowed,
            err.to_string(),
        ),
        RelayError::UpstreamHttp { status, .. } => error_response(
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
            trace_id.to_string(),
            RelayErrorCode::UpstreamHttp,
            err.to_string(),
        ),
        RelayError::Transport(_) => error_response(
            StatusCode::BAD_GATEWAY,
            trace_id.to_string(),
            RelayErrorCode::UpstreamSend,
            err.to_string(),
        ),
        // Deferrals are swallowed before reaching this translator; anything
        // arriving here is an internal misuse.
        RelayError::NoAccountsAvailable
        | RelayError::InvalidModelName { .. }
        | RelayError::Serialize(_) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            trace_id.to_string(),
            RelayErrorCode::Internal,
            err.to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deferral_classification() {
        assert!(RelayError::NoAccountsAvailable.is_deferral());
        assert!(RelayError::InvalidModelName { model: "m".into() }.is_deferral());
        assert!(!RelayError::OAuthNotAllowed.is_deferral());
        assert!(!RelayError::RateLimited { resets_at: 0 }.is_deferral());
    }

    #[test]
    fn rate_limited_response_carries_retry_after() {
        let err = RelayError::RateLimited { resets_at: 1_000 };
        let resp = relay_error_response(&err, "rly-test", 900);
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            resp.headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
            Some("100")
        );
        assert_eq!(
            resp.headers().get("x-trace-id").and_then(|v| v.to_str().ok()),
            Some("rly-test")
        );
    }

    #[test]
    fn rate_limited_retry_after_never_drops_below_one_second() {
        let err = RelayError::RateLimited { resets_at: 100 };
        let resp = relay_error_response(&err, "rly-test", 10_000);
        assert_eq!(
            resp.headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
            Some("1")
        );
    }

    #[test]
    fn upstream_http_status_passes_through() {
        let err = RelayError::UpstreamHttp {
            status: 422,
            error_type: "invalid_request_error".into(),
            message: "bad field".into(),
        };
        let resp = relay_error_response(&err, "rly-test", 0);
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn oauth_not_allowed_maps_to_forbidden() {
        let resp = relay_error_response(&RelayError::OAuthNotAllowed, "rly-test", 0);
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
