//! Usage: Upstream exchange with single-shot re-authentication retry.
//!
//! Each attempt gets its own client so its connections are scoped to the
//! attempt: dropping the client/response at a retry boundary or terminal
//! error is what closes them. There is deliberately no overall request
//! timeout (success bodies may stream indefinitely); connect and read phases
//! are bounded individually so a stalled upstream still fails.

use crate::config::RelayConfig;
use crate::gateway::claude::headers::build_upstream_headers;
use crate::gateway::claude::rate_limit::rate_limited_resets_at;
use crate::gateway::errors::RelayError;
use crate::services::accounts::AccountLease;
use crate::services::reauth::Reauthenticator;
use crate::shared::security::mask_token;
use crate::shared::time::now_unix_seconds;
use axum::http::{HeaderMap, StatusCode};
use serde_json::Value;
use std::time::Duration;

const INVALID_MODEL_MESSAGE: &str = "system: Invalid model name";
const OAUTH_NOT_ALLOWED_MESSAGE: &str =
    "OAuth authentication is currently not allowed for this organization.";

#[derive(Debug, Clone)]
pub(crate) struct UpstreamSettings {
    pub(crate) messages_url: String,
    pub(crate) proxy_url: Option<String>,
    pub(crate) connect_timeout: Duration,
    pub(crate) read_timeout: Duration,
}

impl UpstreamSettings {
    pub(crate) fn from_config(config: &RelayConfig) -> Self {
        Self {
            messages_url: config.messages_url(),
            proxy_url: config.proxy_url.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_seconds.max(1)),
            read_timeout: Duration::from_secs(config.read_timeout_seconds.max(1)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct UpstreamError {
    error_type: String,
    message: String,
}

fn parse_error_body(body: &str) -> UpstreamError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let error = parsed.get("error");
    UpstreamError {
        error_type: error
            .and_then(|e| e.get("type"))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        message: error
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_string(),
    }
}

#[derive(Debug)]
enum ErrorDisposition {
    /// Invalid or revoked token and a refresh credential is on hand.
    Reauthenticate,
    Terminal(RelayError),
}

fn classify_upstream_error(
    status: StatusCode,
    error: &UpstreamError,
    model: &str,
    retried: bool,
    has_refresh_credential: bool,
) -> ErrorDisposition {
    if status == StatusCode::BAD_REQUEST && error.message == INVALID_MODEL_MESSAGE {
        return ErrorDisposition::Terminal(RelayError::InvalidModelName {
            model: model.to_string(),
        });
    }

    if status == StatusCode::UNAUTHORIZED && error.message == OAUTH_NOT_ALLOWED_MESSAGE {
        return ErrorDisposition::Terminal(RelayError::OAuthNotAllowed);
    }

    let is_auth_error =
        status == StatusCode::UNAUTHORIZED && error.error_type == "authentication_error";
    let is_token_revoked =
        status == StatusCode::FORBIDDEN && error.error_type == "permission_error";

    if (is_auth_error || is_token_revoked) && !retried && has_refresh_credential {
        return ErrorDisposition::Reauthenticate;
    }

    ErrorDisposition::Terminal(RelayError::UpstreamHttp {
        status: status.as_u16(),
        error_type: error.error_type.clone(),
        message: error.message.clone(),
    })
}

fn build_attempt_client(settings: &UpstreamSettings) -> Result<reqwest::Client, RelayError> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(settings.connect_timeout)
        .read_timeout(settings.read_timeout)
        .redirect(reqwest::redirect::Policy::none());

    if let Some(proxy_url) = settings.proxy_url.as_deref() {
        match reqwest::Proxy::all(proxy_url) {
            Ok(proxy) => builder = builder.proxy(proxy),
            Err(err) => {
                tracing::warn!("invalid proxy url; sending direct: {}", err);
            }
        }
    }

    builder.build().map_err(RelayError::Transport)
}

/// Drive the upstream exchange: send, classify, re-authenticate at most once,
/// and hand back the successful response still holding its open body.
pub(crate) async fn execute_with_reauth(
    settings: &UpstreamSettings,
    account: &AccountLease,
    reauth: &dyn Reauthenticator,
    request_json: &str,
    model: &str,
    inbound_headers: &HeaderMap,
    trace_id: &str,
) -> Result<reqwest::Response, RelayError> {
    let mut retried = false;

    loop {
        let headers = build_upstream_headers(&account.access_token(), inbound_headers);
        let client = build_attempt_client(settings)?;
        let sent_at = now_unix_seconds();

        let response = client
            .post(&settings.messages_url)
            .headers(headers)
            .body(request_json.to_string())
            .send()
            .await?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let resets_at = rate_limited_resets_at(response.headers(), sent_at);
            drop(response);
            return Err(RelayError::RateLimited { resets_at });
        }

        if status.is_client_error() || status.is_server_error() {
            // Consuming the body closes this attempt's session before any
            // retry or error propagation.
            let body = response.text().await.unwrap_or_default();
            let error = parse_error_body(&body);

            match classify_upstream_error(status, &error, model, retried, account.has_cookie()) {
                ErrorDisposition::Reauthenticate => {
                    tracing::warn!(
                        trace_id = %trace_id,
                        account = %mask_token(account.organization_id()),
                        status = status.as_u16(),
                        error_type = %error.error_type,
                        "upstream rejected access token; attempting re-authentication"
                    );
                    if reauth.refresh(account.entry()).await {
                        retried = true;
                        continue;
                    }
                    tracing::error!(
                        trace_id = %trace_id,
                        account = %mask_token(account.organization_id()),
                        "re-authentication failed; surfacing upstream error"
                    );
                    return Err(RelayError::UpstreamHttp {
                        status: status.as_u16(),
                        error_type: error.error_type,
                        message: error.message,
                    });
                }
                ErrorDisposition::Terminal(err) => {
                    tracing::error!(
                        trace_id = %trace_id,
                        status = status.as_u16(),
                        "upstream error: {}",
                        err
                    );
                    return Err(err);
                }
            }
        }

        return Ok(response);
    }
}
