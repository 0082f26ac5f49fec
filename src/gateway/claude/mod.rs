//! Usage: Claude Messages API relay stage.
//!
//! Orchestrates one upstream exchange per request: preamble injection,
//! affinity-aware account selection, the auth-retry protocol, streamed relay,
//! and post-success checkpoint recording. The account lease is held for the
//! exchange and released when the stage returns; the streamed body outlives
//! it and closes its own connection.

mod attempt;
mod headers;
mod rate_limit;
mod selection;
mod streaming;
mod system_prompt;

pub use system_prompt::CLAUDE_CODE_PREAMBLE;

use crate::config::RelayConfig;
use crate::gateway::errors::RelayError;
use crate::gateway::pipeline::{PipelineStage, RequestContext};
use crate::services::accounts::AccountPool;
use crate::services::affinity::AffinityCache;
use crate::services::reauth::Reauthenticator;
use crate::shared::security::mask_token;
use crate::shared::time::now_unix_seconds;
use attempt::{execute_with_reauth, UpstreamSettings};
use rate_limit::apply_reset_to_account;
use selection::select_account;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use streaming::relay_response;
use system_prompt::inject_preamble;

pub struct ClaudeMessagesStage {
    upstream: UpstreamSettings,
    tier_restricted_models: Vec<String>,
    restricted_model_tier: String,
    pool: Arc<AccountPool>,
    affinity: Arc<dyn AffinityCache>,
    reauth: Arc<dyn Reauthenticator>,
}

impl ClaudeMessagesStage {
    pub fn new(
        config: &RelayConfig,
        pool: Arc<AccountPool>,
        affinity: Arc<dyn AffinityCache>,
        reauth: Arc<dyn Reauthenticator>,
    ) -> Self {
        Self {
            upstream: UpstreamSettings::from_config(config),
            tier_restricted_models: config.tier_restricted_models.clone(),
            restricted_model_tier: config.restricted_model_tier.clone(),
            pool,
            affinity,
            reauth,
        }
    }

    fn required_tier_for(&self, model: &str) -> Option<&str> {
        if self.tier_restricted_models.iter().any(|m| m == model) {
            Some(self.restricted_model_tier.as_str())
        } else {
            None
        }
    }
}

impl PipelineStage for ClaudeMessagesStage {
    fn name(&self) -> &'static str {
        "claude_messages"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send + 'a>> {
        Box::pin(async move {
            if ctx.response.is_some() {
                tracing::debug!(trace_id = %ctx.trace_id, "skipping: context already holds a response");
                return Ok(());
            }
            let Some(request) = ctx.request.as_mut() else {
                tracing::warn!(trace_id = %ctx.trace_id, "skipping: context holds no parsed request");
                return Ok(());
            };

            inject_preamble(request);

            let selected = select_account(
                &self.pool,
                self.affinity.as_ref(),
                request,
                self.required_tier_for(&request.model),
                now_unix_seconds(),
                &ctx.trace_id,
            )?;

            let request_json = serde_json::to_string(request)?;
            let model = request.model.clone();

            let response = execute_with_reauth(
                &self.upstream,
                &selected.lease,
                self.reauth.as_ref(),
                &request_json,
                &model,
                &ctx.inbound_headers,
                &ctx.trace_id,
            )
            .await?;

            // Reset bookkeeping always reflects the final attempt.
            apply_reset_to_account(response.headers(), &selected.lease);

            ctx.response = Some(relay_response(response, &ctx.trace_id));
            ctx.stop_pipeline = true;
            tracing::info!(
                trace_id = %ctx.trace_id,
                account = %mask_token(selected.lease.organization_id()),
                model = %model,
                "request served via upstream messages api"
            );

            // Best-effort: a checkpoint-store failure must never fail a
            // request whose response is already built.
            if !selected.checkpoints.is_empty() {
                if let Err(err) = self
                    .affinity
                    .record(&selected.checkpoints, selected.lease.organization_id())
                {
                    tracing::warn!(
                        trace_id = %ctx.trace_id,
                        "failed to record affinity checkpoints: {}",
                        err
                    );
                }
            }

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::pipeline::RequestContext;
    use crate::services::reauth::CookieReauthenticator;
    use axum::http::HeaderMap;

    fn stage_with_empty_pool() -> ClaudeMessagesStage {
        let config = RelayConfig::default();
        ClaudeMessagesStage::new(
            &config,
            Arc::new(AccountPool::new()),
            Arc::new(crate::services::affinity::PrefixAffinityCache::default()),
            Arc::new(CookieReauthenticator::new()),
        )
    }

    #[tokio::test]
    async fn stage_noops_when_a_response_already_exists() {
        let stage = stage_with_empty_pool();
        let mut ctx = RequestContext::new("rly-test".to_string(), HeaderMap::new());
        ctx.response = Some(
            axum::response::Response::builder()
                .status(axum::http::StatusCode::OK)
                .body(axum::body::Body::empty())
                .unwrap(),
        );

        stage.process(&mut ctx).await.unwrap();
        assert!(!ctx.stop_pipeline);
    }

    #[tokio::test]
    async fn stage_noops_without_a_parsed_request() {
        let stage = stage_with_empty_pool();
        let mut ctx = RequestContext::new("rly-test".to_string(), HeaderMap::new());

        stage.process(&mut ctx).await.unwrap();
        assert!(ctx.response.is_none());
        assert!(!ctx.stop_pipeline);
    }

    #[tokio::test]
    async fn stage_defers_when_no_account_is_available() {
        let stage = stage_with_empty_pool();
        let mut ctx = RequestContext::new("rly-test".to_string(), HeaderMap::new());
        ctx.request = Some(crate::models::claude::MessagesRequest::new(
            "claude-sonnet-4-20250514",
            vec![crate::models::claude::InputMessage::user("hi")],
        ));

        let err = stage.process(&mut ctx).await.unwrap_err();
        assert!(err.is_deferral());
    }
}
