//! Usage: Request pipeline (mutable per-request context + ordered stages).
//!
//! Stages share one [`RequestContext`] per inbound request. A stage that
//! completes an upstream exchange stores the response and sets the stop flag;
//! deferral errors are caught at the stage boundary so a later stage (or the
//! router's default handler) can still serve the request.

use crate::gateway::errors::RelayError;
use crate::models::claude::MessagesRequest;
use axum::http::HeaderMap;
use axum::response::Response;
use std::future::Future;
use std::pin::Pin;

pub struct RequestContext {
    pub trace_id: String,
    /// Parsed request; `None` when the inbound body was not a valid
    /// Messages API request (stages no-op in that case).
    pub request: Option<MessagesRequest>,
    /// Headers of the original inbound request, kept for passthrough
    /// concerns such as caller-supplied `anthropic-beta` tokens.
    pub inbound_headers: HeaderMap,
    pub response: Option<Response>,
    pub stop_pipeline: bool,
}

impl RequestContext {
    pub fn new(trace_id: String, inbound_headers: HeaderMap) -> Self {
        Self {
            trace_id,
            request: None,
            inbound_headers,
            response: None,
            stop_pipeline: false,
        }
    }
}

pub trait PipelineStage: Send + Sync {
    fn name(&self) -> &'static str;

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send + 'a>>;
}

#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn PipelineStage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: impl PipelineStage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Run stages in order until one sets the stop flag. Deferrals are
    /// swallowed here, at the stage boundary; other errors propagate.
    pub async fn run(&self, ctx: &mut RequestContext) -> Result<(), RelayError> {
        for stage in &self.stages {
            if ctx.stop_pipeline {
                break;
            }
            match stage.process(ctx).await {
                Ok(()) => {}
                Err(err) if err.is_deferral() => {
                    tracing::debug!(
                        stage = stage.name(),
                        trace_id = %ctx.trace_id,
                        "stage deferred: {}",
                        err
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}
