//! Usage: Streamed relay of a successful upstream response.
//!
//! The body is forward-only and single-pass: the caller drains it or drops
//! it, and either way the wrapper's teardown releases the upstream
//! connection. Headers pass through verbatim except `content-encoding` and
//! `content-length`, which no longer hold once the outer transport re-frames
//! the body.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::Response;
use bytes::Bytes;
use futures_core::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};

type UpstreamByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

pub(crate) struct UpstreamBodyStream {
    inner: UpstreamByteStream,
    trace_id: String,
    bytes_relayed: u64,
    finished: bool,
}

impl UpstreamBodyStream {
    fn new(response: reqwest::Response, trace_id: String) -> Self {
        Self {
            inner: Box::pin(response.bytes_stream()),
            trace_id,
            bytes_relayed: 0,
            finished: false,
        }
    }
}

impl Stream for UpstreamBodyStream {
    type Item = Result<Bytes, reqwest::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(chunk))) => {
                this.bytes_relayed = this.bytes_relayed.saturating_add(chunk.len() as u64);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.finished = true;
                tracing::warn!(
                    trace_id = %this.trace_id,
                    bytes_relayed = this.bytes_relayed,
                    "upstream body errored mid-stream: {}",
                    err
                );
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.finished = true;
                tracing::debug!(
                    trace_id = %this.trace_id,
                    bytes_relayed = this.bytes_relayed,
                    "upstream body drained"
                );
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for UpstreamBodyStream {
    fn drop(&mut self) {
        if !self.finished {
            // Dropping `inner` is what actually closes the upstream
            // connection when the caller abandons the stream.
            tracing::debug!(
                trace_id = %self.trace_id,
                bytes_relayed = self.bytes_relayed,
                "caller abandoned stream before upstream body ended; closing connection"
            );
        }
    }
}

fn is_reframed_header(name: &header::HeaderName) -> bool {
    *name == header::CONTENT_ENCODING || *name == header::CONTENT_LENGTH
}

/// Build the caller-facing response: passthrough status, sanitized headers,
/// lazily relayed body.
pub(crate) fn relay_response(upstream: reqwest::Response, trace_id: &str) -> Response {
    let status = upstream.status();

    let mut headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        if is_reframed_header(name) {
            tracing::debug!(trace_id = %trace_id, header = %name, "filtering upstream header");
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    if let Ok(v) = HeaderValue::from_str(trace_id) {
        headers.insert("x-trace-id", v);
    }

    let stream = UpstreamBodyStream::new(upstream, trace_id.to_string());

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn upstream_response() -> reqwest::Response {
        let response = axum::http::Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/event-stream")
            .header("Content-Encoding", "gzip")
            .header("Content-Length", "42")
            .header("anthropic-ratelimit-unified-reset", "1700000000")
            .body("event: message_start\n\n")
            .unwrap();
        reqwest::Response::from(response)
    }

    #[tokio::test]
    async fn reframed_headers_are_dropped_and_the_rest_pass_through() {
        let response = relay_response(upstream_response(), "rly-test");

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert!(headers.get(header::CONTENT_ENCODING).is_none());
        assert!(headers.get(header::CONTENT_LENGTH).is_none());
        assert_eq!(
            headers.get("content-type").and_then(|v| v.to_str().ok()),
            Some("text/event-stream")
        );
        assert_eq!(
            headers
                .get("anthropic-ratelimit-unified-reset")
                .and_then(|v| v.to_str().ok()),
            Some("1700000000")
        );
        assert_eq!(
            headers.get("x-trace-id").and_then(|v| v.to_str().ok()),
            Some("rly-test")
        );
    }

    #[tokio::test]
    async fn body_is_relayed_unchanged() {
        let response = relay_response(upstream_response(), "rly-test");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(bytes.as_ref(), b"event: message_start\n\n");
    }

    #[tokio::test]
    async fn error_status_passes_through_verbatim() {
        let upstream = reqwest::Response::from(
            axum::http::Response::builder()
                .status(StatusCode::NOT_MODIFIED)
                .body("")
                .unwrap(),
        );
        let response = relay_response(upstream, "rly-test");
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    }
}
