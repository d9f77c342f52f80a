//! Per-request tracing for the gRPC server.
//!
//! Every request gets a span carrying a `trace_id`, taken from the
//! `x-access-trace-id` header when the caller sends one.

use std::time::Duration;

use http::{Request, Response};
use tower_http::trace::{DefaultOnRequest, GrpcMakeClassifier, MakeSpan, OnResponse, TraceLayer};
use tracing::Span;
use tracing::field::Empty;

pub const TRACE_ID_HEADER: &str = "x-access-trace-id";

pub type GrpcTraceLayer =
    TraceLayer<GrpcMakeClassifier, GrpcRequestSpan, DefaultOnRequest, GrpcResponseLog>;

#[must_use]
pub fn grpc_trace_layer() -> GrpcTraceLayer {
    TraceLayer::new_for_grpc()
        .make_span_with(GrpcRequestSpan)
        .on_response(GrpcResponseLog)
}

/// Caller-supplied trace id, or a fresh UUID v4.
#[must_use]
pub fn trace_id_from_headers(headers: &http::HeaderMap) -> String {
    headers
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_owned)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GrpcRequestSpan;

impl<B> MakeSpan<B> for GrpcRequestSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let trace_id = trace_id_from_headers(request.headers());
        tracing::info_span!(
            "grpc_request",
            method = %request.uri().path(),
            trace_id = %trace_id,
            grpc_status = Empty,
            latency_ms = Empty,
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GrpcResponseLog;

impl<B> OnResponse<B> for GrpcResponseLog {
    fn on_response(self, response: &Response<B>, latency: Duration, span: &Span) {
        // Success replies carry the status in trailers, which are not visible here.
        let status = response
            .headers()
            .get("grpc-status")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("0");
        let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);

        span.record("grpc_status", status);
        span.record("latency_ms", latency_ms);
        tracing::debug!(parent: span, grpc_status = status, latency_ms, "finished processing request");
    }
}
