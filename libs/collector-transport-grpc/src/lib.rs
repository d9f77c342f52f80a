#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
//! gRPC client plumbing shared by components that talk to remote services.
//!
//! - [`client`]: endpoint construction with timeouts and keepalive, plus connect helpers.
//! - [`rpc_retry`]: bounded retries with capped linear backoff for idempotent unary calls.

pub mod client;
pub mod rpc_retry;

pub use client::{GrpcClientConfig, connect_with_retry, connect_with_stack};
pub use rpc_retry::{RpcRetryConfig, call_with_retry, is_retryable};

use std::time::Duration;

pub(crate) fn duration_to_u64_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
