//! Bounded retries for idempotent unary gRPC calls.
//!
//! Only transient transport failures are retried: [`Code::Unavailable`] and
//! [`Code::DeadlineExceeded`]. Every other status is returned on first sight.
//!
//! Generated tonic clients are cheap to clone (they wrap a `Channel`), so each
//! attempt receives its own clone and the call closure can move it into the
//! returned future.
//!
//! ```ignore
//! let retry = RpcRetryConfig::from(&grpc_cfg);
//! let reply = call_with_retry(
//!     &client,
//!     &retry,
//!     request,
//!     |mut c, r| async move { c.heartbeat(r).await.map(tonic::Response::into_inner) },
//!     "directory.heartbeat",
//! )
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tonic::{Code, Status};
use tracing::Instrument;

use crate::client::GrpcClientConfig;
use crate::duration_to_u64_ms;

/// Retry policy for [`call_with_retry`].
#[derive(Debug, Clone)]
#[must_use]
pub struct RpcRetryConfig {
    /// Retries after the initial call.
    pub max_retries: u32,

    /// Attempt `n` waits `base_backoff * n` before the next try.
    pub base_backoff: Duration,

    /// Cap for a single backoff pause.
    pub max_backoff: Duration,
}

impl Default for RpcRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl From<&GrpcClientConfig> for RpcRetryConfig {
    fn from(cfg: &GrpcClientConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_backoff: cfg.base_backoff,
            max_backoff: cfg.max_backoff,
        }
    }
}

impl RpcRetryConfig {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn with_base_backoff(mut self, duration: Duration) -> Self {
        self.base_backoff = duration;
        self
    }

    pub fn with_max_backoff(mut self, duration: Duration) -> Self {
        self.max_backoff = duration;
        self
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        (self.base_backoff * attempt).min(self.max_backoff)
    }
}

/// Whether a failed call may be attempted again.
#[must_use]
pub fn is_retryable(status: &Status) -> bool {
    matches!(status.code(), Code::Unavailable | Code::DeadlineExceeded)
}

/// Run `call` against a fresh clone of `client`, retrying transient failures.
///
/// The operation must be idempotent; a retried call may reach the server twice.
///
/// # Errors
/// Returns the first non-retryable `Status`, or the last transient one once
/// `max_retries` is exhausted.
pub async fn call_with_retry<C, F, Fut, Req, Res>(
    client: &C,
    cfg: &RpcRetryConfig,
    req: Req,
    call: F,
    op_name: &'static str,
) -> Result<Res, Status>
where
    C: Clone,
    F: Fn(C, Req) -> Fut,
    Fut: Future<Output = Result<Res, Status>>,
    Req: Clone,
{
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let span = tracing::debug_span!("grpc_call", op = op_name, attempt);
        let result = call(client.clone(), req.clone()).instrument(span).await;

        match result {
            Ok(res) => {
                if attempt > 1 {
                    tracing::info!(op = op_name, attempt, "gRPC call succeeded after retries");
                }
                return Ok(res);
            }
            Err(status) => {
                if !is_retryable(&status) || attempt > cfg.max_retries {
                    tracing::warn!(
                        op = op_name,
                        attempt,
                        code = ?status.code(),
                        message = %status.message(),
                        "gRPC call giving up"
                    );
                    return Err(status);
                }

                let backoff = cfg.backoff_for(attempt);
                tracing::debug!(
                    op = op_name,
                    attempt,
                    code = ?status.code(),
                    backoff_ms = duration_to_u64_ms(backoff),
                    "retrying gRPC call after backoff"
                );
                sleep(backoff).await;
            }
        }
    }
}
