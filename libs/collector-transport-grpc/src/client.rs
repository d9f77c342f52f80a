//! gRPC client transport configuration and connection utilities.
//!
//! Only transport concerns live here (timeouts, keepalive, connection retries).
//! Retrying individual RPCs is the job of [`crate::rpc_retry`].

use std::time::Duration;

use anyhow::Context;
use tonic::transport::{Channel, Endpoint};
use tracing::Instrument;

use crate::duration_to_u64_ms;

/// Transport settings for a single remote service.
#[derive(Debug, Clone)]
#[must_use]
pub struct GrpcClientConfig {
    /// Timeout for establishing the connection.
    pub connect_timeout: Duration,

    /// Per-RPC timeout applied by the channel.
    pub rpc_timeout: Duration,

    /// Connection attempts after the first one made by [`connect_with_retry`].
    pub max_retries: u32,

    /// Backoff unit; attempt `n` waits `base_backoff * n`.
    pub base_backoff: Duration,

    /// Upper bound for a single backoff pause.
    pub max_backoff: Duration,

    /// Name used in spans and log lines.
    pub service_name: &'static str,
}

impl Default for GrpcClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            rpc_timeout: Duration::from_secs(30),
            max_retries: 3,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            service_name: "grpc_client",
        }
    }
}

impl GrpcClientConfig {
    pub fn new(service_name: &'static str) -> Self {
        Self {
            service_name,
            ..Default::default()
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = max;
        self
    }
}

/// Build a tonic `Endpoint` with the configured timeouts and HTTP/2 keepalive.
fn build_endpoint(uri: String, cfg: &GrpcClientConfig) -> Result<Endpoint, tonic::transport::Error> {
    let endpoint = Endpoint::from_shared(uri)?
        .connect_timeout(cfg.connect_timeout)
        .timeout(cfg.rpc_timeout)
        .tcp_keepalive(Some(Duration::from_secs(30)))
        .http2_keep_alive_interval(Duration::from_secs(30))
        .keep_alive_timeout(Duration::from_secs(10))
        .keep_alive_while_idle(true);

    Ok(endpoint)
}

/// Connect once to `uri` and wrap the channel in a generated client.
///
/// # Errors
/// Returns an error if the URI is malformed or the connection cannot be established.
pub async fn connect_with_stack<TClient>(
    uri: impl Into<String>,
    cfg: &GrpcClientConfig,
) -> anyhow::Result<TClient>
where
    TClient: From<Channel>,
{
    let uri = uri.into();
    let span = tracing::debug_span!("grpc_connect", service = cfg.service_name, uri = %uri);

    async move {
        let endpoint = build_endpoint(uri, cfg)?;
        let channel = endpoint.connect().await?;

        tracing::info!(
            service = cfg.service_name,
            connect_timeout_ms = duration_to_u64_ms(cfg.connect_timeout),
            rpc_timeout_ms = duration_to_u64_ms(cfg.rpc_timeout),
            "gRPC client connected"
        );

        Ok(TClient::from(channel))
    }
    .instrument(span)
    .await
}

/// Connect to `uri`, retrying failed attempts with capped backoff.
///
/// # Errors
/// Returns the last connection error once `max_retries` is exhausted.
pub async fn connect_with_retry<TClient>(
    uri: impl Into<String>,
    cfg: &GrpcClientConfig,
) -> anyhow::Result<TClient>
where
    TClient: From<Channel>,
{
    let uri = uri.into();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        match connect_with_stack::<TClient>(uri.as_str(), cfg).await {
            Ok(client) => {
                if attempt > 1 {
                    tracing::info!(service = cfg.service_name, attempt, "gRPC connection established after retries");
                }
                return Ok(client);
            }
            Err(e) if attempt <= cfg.max_retries => {
                let backoff = (cfg.base_backoff * attempt).min(cfg.max_backoff);
                tracing::warn!(
                    service = cfg.service_name,
                    attempt,
                    max_retries = cfg.max_retries,
                    error = %e,
                    backoff_ms = duration_to_u64_ms(backoff),
                    "gRPC connection failed, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to connect to {} at '{uri}' after {attempt} attempts", cfg.service_name)
                });
            }
        }
    }
}
