use std::time::Duration;

use anyhow::ensure;
use collector_transport_grpc::{GrpcClientConfig, RpcRetryConfig};
use serde::{Deserialize, Serialize};

/// Configuration for the registration module
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistrationConfig {
    /// Name this process announces for itself at startup
    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[serde(default)]
    pub backend: BackendConfig,
}

fn default_service_name() -> String {
    "svc-collector".to_owned()
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            backend: BackendConfig::default(),
        }
    }
}

/// Which discovery backend registrations are announced to
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// In-process table; nothing leaves the process
    #[default]
    Local,
    /// Remote lease-based directory service over gRPC
    Directory(DirectoryBackendConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryBackendConfig {
    pub endpoint: String,
    /// Instance id sent with every lease; generated per backend when unset
    pub instance_id: Option<String>,
    pub ttl_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub rpc_timeout_ms: u64,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub deregister_timeout_ms: u64,
}

impl Default for DirectoryBackendConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:7444".to_owned(),
            instance_id: None,
            ttl_ms: 15_000,
            heartbeat_interval_ms: 5_000,
            connect_timeout_ms: 2_000,
            rpc_timeout_ms: 3_000,
            max_retries: 3,
            base_backoff_ms: 100,
            max_backoff_ms: 2_000,
            deregister_timeout_ms: 2_000,
        }
    }
}

impl DirectoryBackendConfig {
    /// # Errors
    /// Returns an error if the endpoint is empty or the heartbeat cannot keep the lease alive.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.endpoint.is_empty(), "directory endpoint must not be empty");
        ensure!(self.heartbeat_interval_ms > 0, "heartbeat_interval_ms must be positive");
        ensure!(
            self.heartbeat_interval_ms < self.ttl_ms,
            "heartbeat_interval_ms ({}) must be shorter than ttl_ms ({})",
            self.heartbeat_interval_ms,
            self.ttl_ms
        );
        Ok(())
    }

    pub fn grpc_client_config(&self) -> GrpcClientConfig {
        GrpcClientConfig::new("directory")
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_rpc_timeout(Duration::from_millis(self.rpc_timeout_ms))
            .with_max_retries(self.max_retries)
            .with_backoff(
                Duration::from_millis(self.base_backoff_ms),
                Duration::from_millis(self.max_backoff_ms),
            )
    }

    pub fn retry_config(&self) -> RpcRetryConfig {
        RpcRetryConfig::from(&self.grpc_client_config())
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    #[must_use]
    pub fn deregister_timeout(&self) -> Duration {
        Duration::from_millis(self.deregister_timeout_ms)
    }
}
