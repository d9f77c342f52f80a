//! Lease-based backend talking to a remote `DirectoryService` over gRPC.
//!
//! Each accepted registration becomes a lease `(service_name, lease_id)`, where
//! the lease id is the backend's instance id plus a per-registration suffix.
//! A tracked keep-alive task renews it every heartbeat interval, re-registers
//! when the directory reports the lease as gone, and sends a best-effort
//! deregistration once the lifetime is cancelled.

use std::time::Duration;

use async_trait::async_trait;
use collector_transport_grpc::{RpcRetryConfig, call_with_retry, connect_with_retry};
use registration_sdk::{BackendError, LifetimeObserver, RegistrationBackend};
use tokio::time::MissedTickBehavior;
use tokio_util::task::TaskTracker;
use tonic::transport::Channel;
use tonic::{Code, Status};

use crate::config::DirectoryBackendConfig;
use crate::proto::directory::v1::directory_service_client::DirectoryServiceClient;
use crate::proto::directory::v1::{
    DeregisterInstanceRequest, HeartbeatRequest, RegisterInstanceRequest,
};

type Client = DirectoryServiceClient<Channel>;

impl From<Channel> for Client {
    fn from(channel: Channel) -> Self {
        Self::new(channel)
    }
}

#[derive(Debug, Clone)]
struct Lease {
    service_name: String,
    address: String,
    lease_id: String,
    ttl_ms: u64,
}

impl Lease {
    fn register_request(&self) -> RegisterInstanceRequest {
        RegisterInstanceRequest {
            service_name: self.service_name.clone(),
            address: self.address.clone(),
            instance_id: self.lease_id.clone(),
            ttl_ms: self.ttl_ms,
        }
    }

    fn heartbeat_request(&self) -> HeartbeatRequest {
        HeartbeatRequest {
            service_name: self.service_name.clone(),
            instance_id: self.lease_id.clone(),
        }
    }

    fn deregister_request(&self) -> DeregisterInstanceRequest {
        DeregisterInstanceRequest {
            service_name: self.service_name.clone(),
            instance_id: self.lease_id.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct KeepAlive {
    retry: RpcRetryConfig,
    interval: Duration,
    deregister_timeout: Duration,
}

pub struct DirectoryBackend {
    client: Client,
    instance_id: String,
    ttl_ms: u64,
    keep_alive: KeepAlive,
    tracker: TaskTracker,
}

impl DirectoryBackend {
    /// Connect to the configured directory, retrying the initial connection.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the directory cannot be reached.
    pub async fn connect(cfg: DirectoryBackendConfig) -> anyhow::Result<Self> {
        cfg.validate()?;
        let client: Client = connect_with_retry(cfg.endpoint.as_str(), &cfg.grpc_client_config()).await?;
        tracing::info!(endpoint = %cfg.endpoint, "connected to directory");
        Ok(Self::with_client(client, cfg))
    }

    /// Build over an existing client.
    #[must_use]
    pub fn with_client(client: Client, cfg: DirectoryBackendConfig) -> Self {
        let keep_alive = KeepAlive {
            retry: cfg.retry_config(),
            interval: cfg.heartbeat_interval(),
            deregister_timeout: cfg.deregister_timeout(),
        };
        let instance_id = cfg
            .instance_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Self {
            client,
            instance_id,
            ttl_ms: cfg.ttl_ms,
            keep_alive,
            tracker: TaskTracker::new(),
        }
    }

    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

#[async_trait]
impl RegistrationBackend for DirectoryBackend {
    async fn register(
        &self,
        lifetime: LifetimeObserver,
        service: &str,
        address: &str,
    ) -> Result<(), BackendError> {
        let lease = Lease {
            service_name: service.to_owned(),
            address: address.to_owned(),
            // a stale deregistration of an earlier lease must not hit this one
            lease_id: format!("{}-{}", self.instance_id, uuid::Uuid::new_v4()),
            ttl_ms: self.ttl_ms,
        };

        tokio::select! {
            biased;
            () = lifetime.cancelled() => return Err(BackendError::Cancelled),
            res = register_instance(&self.client, &self.keep_alive.retry, &lease) => {
                res.map_err(|status| status_to_backend_error(&status))?;
            }
        }

        tracing::info!(
            service,
            address,
            lease_id = %lease.lease_id,
            ttl_ms = self.ttl_ms,
            "lease acquired"
        );

        self.tracker.spawn(keep_alive(
            self.client.clone(),
            self.keep_alive.clone(),
            lease,
            lifetime,
        ));

        Ok(())
    }

    async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

async fn register_instance(client: &Client, retry: &RpcRetryConfig, lease: &Lease) -> Result<(), Status> {
    call_with_retry(
        client,
        retry,
        lease.register_request(),
        |mut c, req| async move { c.register_instance(req).await.map(|_| ()) },
        "directory.register_instance",
    )
    .await
}

async fn heartbeat(client: &Client, retry: &RpcRetryConfig, lease: &Lease) -> Result<(), Status> {
    call_with_retry(
        client,
        retry,
        lease.heartbeat_request(),
        |mut c, req| async move { c.heartbeat(req).await.map(|_| ()) },
        "directory.heartbeat",
    )
    .await
}

async fn keep_alive(mut client: Client, cfg: KeepAlive, lease: Lease, lifetime: LifetimeObserver) {
    let mut ticker = tokio::time::interval(cfg.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately and the lease is fresh
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = lifetime.cancelled() => break,
            _ = ticker.tick() => match heartbeat(&client, &cfg.retry, &lease).await {
                Ok(()) => tracing::trace!(service = %lease.service_name, "lease renewed"),
                Err(status) if status.code() == Code::NotFound => {
                    tracing::warn!(service = %lease.service_name, "lease lost, registering again");
                    if let Err(status) = register_instance(&client, &cfg.retry, &lease).await {
                        tracing::warn!(
                            service = %lease.service_name,
                            code = ?status.code(),
                            message = %status.message(),
                            "re-registration failed"
                        );
                    }
                }
                Err(status) => tracing::warn!(
                    service = %lease.service_name,
                    code = ?status.code(),
                    message = %status.message(),
                    "heartbeat failed"
                ),
            },
        }
    }

    let deregister = client.deregister_instance(lease.deregister_request());
    match tokio::time::timeout(cfg.deregister_timeout, deregister).await {
        Ok(Ok(_)) => tracing::info!(service = %lease.service_name, "lease released"),
        Ok(Err(status)) => tracing::warn!(
            service = %lease.service_name,
            code = ?status.code(),
            message = %status.message(),
            "deregistration failed"
        ),
        Err(_) => tracing::warn!(service = %lease.service_name, "deregistration timed out"),
    }
}

fn status_to_backend_error(status: &Status) -> BackendError {
    let message = status.message().to_owned();
    match status.code() {
        Code::Unavailable | Code::DeadlineExceeded => BackendError::Unavailable(message),
        Code::InvalidArgument
        | Code::AlreadyExists
        | Code::FailedPrecondition
        | Code::PermissionDenied
        | Code::ResourceExhausted => BackendError::Rejected(message),
        Code::Cancelled => BackendError::Cancelled,
        code => {
            let code = code.description();
            BackendError::Internal(format!("{code}: {message}"))
        }
    }
}
