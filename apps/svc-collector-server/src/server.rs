//! Server assembly: backend, manager, gRPC listener, metrics endpoint and the
//! shutdown sequence.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use registration::proto::register::v1::register_server::RegisterServer;
use registration::{RegisterService, RegistrationManager, RegistrationMetrics, build_backend};
use registration_sdk::RegistrationBackend;
use tokio::net::TcpListener;
use tokio::task::{JoinError, JoinHandle};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::config::AppConfig;
use crate::metrics_server::serve_metrics;
use crate::recovery::grpc_recovery_layer;
use crate::signals::wait_for_shutdown;
use crate::trace::grpc_trace_layer;

/// Run until a shutdown signal arrives or the gRPC server stops.
///
/// # Errors
/// Returns an error if the backend cannot be built, a listener cannot be
/// bound, or self-registration fails.
pub async fn run_server(config: AppConfig) -> Result<()> {
    let root = CancellationToken::new();

    let backend = build_backend(&config.registration.backend)
        .await
        .context("failed to initialize registration backend")?;
    let manager = Arc::new(RegistrationManager::new(
        backend.clone(),
        root.child_token(),
    ));

    let bind = (config.server.bind_host(), config.server.port);
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind gRPC listener on {}:{}", bind.0, bind.1))?;
    let local_addr = listener.local_addr()?;
    let advertised = config.server.advertised_address(local_addr)?;
    tracing::info!(%local_addr, %advertised, "gRPC server listening");

    let metrics = RegistrationMetrics::new().context("failed to create metrics registry")?;
    let service = RegisterService::new(manager.clone(), advertised.clone())
        .with_metrics(metrics.clone())
        .into_server();

    let mut grpc_task = spawn_grpc(listener, service, metrics.clone(), root.child_token());
    let metrics_task = if config.metrics.enabled {
        Some(spawn_metrics(&config.metrics.listen_addr, metrics, root.child_token()).await?)
    } else {
        None
    };

    let service_name = &config.registration.service_name;
    if let Err(e) = manager.register(service_name, &advertised).await {
        tracing::error!(service = %service_name, error = %e, "self-registration failed");
        root.cancel();
        return Err(e).context("self-registration failed");
    }

    tokio::select! {
        signal = wait_for_shutdown() => {
            if let Err(e) = signal {
                tracing::error!(error = %e, "signal handling failed, shutting down");
            }
        }
        result = &mut grpc_task => {
            log_task_exit("gRPC server", &result);
        }
    }

    shutdown(&config, &manager, backend.as_ref()).await;
    root.cancel();

    if !grpc_task.is_finished() {
        log_task_exit("gRPC server", &grpc_task.await);
    }
    if let Some(task) = metrics_task {
        log_task_exit("metrics endpoint", &task.await);
    }

    tracing::info!("svc-collector stopped");
    Ok(())
}

/// Close the manager, withdraw every registration, then give the backend a
/// bounded window to deliver the deregistrations.
async fn shutdown(
    config: &AppConfig,
    manager: &RegistrationManager,
    backend: &dyn RegistrationBackend,
) {
    // requests still in flight must not register behind the withdrawal
    manager.close();
    let removed = manager
        .unregister_all(|r| r.service().to_owned())
        .await;
    tracing::info!(count = removed.len(), services = ?removed, "registrations withdrawn");

    let window = config.server.shutdown_timeout();
    if tokio::time::timeout(window, backend.drain()).await.is_err() {
        tracing::warn!(
            timeout_ms = config.server.shutdown_timeout_ms,
            "backend did not drain in time"
        );
    }
}

fn spawn_grpc(
    listener: TcpListener,
    service: RegisterServer<RegisterService>,
    metrics: RegistrationMetrics,
    cancel: CancellationToken,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        Server::builder()
            .layer(grpc_trace_layer())
            .layer(grpc_recovery_layer(metrics))
            .add_service(service)
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(listener),
                cancel.cancelled_owned(),
            )
            .await
            .context("gRPC server failed")
    })
}

async fn spawn_metrics(
    listen_addr: &str,
    metrics: RegistrationMetrics,
    cancel: CancellationToken,
) -> Result<JoinHandle<Result<()>>> {
    let addr: SocketAddr = listen_addr
        .parse()
        .with_context(|| format!("invalid metrics.listen_addr '{listen_addr}'"))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics endpoint on {addr}"))?;
    Ok(tokio::spawn(serve_metrics(listener, metrics, cancel)))
}

fn log_task_exit(name: &str, result: &Result<Result<()>, JoinError>) {
    match result {
        Ok(Ok(())) => tracing::debug!(task = name, "task stopped"),
        Ok(Err(e)) => tracing::error!(task = name, error = %format!("{e:#}"), "task failed"),
        Err(e) => tracing::error!(task = name, error = %e, "task panicked"),
    }
}
