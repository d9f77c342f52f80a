//! `/metrics` endpoint in the Prometheus text format.

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use registration::RegistrationMetrics;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

#[must_use]
pub fn router(metrics: RegistrationMetrics) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
}

async fn render_metrics(State(metrics): State<RegistrationMetrics>) -> Response {
    match metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Serve `/metrics` on `listener` until `cancel` fires.
///
/// # Errors
/// Returns an error if the HTTP server fails.
pub async fn serve_metrics(
    listener: TcpListener,
    metrics: RegistrationMetrics,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Metrics endpoint listening");
    }
    axum::serve(listener, router(metrics))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    Ok(())
}
