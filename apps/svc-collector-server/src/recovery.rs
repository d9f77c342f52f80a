//! Panic recovery for the gRPC server.
//!
//! A handler that panics is answered with `INTERNAL` instead of dropping the
//! connection, and the panic is logged and counted.

use std::any::Any;

use axum::body::Body;
use http::Response;
use registration::RegistrationMetrics;
use tonic::Status;
use tower_http::catch_panic::{CatchPanicLayer, ResponseForPanic};

pub type GrpcRecoveryLayer = CatchPanicLayer<GrpcPanicResponse>;

#[must_use]
pub fn grpc_recovery_layer(metrics: RegistrationMetrics) -> GrpcRecoveryLayer {
    CatchPanicLayer::custom(GrpcPanicResponse { metrics })
}

#[derive(Clone)]
pub struct GrpcPanicResponse {
    metrics: RegistrationMetrics,
}

impl ResponseForPanic for GrpcPanicResponse {
    type ResponseBody = Body;

    fn response_for_panic(&mut self, err: Box<dyn Any + Send + 'static>) -> Response<Body> {
        self.metrics.record_panic();
        tracing::error!(panic = %panic_message(&*err), "gRPC handler panicked");
        Status::internal("internal error").into_http()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
