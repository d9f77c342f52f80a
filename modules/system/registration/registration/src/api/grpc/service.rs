//! gRPC adapter for the `Register` service.
//!
//! Mutating calls carry a `verify` token that must equal the address this
//! process advertises; new registrations are always made under that address.

use std::sync::Arc;
use std::time::Instant;

use tonic::{Request, Response, Status};

use crate::domain::index::Registration;
use crate::domain::manager::RegistrationManager;
use crate::proto::register::v1::register_server::{Register, RegisterServer};
use crate::proto::register::v1::{
    GetRegisterReply, GetRegisterRequest, RegisterInfo, RegisterReply, RegisterRequest,
    UnregisterReply, UnregisterRequest,
};

use super::metrics::RegistrationMetrics;

pub struct RegisterService {
    manager: Arc<RegistrationManager>,
    advertised: String,
    metrics: Option<RegistrationMetrics>,
}

impl RegisterService {
    #[must_use]
    pub fn new(manager: Arc<RegistrationManager>, advertised: impl Into<String>) -> Self {
        Self {
            manager,
            advertised: advertised.into(),
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: RegistrationMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn into_server(self) -> RegisterServer<Self> {
        RegisterServer::new(self)
    }

    fn check_verify(&self, verify: &str) -> Result<(), Status> {
        if verify == self.advertised {
            Ok(())
        } else {
            Err(Status::invalid_argument("verify does not match this server's address"))
        }
    }

    async fn record<T>(&self, rpc: &str, result: &Result<T, Status>, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.observe(rpc, result, started.elapsed());
            metrics.set_active(self.manager.len().await);
        }
    }

    async fn handle_register(&self, req: RegisterRequest) -> Result<RegisterReply, Status> {
        self.check_verify(&req.verify)?;
        self.manager.register(&req.service, &self.advertised).await?;

        Ok(RegisterReply {
            info: Some(RegisterInfo {
                service: req.service,
                address: self.advertised.clone(),
            }),
        })
    }

    async fn handle_unregister(&self, req: UnregisterRequest) -> Result<UnregisterReply, Status> {
        self.check_verify(&req.verify)?;
        let infos = self.manager.unregister(&req.service, to_register_info).await;
        Ok(UnregisterReply { infos })
    }
}

fn to_register_info(registration: &Registration) -> RegisterInfo {
    RegisterInfo {
        service: registration.service().to_owned(),
        address: registration.address().to_owned(),
    }
}

#[tonic::async_trait]
impl Register for RegisterService {
    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<RegisterReply>, Status> {
        let started = Instant::now();
        let req = request.into_inner();
        tracing::debug!(service = %req.service, "Register");

        let result = self.handle_register(req).await;
        self.record("register", &result, started).await;
        result.map(Response::new)
    }

    async fn unregister(
        &self,
        request: Request<UnregisterRequest>,
    ) -> Result<Response<UnregisterReply>, Status> {
        let started = Instant::now();
        let req = request.into_inner();
        tracing::debug!(service = %req.service, "Unregister");

        let result = self.handle_unregister(req).await;
        self.record("unregister", &result, started).await;
        result.map(Response::new)
    }

    async fn get_register(
        &self,
        request: Request<GetRegisterRequest>,
    ) -> Result<Response<GetRegisterReply>, Status> {
        let started = Instant::now();
        let req = request.into_inner();
        tracing::debug!(service = %req.service, address = %req.address, "GetRegister");

        let infos = self
            .manager
            .query(&req.service, &req.address, to_register_info)
            .await;
        let result = Ok(GetRegisterReply { infos });
        self.record("get_register", &result, started).await;
        result.map(Response::new)
    }
}
