//! Registration Module
//!
//! Tracks which logical services this process has announced to a discovery
//! backend, under which address, and with what cancellable lifetime.
//!
//! - [`RegistrationManager`] - single owner of all local registrations
//! - [`RegisterService`] - gRPC adapter (`svc_collector.register.v1.Register`)
//! - [`LocalBackend`], [`DirectoryBackend`] - backends selected by [`BackendConfig`]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

/// Generated protobuf types
pub mod proto {
    pub mod register {
        pub mod v1 {
            #![allow(clippy::all, clippy::pedantic)]
            tonic::include_proto!("svc_collector.register.v1");
        }
    }
    pub mod directory {
        pub mod v1 {
            #![allow(clippy::all, clippy::pedantic)]
            tonic::include_proto!("svc_collector.directory.v1");
        }
    }
}

pub mod api;
pub mod config;
pub mod domain;
pub mod infra;

pub use api::grpc::{RegisterService, RegistrationMetrics};
pub use config::{BackendConfig, DirectoryBackendConfig, RegistrationConfig};
pub use domain::{Registration, RegistrationError, RegistrationIndex, RegistrationManager};
pub use infra::{DirectoryBackend, LocalBackend, build_backend};
