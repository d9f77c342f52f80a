//! Registration SDK
//!
//! Contract shared by the registration module and the backends it announces to:
//!
//! - [`RegistrationBackend`] - trait implemented by discovery backends
//! - [`Lifetime`], [`LifetimeObserver`] - cancellable handle owned by a registration
//! - [`RegistrationInfo`] - wire-neutral view of one registration
//! - [`BackendError`] - errors a backend may report
//!
//! ## Usage
//!
//! ```ignore
//! use registration_sdk::{Lifetime, RegistrationBackend};
//!
//! let lifetime = Lifetime::derive_from(&scope);
//! backend.register(lifetime.observer(), "orders", "10.0.0.5:9000").await?;
//!
//! // later, when the registration is removed
//! lifetime.cancel();
//! ```
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod api;
pub mod error;
pub mod lifetime;
pub mod models;

pub use api::RegistrationBackend;
pub use error::BackendError;
pub use lifetime::{Lifetime, LifetimeObserver};
pub use models::RegistrationInfo;
