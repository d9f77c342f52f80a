//! Domain models for the registration module.

use serde::{Deserialize, Serialize};

/// One locally-active registration as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationInfo {
    /// Logical service name.
    pub service: String,
    /// Address the service is announced under.
    pub address: String,
}

impl RegistrationInfo {
    #[must_use]
    pub fn new(service: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            address: address.into(),
        }
    }
}
