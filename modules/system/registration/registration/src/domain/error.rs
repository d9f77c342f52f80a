use registration_sdk::BackendError;

/// Domain-level errors for the registration manager
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Backend failed to register '{service}': {source}")]
    Backend {
        service: String,
        #[source]
        source: BackendError,
    },

    /// The run scope has been cancelled; no new registrations are accepted.
    #[error("Registration manager is closed")]
    Closed,
}

impl RegistrationError {
    pub(crate) fn backend(service: &str, source: BackendError) -> Self {
        Self::Backend {
            service: service.to_owned(),
            source,
        }
    }
}
