use tonic::Status;

use crate::domain::error::RegistrationError;

/// Map domain errors to gRPC statuses
#[must_use]
pub fn registration_error_to_status(err: &RegistrationError) -> Status {
    match err {
        RegistrationError::InvalidInput(msg) => Status::invalid_argument(msg.clone()),
        // the backend's own text is what callers need to diagnose the failure
        RegistrationError::Backend { source, .. } => Status::internal(source.to_string()),
        RegistrationError::Closed => Status::unavailable("server is shutting down"),
    }
}

impl From<RegistrationError> for Status {
    fn from(err: RegistrationError) -> Self {
        registration_error_to_status(&err)
    }
}
