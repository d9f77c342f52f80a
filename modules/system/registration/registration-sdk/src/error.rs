//! Error types reported by registration backends.

use thiserror::Error;

/// Errors that a [`RegistrationBackend`](crate::RegistrationBackend) can return.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend could not be reached.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend refused the announcement.
    #[error("registration rejected: {0}")]
    Rejected(String),

    /// The lifetime was cancelled before the announcement completed.
    #[error("registration cancelled")]
    Cancelled,

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Internal(String),
}

impl BackendError {
    /// Whether retrying the same announcement later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
