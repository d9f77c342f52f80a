//! Backend trait for registration implementations.

use async_trait::async_trait;

use crate::error::BackendError;
use crate::lifetime::LifetimeObserver;

/// A distributed discovery backend that announces `service` at `address`.
///
/// The registration manager calls [`register`](Self::register) once per
/// accepted registration, while holding its lock. Implementations perform the
/// initial announcement before returning and then keep it alive in the
/// background until `lifetime` is cancelled.
///
/// # Cancellation
///
/// Cancellation of `lifetime` is the only teardown signal. The manager does not
/// wait for the backend to converge; backends that need to deliver a final
/// deregistration should track that work and finish it in [`drain`](Self::drain).
#[async_trait]
pub trait RegistrationBackend: Send + Sync {
    /// Announce `service` at `address` and keep the announcement alive until
    /// `lifetime` is cancelled.
    ///
    /// # Errors
    ///
    /// - `Unavailable` if the backend cannot be reached
    /// - `Rejected` if the backend refused the announcement
    /// - `Cancelled` if `lifetime` was cancelled before the announcement completed
    async fn register(
        &self,
        lifetime: LifetimeObserver,
        service: &str,
        address: &str,
    ) -> Result<(), BackendError>;

    /// Wait for background work started by earlier registrations to finish.
    ///
    /// Called during shutdown after every lifetime has been cancelled. The
    /// default implementation has nothing to wait for.
    async fn drain(&self) {}
}
