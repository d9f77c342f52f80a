//! Cancellable lifetimes for registrations.
//!
//! A [`Lifetime`] is owned by exactly one registration entry and is the only
//! handle able to cancel it. Backends receive a [`LifetimeObserver`], which can
//! wait for cancellation but never trigger it.

use tokio_util::sync::CancellationToken;

/// Owned cancellation handle of a single registration.
///
/// Not `Clone`: whoever owns the registration owns its teardown. Lifetimes are
/// always derived from a parent scope, so cancelling the scope cancels every
/// lifetime derived from it.
#[derive(Debug)]
pub struct Lifetime {
    token: CancellationToken,
}

impl Lifetime {
    /// Derive a new lifetime that ends no later than `scope`.
    #[must_use]
    pub fn derive_from(scope: &CancellationToken) -> Self {
        Self {
            token: scope.child_token(),
        }
    }

    /// End this lifetime. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// A read-only view handed to backends.
    #[must_use]
    pub fn observer(&self) -> LifetimeObserver {
        LifetimeObserver {
            token: self.token.clone(),
        }
    }
}

/// Read-only view of a [`Lifetime`].
#[derive(Debug, Clone)]
pub struct LifetimeObserver {
    token: CancellationToken,
}

impl LifetimeObserver {
    /// Resolves once the observed lifetime has been cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
