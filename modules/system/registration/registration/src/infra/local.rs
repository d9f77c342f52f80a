//! In-process backend: announcements live in a table owned by this process.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use registration_sdk::{BackendError, LifetimeObserver, RegistrationBackend};
use tokio_util::task::TaskTracker;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Announcement {
    address: String,
    id: Uuid,
}

/// Keeps each announcement until its lifetime is cancelled.
///
/// Useful for standalone runs where no discovery service exists, and as the
/// reference implementation of the backend contract.
#[derive(Debug, Default)]
pub struct LocalBackend {
    announcements: Arc<DashMap<String, Announcement>>,
    tracker: TaskTracker,
}

impl LocalBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Address currently announced for `service`, if any.
    #[must_use]
    pub fn announced(&self, service: &str) -> Option<String> {
        self.announcements.get(service).map(|a| a.address.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.announcements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.announcements.is_empty()
    }
}

#[async_trait]
impl RegistrationBackend for LocalBackend {
    async fn register(
        &self,
        lifetime: LifetimeObserver,
        service: &str,
        address: &str,
    ) -> Result<(), BackendError> {
        if lifetime.is_cancelled() {
            return Err(BackendError::Cancelled);
        }

        let id = Uuid::new_v4();
        self.announcements.insert(
            service.to_owned(),
            Announcement {
                address: address.to_owned(),
                id,
            },
        );
        tracing::debug!(service, address, %id, "local announcement added");

        let announcements = Arc::clone(&self.announcements);
        let service = service.to_owned();
        self.tracker.spawn(async move {
            lifetime.cancelled().await;
            // a newer announcement for the same service may already be in place
            if announcements.remove_if(&service, |_, a| a.id == id).is_some() {
                tracing::debug!(service = %service, %id, "local announcement removed");
            }
        });

        Ok(())
    }

    async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
