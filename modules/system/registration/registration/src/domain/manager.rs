use std::sync::Arc;

use registration_sdk::{Lifetime, RegistrationBackend};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::domain::error::RegistrationError;
use crate::domain::index::{Registration, RegistrationIndex};

/// Owns every registration this process has announced.
///
/// All operations take one coarse lock for their full duration, including the
/// backend call made by [`register`](Self::register), so operations on the same
/// service are linearizable. Every lifetime is a child of the run scope handed
/// to [`new`](Self::new); cancelling that scope ends them all.
pub struct RegistrationManager {
    backend: Arc<dyn RegistrationBackend>,
    scope: CancellationToken,
    index: Mutex<RegistrationIndex>,
}

impl RegistrationManager {
    #[must_use]
    pub fn new(backend: Arc<dyn RegistrationBackend>, scope: CancellationToken) -> Self {
        Self {
            backend,
            scope,
            index: Mutex::new(RegistrationIndex::new()),
        }
    }

    /// Announce `service` at `address`.
    ///
    /// A service that is already registered is left as it is and the call
    /// succeeds without reaching the backend. If the backend fails, or the
    /// returned future is dropped before the backend answers, the new entry is
    /// rolled back and its lifetime cancelled.
    ///
    /// # Errors
    /// - `InvalidInput` if `service` is empty
    /// - `Closed` if the run scope has been cancelled
    /// - `Backend` if the backend rejected the announcement
    pub async fn register(&self, service: &str, address: &str) -> Result<(), RegistrationError> {
        if service.is_empty() {
            return Err(RegistrationError::InvalidInput(
                "service must not be empty".to_owned(),
            ));
        }

        let mut index = self.index.lock().await;

        if let Some(existing) = index.get(service) {
            if existing.address() == address {
                tracing::debug!(service, address, "service already registered");
            } else {
                tracing::warn!(
                    service,
                    requested = address,
                    registered = existing.address(),
                    "service already registered under another address; keeping the existing one"
                );
            }
            return Ok(());
        }

        if self.scope.is_cancelled() {
            return Err(RegistrationError::Closed);
        }

        let lifetime = Lifetime::derive_from(&self.scope);
        let observer = lifetime.observer();
        index.insert(service, address, lifetime);

        let pending = PendingInsert::new(&mut index, service);

        match self.backend.register(observer, service, address).await {
            Ok(()) => {
                pending.commit();
                tracing::info!(service, address, "service registered");
                Ok(())
            }
            Err(e) => {
                drop(pending);
                tracing::warn!(
                    service,
                    address,
                    error = %e,
                    transient = e.is_transient(),
                    "backend registration failed"
                );
                Err(RegistrationError::backend(service, e))
            }
        }
    }

    /// Remove `service` and cancel its lifetime. An empty name removes everything.
    ///
    /// Returns the projection of each removed registration; unknown services
    /// yield an empty result.
    pub async fn unregister<T, F>(&self, service: &str, project: F) -> Vec<T>
    where
        F: Fn(&Registration) -> T,
    {
        if service.is_empty() {
            return self.unregister_all(project).await;
        }

        let mut index = self.index.lock().await;
        let Some(removed) = index.remove_by_service(service) else {
            tracing::debug!(service, "unregister of unknown service");
            return Vec::new();
        };

        removed.lifetime().cancel();
        tracing::info!(service, address = removed.address(), "service unregistered");
        vec![project(&removed)]
    }

    /// Remove every registration, cancelling each lifetime.
    pub async fn unregister_all<T, F>(&self, project: F) -> Vec<T>
    where
        F: Fn(&Registration) -> T,
    {
        let mut index = self.index.lock().await;
        let removed = index.remove_all();

        for registration in &removed {
            registration.lifetime().cancel();
        }

        if !removed.is_empty() {
            tracing::info!(count = removed.len(), "all services unregistered");
        }

        removed.iter().map(project).collect()
    }

    /// Look up registrations by service and/or address.
    ///
    /// Both empty lists everything. Otherwise the result is the match for
    /// `service` followed by the matches for `address`, so an entry matching
    /// both appears twice.
    pub async fn query<T, F>(&self, service: &str, address: &str, project: F) -> Vec<T>
    where
        F: Fn(&Registration) -> T,
    {
        let index = self.index.lock().await;

        if service.is_empty() && address.is_empty() {
            return index.snapshot_all().into_iter().map(project).collect();
        }

        let mut out = Vec::new();
        if !service.is_empty() {
            out.extend(index.snapshot_by_service(service).into_iter().map(&project));
        }
        if !address.is_empty() {
            out.extend(index.snapshot_by_address(address).into_iter().map(&project));
        }
        out
    }

    /// Number of active registrations.
    pub async fn len(&self) -> usize {
        self.index.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.index.lock().await.is_empty()
    }

    /// Whether the run scope has been cancelled.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.scope.is_cancelled()
    }

    /// Cancel the run scope: every lifetime ends and later `register` calls
    /// fail with `Closed`. Entries stay in the index until unregistered.
    pub fn close(&self) {
        if !self.is_closed() {
            self.scope.cancel();
            tracing::info!("registration manager closed");
        }
    }
}

/// Rolls back an inserted registration unless committed.
///
/// Dropping the `register` future while the backend call is in flight drops
/// this guard too, before the index lock is released.
struct PendingInsert<'a> {
    index: &'a mut RegistrationIndex,
    service: &'a str,
    armed: bool,
}

impl<'a> PendingInsert<'a> {
    fn new(index: &'a mut RegistrationIndex, service: &'a str) -> Self {
        Self {
            index,
            service,
            armed: true,
        }
    }

    fn commit(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingInsert<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(registration) = self.index.remove_by_service(self.service) {
            registration.lifetime().cancel();
            tracing::debug!(service = self.service, "rolled back pending registration");
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use registration_sdk::{BackendError, LifetimeObserver, RegistrationInfo};

    use super::*;

    #[derive(Default)]
    struct FakeBackend {
        calls: AtomicUsize,
        fail_with: StdMutex<Option<BackendError>>,
        hang: AtomicBool,
        panic_on_register: AtomicBool,
        delay: StdMutex<Option<Duration>>,
        observers: StdMutex<Vec<(String, LifetimeObserver)>>,
    }

    impl FakeBackend {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn fail_with(&self, err: BackendError) {
            *self.fail_with.lock().unwrap() = Some(err);
        }

        fn observer(&self, service: &str) -> LifetimeObserver {
            self.observers
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|(s, _)| s == service)
                .map(|(_, o)| o.clone())
                .expect("backend saw no registration for service")
        }
    }

    #[async_trait]
    impl RegistrationBackend for FakeBackend {
        async fn register(
            &self,
            lifetime: LifetimeObserver,
            service: &str,
            _address: &str,
        ) -> Result<(), BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.observers
                .lock()
                .unwrap()
                .push((service.to_owned(), lifetime));

            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            assert!(
                !self.panic_on_register.load(Ordering::SeqCst),
                "backend exploded"
            );

            let failure = self.fail_with.lock().unwrap().clone();
            failure.map_or(Ok(()), Err)
        }
    }

    fn setup() -> (Arc<FakeBackend>, RegistrationManager, CancellationToken) {
        let backend = Arc::new(FakeBackend::default());
        let scope = CancellationToken::new();
        let manager = RegistrationManager::new(backend.clone(), scope.clone());
        (backend, manager, scope)
    }

    fn info(r: &Registration) -> RegistrationInfo {
        r.info()
    }

    #[tokio::test]
    async fn empty_service_is_rejected_without_backend_call() {
        let (backend, manager, _scope) = setup();

        let err = manager.register("", "a:1").await.unwrap_err();

        assert!(matches!(err, RegistrationError::InvalidInput(_)));
        assert_eq!(backend.calls(), 0);
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn register_then_query_by_service() {
        let (backend, manager, _scope) = setup();

        manager.register("orders", "a:1").await.unwrap();

        assert_eq!(backend.calls(), 1);
        assert_eq!(
            manager.query("orders", "", info).await,
            vec![RegistrationInfo::new("orders", "a:1")]
        );
        assert!(!backend.observer("orders").is_cancelled());
        assert!(manager.index.lock().await.is_consistent());
    }

    #[tokio::test]
    async fn duplicate_register_is_a_silent_no_op() {
        let (backend, manager, _scope) = setup();

        manager.register("orders", "a:1").await.unwrap();
        manager.register("orders", "a:1").await.unwrap();
        manager.register("orders", "b:2").await.unwrap();

        assert_eq!(backend.calls(), 1);
        assert_eq!(
            manager.query("", "", info).await,
            vec![RegistrationInfo::new("orders", "a:1")]
        );
        assert!(manager.query("", "b:2", info).await.is_empty());
    }

    #[tokio::test]
    async fn backend_failure_rolls_back() {
        let (backend, manager, _scope) = setup();
        manager.register("billing", "a:1").await.unwrap();
        backend.fail_with(BackendError::Unavailable("etcd down".to_owned()));

        let err = manager.register("orders", "a:1").await.unwrap_err();

        match err {
            RegistrationError::Backend { service, source } => {
                assert_eq!(service, "orders");
                assert_eq!(source, BackendError::Unavailable("etcd down".to_owned()));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(backend.observer("orders").is_cancelled());
        assert!(manager.query("orders", "", info).await.is_empty());
        assert_eq!(
            manager.query("", "a:1", info).await,
            vec![RegistrationInfo::new("billing", "a:1")]
        );
        assert!(manager.index.lock().await.is_consistent());
    }

    #[tokio::test]
    async fn failed_service_can_be_registered_again() {
        let (backend, manager, _scope) = setup();
        backend.fail_with(BackendError::Rejected("quota".to_owned()));
        assert!(manager.register("orders", "a:1").await.is_err());

        *backend.fail_with.lock().unwrap() = None;
        manager.register("orders", "a:1").await.unwrap();

        assert_eq!(backend.calls(), 2);
        assert_eq!(manager.len().await, 1);
    }

    #[tokio::test]
    async fn unregister_cancels_and_projects() {
        let (backend, manager, _scope) = setup();
        manager.register("orders", "a:1").await.unwrap();

        let removed = manager
            .unregister("orders", |r| (r.info(), r.is_active()))
            .await;

        assert_eq!(removed, vec![(RegistrationInfo::new("orders", "a:1"), false)]);
        assert!(backend.observer("orders").is_cancelled());
        assert!(manager.unregister("orders", info).await.is_empty());
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn unregister_unknown_service_is_empty() {
        let (_backend, manager, _scope) = setup();
        manager.register("orders", "a:1").await.unwrap();

        assert!(manager.unregister("ghost", info).await.is_empty());
        assert_eq!(manager.len().await, 1);
    }

    #[tokio::test]
    async fn empty_name_wipes_everything() {
        let (backend, manager, _scope) = setup();
        manager.register("orders", "a:1").await.unwrap();
        manager.register("billing", "a:1").await.unwrap();
        manager.register("search", "b:2").await.unwrap();

        let mut removed = manager.unregister("", info).await;
        removed.sort_by(|a, b| a.service.cmp(&b.service));

        assert_eq!(
            removed,
            vec![
                RegistrationInfo::new("billing", "a:1"),
                RegistrationInfo::new("orders", "a:1"),
                RegistrationInfo::new("search", "b:2"),
            ]
        );
        for service in ["orders", "billing", "search"] {
            assert!(backend.observer(service).is_cancelled());
        }
        assert!(manager.query("", "", info).await.is_empty());
        assert!(manager.query("", "a:1", info).await.is_empty());
        assert!(manager.query("", "b:2", info).await.is_empty());
    }

    #[tokio::test]
    async fn address_bucket_follows_its_services() {
        let (_backend, manager, _scope) = setup();
        manager.register("orders", "a:1").await.unwrap();
        manager.register("billing", "a:1").await.unwrap();

        manager.unregister("orders", info).await;
        assert_eq!(
            manager.query("", "a:1", info).await,
            vec![RegistrationInfo::new("billing", "a:1")]
        );

        manager.unregister("billing", info).await;
        assert!(manager.query("", "a:1", info).await.is_empty());
        assert!(manager.index.lock().await.is_consistent());
    }

    #[tokio::test]
    async fn orders_and_billing_on_one_address() {
        let (_backend, manager, _scope) = setup();
        let a = "10.0.0.5:9000";
        manager.register("orders", a).await.unwrap();
        manager.register("billing", a).await.unwrap();

        let mut by_address = manager.query("", a, info).await;
        by_address.sort_by(|x, y| x.service.cmp(&y.service));
        assert_eq!(
            by_address,
            vec![RegistrationInfo::new("billing", a), RegistrationInfo::new("orders", a)]
        );

        // union: the service match first, then every match at the address
        let union = manager.query("orders", a, info).await;
        assert_eq!(union.len(), 3);
        assert_eq!(union[0], RegistrationInfo::new("orders", a));
        assert_eq!(union.iter().filter(|i| i.service == "orders").count(), 2);

        assert_eq!(manager.unregister("", info).await.len(), 2);
        assert!(manager.query("", "", info).await.is_empty());
    }

    #[tokio::test]
    async fn scope_cancel_cascades_and_closes() {
        let (backend, manager, scope) = setup();
        manager.register("orders", "a:1").await.unwrap();
        manager.register("billing", "b:2").await.unwrap();

        scope.cancel();

        assert!(backend.observer("orders").is_cancelled());
        assert!(backend.observer("billing").is_cancelled());
        assert!(manager.is_closed());

        let err = manager.register("search", "a:1").await.unwrap_err();
        assert!(matches!(err, RegistrationError::Closed));
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn dropped_register_future_rolls_back() {
        let (backend, manager, _scope) = setup();
        backend.hang.store(true, Ordering::SeqCst);

        let outcome =
            tokio::time::timeout(Duration::from_millis(50), manager.register("orders", "a:1"))
                .await;

        assert!(outcome.is_err(), "register should still be pending");
        assert!(backend.observer("orders").is_cancelled());
        assert!(manager.is_empty().await);
        assert!(manager.index.lock().await.is_consistent());

        backend.hang.store(false, Ordering::SeqCst);
        manager.register("orders", "a:1").await.unwrap();
        assert_eq!(manager.len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_registers_of_one_service_hit_backend_once() {
        let (backend, manager, _scope) = setup();
        *backend.delay.lock().unwrap() = Some(Duration::from_millis(20));

        let (first, second) = tokio::join!(
            manager.register("orders", "a:1"),
            manager.register("orders", "a:1")
        );

        first.unwrap();
        second.unwrap();
        assert_eq!(backend.calls(), 1);
        assert_eq!(manager.len().await, 1);
    }

    #[tokio::test]
    async fn close_ends_lifetimes_and_refuses_registrations() {
        let (backend, manager, scope) = setup();
        manager.register("orders", "a:1").await.unwrap();

        manager.close();
        manager.close();

        assert!(scope.is_cancelled());
        assert!(backend.observer("orders").is_cancelled());
        let err = manager.register("billing", "b:2").await.unwrap_err();
        assert!(matches!(err, RegistrationError::Closed));
        assert_eq!(backend.calls(), 1);

        // entries stay until withdrawn
        assert_eq!(
            manager.unregister_all(info).await,
            vec![RegistrationInfo::new("orders", "a:1")]
        );
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn panicking_query_projection_leaves_index_intact() {
        let (_backend, manager, _scope) = setup();
        let manager = Arc::new(manager);
        manager.register("orders", "a:1").await.unwrap();

        let m = manager.clone();
        let err = tokio::spawn(async move {
            m.query("", "", |_: &Registration| -> RegistrationInfo {
                panic!("projection failed")
            })
            .await
        })
        .await
        .unwrap_err();
        assert!(err.is_panic());

        assert!(manager.index.lock().await.is_consistent());
        assert_eq!(
            manager.query("orders", "", info).await,
            vec![RegistrationInfo::new("orders", "a:1")]
        );
        manager.register("billing", "a:1").await.unwrap();
        assert_eq!(manager.len().await, 2);
    }

    #[tokio::test]
    async fn panicking_unregister_projection_still_removes() {
        let (backend, manager, _scope) = setup();
        let manager = Arc::new(manager);
        manager.register("orders", "a:1").await.unwrap();
        manager.register("billing", "a:1").await.unwrap();

        let m = manager.clone();
        let err = tokio::spawn(async move {
            m.unregister("orders", |_: &Registration| -> RegistrationInfo {
                panic!("projection failed")
            })
            .await
        })
        .await
        .unwrap_err();
        assert!(err.is_panic());

        assert!(backend.observer("orders").is_cancelled());
        assert!(manager.index.lock().await.is_consistent());
        assert!(manager.query("orders", "", info).await.is_empty());
        assert_eq!(
            manager.query("", "a:1", info).await,
            vec![RegistrationInfo::new("billing", "a:1")]
        );

        manager.register("orders", "a:1").await.unwrap();
        assert_eq!(manager.len().await, 2);
    }

    #[tokio::test]
    async fn panicking_backend_rolls_back() {
        let (backend, manager, _scope) = setup();
        let manager = Arc::new(manager);
        backend.panic_on_register.store(true, Ordering::SeqCst);

        let m = manager.clone();
        let err = tokio::spawn(async move { m.register("orders", "a:1").await })
            .await
            .unwrap_err();
        assert!(err.is_panic());

        assert!(backend.observer("orders").is_cancelled());
        assert!(manager.is_empty().await);
        assert!(manager.index.lock().await.is_consistent());

        backend.panic_on_register.store(false, Ordering::SeqCst);
        manager.register("orders", "a:1").await.unwrap();
        assert_eq!(backend.calls(), 2);
        assert_eq!(manager.len().await, 1);
    }
}
