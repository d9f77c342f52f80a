use std::collections::{BTreeMap, BTreeSet};

use registration_sdk::{Lifetime, RegistrationInfo};

/// One locally-active announcement.
#[derive(Debug)]
pub struct Registration {
    service: String,
    address: String,
    lifetime: Lifetime,
}

impl Registration {
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }

    /// `false` once the lifetime has been cancelled.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.lifetime.is_cancelled()
    }

    #[must_use]
    pub fn info(&self) -> RegistrationInfo {
        RegistrationInfo::new(self.service.clone(), self.address.clone())
    }
}

/// Local registrations keyed by service name, with a secondary index by address.
///
/// Every service in `by_service` is listed in exactly one address bucket, the
/// one matching its address, and empty buckets are never kept. The index has
/// no lock of its own; the manager serializes every access.
#[derive(Debug, Default)]
pub struct RegistrationIndex {
    by_service: BTreeMap<String, Registration>,
    by_address: BTreeMap<String, BTreeSet<String>>,
}

impl RegistrationIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new registration. Returns `false`, leaving the index untouched,
    /// when `service` is already present; the rejected lifetime is cancelled.
    pub fn insert(&mut self, service: &str, address: &str, lifetime: Lifetime) -> bool {
        if self.by_service.contains_key(service) {
            lifetime.cancel();
            return false;
        }

        self.by_address
            .entry(address.to_owned())
            .or_default()
            .insert(service.to_owned());
        self.by_service.insert(
            service.to_owned(),
            Registration {
                service: service.to_owned(),
                address: address.to_owned(),
                lifetime,
            },
        );
        true
    }

    /// Remove `service` from both maps, dropping its address bucket if it empties.
    pub fn remove_by_service(&mut self, service: &str) -> Option<Registration> {
        let registration = self.by_service.remove(service)?;

        if let Some(bucket) = self.by_address.get_mut(&registration.address) {
            bucket.remove(service);
            if bucket.is_empty() {
                self.by_address.remove(&registration.address);
            }
        }

        Some(registration)
    }

    pub fn remove_all(&mut self) -> Vec<Registration> {
        self.by_address.clear();
        std::mem::take(&mut self.by_service).into_values().collect()
    }

    #[must_use]
    pub fn snapshot_all(&self) -> Vec<&Registration> {
        self.by_service.values().collect()
    }

    #[must_use]
    pub fn snapshot_by_service(&self, service: &str) -> Vec<&Registration> {
        self.by_service.get(service).into_iter().collect()
    }

    #[must_use]
    pub fn snapshot_by_address(&self, address: &str) -> Vec<&Registration> {
        self.by_address
            .get(address)
            .into_iter()
            .flatten()
            .filter_map(|service| self.by_service.get(service))
            .collect()
    }

    #[must_use]
    pub fn get(&self, service: &str) -> Option<&Registration> {
        self.by_service.get(service)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_service.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_service.is_empty()
    }

    /// Check that both maps describe the same set of registrations.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let forward = self.by_service.values().all(|r| {
            self.by_address
                .get(&r.address)
                .is_some_and(|bucket| bucket.contains(&r.service))
        });

        let backward = self.by_address.iter().all(|(address, bucket)| {
            !bucket.is_empty()
                && bucket.iter().all(|service| {
                    self.by_service
                        .get(service)
                        .is_some_and(|r| r.address == *address)
                })
        });

        let listed: usize = self.by_address.values().map(BTreeSet::len).sum();

        forward && backward && listed == self.by_service.len()
    }
}
