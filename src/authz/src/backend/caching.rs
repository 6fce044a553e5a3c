//! Cached composition over an [`UncachedBackend`]

use async_trait::async_trait;
use std::sync::Arc;

use super::{BackendResult, CredentialBackend, ScopedCredential, UncachedBackend};
use crate::cache::{CacheConfig, CacheStats, ResilientCache};
use crate::clock::{Clock, SystemClock};
use crate::keys::KeyScope;
use crate::policy::PolicyDocument;

type PolicyKey = (String, String, String);

/// Statistics for each of the three lookup caches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCacheStats {
    pub user_keys: CacheStats,
    pub access_keys: CacheStats,
    pub policies: CacheStats,
}

/// Serves lookups from per-lookup [`ResilientCache`]s, falling back to the
/// last known value while the wrapped backend is unavailable
pub struct CachingBackend<B> {
    inner: B,
    user_keys: ResilientCache<KeyScope, ScopedCredential>,
    access_keys: ResilientCache<KeyScope, ScopedCredential>,
    policies: ResilientCache<PolicyKey, PolicyDocument>,
}

impl<B: UncachedBackend> CachingBackend<B> {
    pub fn new(inner: B, config: CacheConfig) -> Self {
        Self::with_clock(inner, config, Arc::new(SystemClock))
    }

    pub fn with_clock(inner: B, config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            user_keys: ResilientCache::with_clock(config.clone(), clock.clone()),
            access_keys: ResilientCache::with_clock(config.clone(), clock.clone()),
            policies: ResilientCache::with_clock(config, clock),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn stats(&self) -> BackendCacheStats {
        BackendCacheStats {
            user_keys: self.user_keys.stats(),
            access_keys: self.access_keys.stats(),
            policies: self.policies.stats(),
        }
    }

    /// Drop every cached entry
    pub fn clear(&self) {
        self.user_keys.clear();
        self.access_keys.clear();
        self.policies.clear();
    }
}

#[async_trait]
impl<B: UncachedBackend> CredentialBackend for CachingBackend<B> {
    async fn user_key(&self, scope: &KeyScope) -> BackendResult<ScopedCredential> {
        self.user_keys
            .get_or_fetch(scope.clone(), || self.inner.fetch_user_key(scope))
            .await
    }

    async fn access_key(&self, scope: &KeyScope) -> BackendResult<ScopedCredential> {
        self.access_keys
            .get_or_fetch(scope.clone(), || self.inner.fetch_access_key(scope))
            .await
    }

    async fn user_policies(
        &self,
        region: &str,
        service: &str,
        username: &str,
    ) -> BackendResult<PolicyDocument> {
        let key = (region.to_string(), service.to_string(), username.to_string());
        self.policies
            .get_or_fetch(key, || {
                self.inner.fetch_user_policies(region, service, username)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::cache::Expiring;
    use crate::clock::ManualClock;
    use crate::keys::{Protocol, ScopedKey};
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend whose answers are scripted by the test
    struct Scripted {
        clock: Arc<ManualClock>,
        calls: AtomicUsize,
        failure: Mutex<Option<BackendError>>,
    }

    impl Scripted {
        fn answer(&self, identity: &str) -> BackendResult<Expiring<ScopedCredential>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.failure.lock().clone() {
                return Err(err);
            }
            Ok(Expiring::new(
                ScopedCredential {
                    identity: identity.to_string(),
                    key: ScopedKey::from_bytes(vec![self.calls.load(Ordering::SeqCst) as u8]),
                },
                self.clock.now() + Duration::seconds(30),
            ))
        }
    }

    #[async_trait]
    impl UncachedBackend for Scripted {
        async fn fetch_user_key(
            &self,
            scope: &KeyScope,
        ) -> BackendResult<Expiring<ScopedCredential>> {
            self.answer(&scope.identity)
        }

        async fn fetch_access_key(
            &self,
            _scope: &KeyScope,
        ) -> BackendResult<Expiring<ScopedCredential>> {
            self.answer("charles")
        }

        async fn fetch_user_policies(
            &self,
            _region: &str,
            _service: &str,
            _username: &str,
        ) -> BackendResult<Expiring<PolicyDocument>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Expiring::new(
                PolicyDocument::new(),
                self.clock.now() + Duration::seconds(30),
            ))
        }
    }

    fn setup() -> (Arc<ManualClock>, CachingBackend<Scripted>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 17, 9, 0, 0).unwrap(),
        ));
        let inner = Scripted {
            clock: clock.clone(),
            calls: AtomicUsize::new(0),
            failure: Mutex::new(None),
        };
        let backend = CachingBackend::with_clock(inner, CacheConfig::default(), clock.clone());
        (clock, backend)
    }

    fn scope(identity: &str) -> KeyScope {
        KeyScope::new(
            Protocol::Jwt,
            "eu-west-1",
            "rockets",
            NaiveDate::from_ymd_opt(2024, 5, 17).unwrap(),
            identity,
        )
    }

    #[tokio::test]
    async fn test_repeated_lookup_hits_cache() {
        let (_clock, backend) = setup();

        let first = backend.user_key(&scope("charles")).await.unwrap();
        let second = backend.user_key(&scope("charles")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(backend.inner().calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.stats().user_keys.hits, 1);
    }

    #[tokio::test]
    async fn test_outage_serves_stale_key() {
        let (clock, backend) = setup();
        let fresh = backend.user_key(&scope("charles")).await.unwrap();

        clock.advance(Duration::minutes(5));
        *backend.inner().failure.lock() = Some(BackendError::Unavailable("timeout".into()));

        let stale = backend.user_key(&scope("charles")).await.unwrap();
        assert_eq!(stale, fresh);
        assert_eq!(backend.stats().user_keys.stale_served, 1);
    }

    #[tokio::test]
    async fn test_revoked_key_is_not_served_stale() {
        let (clock, backend) = setup();
        backend.access_key(&scope("AKIDEXAMPLE")).await.unwrap();

        clock.advance(Duration::minutes(5));
        *backend.inner().failure.lock() = Some(BackendError::no_such_key("AKIDEXAMPLE"));

        let result = backend.access_key(&scope("AKIDEXAMPLE")).await;
        assert!(matches!(result, Err(BackendError::NoSuchKey { .. })));
        assert_eq!(backend.stats().access_keys.entries, 0);
    }

    #[tokio::test]
    async fn test_lookups_use_separate_caches() {
        let (_clock, backend) = setup();

        backend.user_key(&scope("charles")).await.unwrap();
        backend.access_key(&scope("charles")).await.unwrap();
        backend
            .user_policies("eu-west-1", "rockets", "charles")
            .await
            .unwrap();

        let stats = backend.stats();
        assert_eq!(stats.user_keys.entries, 1);
        assert_eq!(stats.access_keys.entries, 1);
        assert_eq!(stats.policies.entries, 1);
        assert_eq!(backend.inner().calls.load(Ordering::SeqCst), 3);

        backend.clear();
        assert_eq!(backend.stats().user_keys.entries, 0);
    }
}
