//! Backend answering from a local directory and master secret

use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;
use tracing::debug;

use super::{BackendError, BackendResult, ScopedCredential, UncachedBackend};
use crate::cache::Expiring;
use crate::clock::{Clock, SystemClock};
use crate::error::AuthzError;
use crate::keys::KeyScope;
use crate::policy::PolicyDocument;
use crate::store::DirectoryStore;

/// Derives scoped keys locally
///
/// User keys are derived from the service's master secret; access key
/// scoped keys are derived from the access key's own secret, so a
/// presented secret can be checked against them without ever comparing raw
/// secrets.
pub struct LocalBackend {
    store: Arc<dyn DirectoryStore>,
    master_secret: Vec<u8>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl LocalBackend {
    pub fn new(store: Arc<dyn DirectoryStore>, master_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            store,
            master_secret: master_secret.into(),
            ttl: Duration::minutes(5),
            clock: Arc::new(SystemClock),
        }
    }

    /// How long a lookup result stays fresh
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn DirectoryStore> {
        &self.store
    }

    fn stamp<V>(&self, value: V) -> Expiring<V> {
        Expiring::new(value, self.clock.now() + self.ttl)
    }
}

fn unavailable(err: AuthzError) -> BackendError {
    BackendError::Unavailable(err.to_string())
}

#[async_trait]
impl UncachedBackend for LocalBackend {
    async fn fetch_user_key(&self, scope: &KeyScope) -> BackendResult<Expiring<ScopedCredential>> {
        let user = self
            .store
            .user(&scope.identity)
            .await
            .map_err(unavailable)?
            .ok_or_else(|| BackendError::no_such_key(&scope.identity))?;

        debug!("Derived {} key for user {}", scope.protocol, user.username);

        Ok(self.stamp(ScopedCredential {
            identity: user.username,
            key: scope.derive(&self.master_secret),
        }))
    }

    async fn fetch_access_key(
        &self,
        scope: &KeyScope,
    ) -> BackendResult<Expiring<ScopedCredential>> {
        let record = self
            .store
            .access_key(&scope.identity)
            .await
            .map_err(unavailable)?
            .ok_or_else(|| BackendError::no_such_key(&scope.identity))?;

        debug!(
            "Derived {} key for access key {}",
            scope.protocol, record.access_key_id
        );

        Ok(self.stamp(ScopedCredential {
            key: scope.derive(record.secret_access_key.as_bytes()),
            identity: record.username,
        }))
    }

    async fn fetch_user_policies(
        &self,
        _region: &str,
        _service: &str,
        username: &str,
    ) -> BackendResult<Expiring<PolicyDocument>> {
        let policy = self
            .store
            .effective_policy(username)
            .await
            .map_err(unavailable)?
            .ok_or_else(|| BackendError::no_such_key(username))?;

        Ok(self.stamp(policy))
    }
}
