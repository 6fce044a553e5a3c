//! Credential and policy lookups
//!
//! An [`UncachedBackend`] answers the three lookups the authorization core
//! needs, each stamped with an expiry. [`CachingBackend`] wraps one and is
//! the [`CredentialBackend`] the rest of the crate depends on.
//!
//! Implementations:
//! - [`LocalBackend`]: derives keys from a master secret over a
//!   [`DirectoryStore`](crate::store::DirectoryStore)
//! - [`HttpBackend`]: delegates to a remote authorization service (feature `remote`)

use async_trait::async_trait;
use thiserror::Error;

use crate::cache::{Expiring, StaleFallback};
use crate::keys::{KeyScope, ScopedKey};
use crate::policy::PolicyDocument;

mod caching;
mod local;

#[cfg(feature = "remote")]
mod http;

pub use caching::{BackendCacheStats, CachingBackend};
pub use local::LocalBackend;

#[cfg(feature = "remote")]
pub use http::HttpBackend;

/// Backend lookup failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The user or access key does not exist
    #[error("No such key: {identity}")]
    NoSuchKey { identity: String },

    /// The backend could not answer (network, timeout, storage failure)
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    pub fn no_such_key(identity: impl Into<String>) -> Self {
        BackendError::NoSuchKey {
            identity: identity.into(),
        }
    }
}

impl StaleFallback for BackendError {
    fn allows_stale(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }
}

/// Result type for backend lookups
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// A scoped key and the identity it resolves to
///
/// For access keys the scope identity is the access key id while `identity`
/// is the owning user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedCredential {
    pub identity: String,
    pub key: ScopedKey,
}

/// Lookups that report their own expiry
#[async_trait]
pub trait UncachedBackend: Send + Sync {
    /// Scoped key for a user; `scope.identity` is the username
    async fn fetch_user_key(&self, scope: &KeyScope) -> BackendResult<Expiring<ScopedCredential>>;

    /// Scoped key for an access key; `scope.identity` is the access key id
    async fn fetch_access_key(&self, scope: &KeyScope)
        -> BackendResult<Expiring<ScopedCredential>>;

    /// Group and user policies of `username`, merged in that order
    async fn fetch_user_policies(
        &self,
        region: &str,
        service: &str,
        username: &str,
    ) -> BackendResult<Expiring<PolicyDocument>>;
}

/// Lookups the identity resolver and authorizer depend on
#[async_trait]
pub trait CredentialBackend: Send + Sync {
    async fn user_key(&self, scope: &KeyScope) -> BackendResult<ScopedCredential>;

    async fn access_key(&self, scope: &KeyScope) -> BackendResult<ScopedCredential>;

    async fn user_policies(
        &self,
        region: &str,
        service: &str,
        username: &str,
    ) -> BackendResult<PolicyDocument>;
}
