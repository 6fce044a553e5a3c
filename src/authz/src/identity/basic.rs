//! Access key credentials in an `Authorization: Basic` header

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{Identity, IdentityError, IdentityParser, RequestHeaders};
use crate::backend::CredentialBackend;
use crate::clock::{Clock, SystemClock};
use crate::keys::{KeyScope, Protocol};

/// Resolves `access-key-id:secret` basic credentials
///
/// The backend returns the access key's scoped key for today; the presented
/// secret is run through the same derivation and compared in constant time,
/// so raw secrets are never compared directly.
pub struct BasicAuthParser {
    backend: Arc<dyn CredentialBackend>,
    region: String,
    service: String,
    clock: Arc<dyn Clock>,
}

impl BasicAuthParser {
    pub fn new(
        backend: Arc<dyn CredentialBackend>,
        region: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            region: region.into(),
            service: service.into(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl IdentityParser for BasicAuthParser {
    fn name(&self) -> &'static str {
        "basic-auth"
    }

    async fn identify(&self, headers: &RequestHeaders) -> Result<Identity, IdentityError> {
        let Some((access_key_id, secret)) = headers.basic_credentials()? else {
            return Err(IdentityError::Unsigned);
        };

        let scope = KeyScope::new(
            Protocol::BasicAuth,
            &self.region,
            &self.service,
            self.clock.today(),
            &access_key_id,
        );
        let credential = self.backend.access_key(&scope).await?;

        if !scope.verify(secret.as_bytes(), &credential.key) {
            debug!("Secret mismatch for access key {}", access_key_id);
            return Err(IdentityError::invalid_signature(access_key_id));
        }

        Ok(Identity::new(credential.identity, false))
    }
}
