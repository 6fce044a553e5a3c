//! Backend delegating to a remote authorization service over HTTP

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::header::ACCEPT;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{BackendError, BackendResult, ScopedCredential, UncachedBackend};
use crate::cache::Expiring;
use crate::clock::{Clock, SystemClock};
use crate::config::RemoteConfig;
use crate::error::{AuthzError, Result};
use crate::keys::{KeyScope, ScopedKey};
use crate::policy::PolicyDocument;

#[derive(Debug, Deserialize)]
struct SigningTokenResponse {
    identity: String,
    /// Base64 scoped key
    secret: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct PolicyResponse {
    policy: PolicyDocument,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

/// Remote lookups under `/api/v1/regions/{region}/services/{service}/`
///
/// Requests authenticate with the configured access key as a basic
/// credential. A 404 means the identity does not exist; every other failure,
/// including timeouts, is reported as [`BackendError::Unavailable`].
///
/// Every path segment is percent-encoded, so an identity can never name a
/// different resource than its own.
pub struct HttpBackend {
    client: reqwest::Client,
    endpoint: Url,
    access_key_id: String,
    secret_access_key: String,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl HttpBackend {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AuthzError::Config(format!("HTTP client: {}", e)))?;

        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| AuthzError::Config(format!("remote endpoint: {}", e)))?;
        if endpoint.cannot_be_a_base() {
            return Err(AuthzError::Config(format!(
                "remote endpoint '{}' is not a base URL",
                config.endpoint
            )));
        }

        Ok(Self {
            client,
            endpoint,
            access_key_id: config.access_key_id.clone(),
            secret_access_key: config.secret_access_key.clone(),
            default_ttl: Duration::minutes(5),
            clock: Arc::new(SystemClock),
        })
    }

    /// Freshness applied when a response carries no expiry
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn expiry(&self, expires_at: Option<DateTime<Utc>>) -> DateTime<Utc> {
        expires_at.unwrap_or_else(|| self.clock.now() + self.default_ttl)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, identity: &str) -> BackendResult<T> {
        let uri = url.path().to_string();
        debug!("Remote lookup {}", uri);

        let response = self
            .client
            .get(url)
            .basic_auth(&self.access_key_id, Some(&self.secret_access_key))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                warn!("Remote lookup {} failed: {}", uri, e);
                BackendError::Unavailable(e.to_string())
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(BackendError::no_such_key(identity)),
            status if !status.is_success() => {
                warn!("Remote lookup {} returned HTTP {}", uri, status);
                Err(BackendError::Unavailable(format!("HTTP {}", status)))
            }
            _ => response
                .json::<T>()
                .await
                .map_err(|e| BackendError::Unavailable(format!("malformed response: {}", e))),
        }
    }

    async fn signing_token(
        &self,
        collection: &str,
        scope: &KeyScope,
    ) -> BackendResult<Expiring<ScopedCredential>> {
        let url = signing_token_url(&self.endpoint, collection, scope)?;
        let token: SigningTokenResponse = self.get_json(url, &scope.identity).await?;
        let key = ScopedKey::from_base64(&token.secret)
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        Ok(Expiring::new(
            ScopedCredential {
                identity: token.identity,
                key,
            },
            self.expiry(token.expires_at),
        ))
    }
}

/// `endpoint` joined with `segments`, each percent-encoded as one segment
///
/// Empty, `.` and `..` segments would collapse into a neighbouring resource,
/// so they are answered as unknown identities instead.
fn lookup_url(endpoint: &Url, identity: &str, segments: &[&str]) -> BackendResult<Url> {
    if segments.iter().any(|s| s.is_empty() || *s == "." || *s == "..") {
        return Err(BackendError::no_such_key(identity));
    }

    let mut url = endpoint.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|_| BackendError::Unavailable("remote endpoint is not a base URL".to_string()))?
        .pop_if_empty()
        .extend(["api", "v1", "regions"])
        .extend(segments);
    Ok(url)
}

fn signing_token_url(endpoint: &Url, collection: &str, scope: &KeyScope) -> BackendResult<Url> {
    let date = scope.date.format("%Y%m%d").to_string();
    lookup_url(
        endpoint,
        &scope.identity,
        &[
            scope.region.as_str(),
            "services",
            scope.service.as_str(),
            collection,
            scope.identity.as_str(),
            scope.protocol.as_str(),
            &date,
        ],
    )
}

fn user_policies_url(
    endpoint: &Url,
    region: &str,
    service: &str,
    username: &str,
) -> BackendResult<Url> {
    lookup_url(
        endpoint,
        username,
        &[region, "services", service, "user-policies", username],
    )
}

#[async_trait]
impl UncachedBackend for HttpBackend {
    async fn fetch_user_key(&self, scope: &KeyScope) -> BackendResult<Expiring<ScopedCredential>> {
        self.signing_token("user-signing-tokens", scope).await
    }

    async fn fetch_access_key(
        &self,
        scope: &KeyScope,
    ) -> BackendResult<Expiring<ScopedCredential>> {
        self.signing_token("access-key-signing-tokens", scope).await
    }

    async fn fetch_user_policies(
        &self,
        region: &str,
        service: &str,
        username: &str,
    ) -> BackendResult<Expiring<PolicyDocument>> {
        let url = user_policies_url(&self.endpoint, region, service, username)?;
        let response: PolicyResponse = self.get_json(url, username).await?;
        response
            .policy
            .validate()
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        Ok(Expiring::new(response.policy, self.expiry(response.expires_at)))
    }
}
