//! Session tokens: HS256 JWTs signed with a per-user scoped key
//!
//! The signing key for a token is the user's `jwt` scoped key for the day
//! the token was issued, so a token's unverified `user` and `iat` claims are
//! read first to find out which key to verify it with.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::{Identity, IdentityError, IdentityParser, RequestHeaders};
use crate::backend::CredentialBackend;
use crate::clock::{Clock, SystemClock};
use crate::config::SessionSection;
use crate::error::{AuthzError, Result};
use crate::keys::{constant_time_eq, KeyScope, Protocol};

/// Claims carried by a session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub user: String,
    #[serde(default)]
    pub mfa: bool,
    pub iat: i64,
    pub exp: i64,
    /// Must be echoed in the CSRF header when present
    #[serde(rename = "csrf-token", default, skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UnverifiedClaims {
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    iat: Option<i64>,
}

/// Resolves session tokens from the session cookie or a bearer header
pub struct BearerTokenParser {
    backend: Arc<dyn CredentialBackend>,
    region: String,
    service: String,
    session: SessionSection,
    clock: Arc<dyn Clock>,
}

impl BearerTokenParser {
    pub fn new(
        backend: Arc<dyn CredentialBackend>,
        region: impl Into<String>,
        service: impl Into<String>,
        session: SessionSection,
    ) -> Self {
        Self {
            backend,
            region: region.into(),
            service: service.into(),
            session,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Read the claims that pick the verification key, without trusting them
    fn signing_scope(&self, token: &str) -> std::result::Result<KeyScope, IdentityError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let no_key = DecodingKey::from_secret(&[]);
        let unverified = jsonwebtoken::decode::<UnverifiedClaims>(token, &no_key, &validation)
            .map_err(|e| {
                debug!("Undecodable session token: {}", e);
                IdentityError::InvalidSignature { identity: None }
            })?
            .claims;

        let user = unverified.user.unwrap_or_else(|| "unknown".to_string());
        let issued = unverified
            .iat
            .and_then(|iat| DateTime::<Utc>::from_timestamp(iat, 0))
            .ok_or_else(|| IdentityError::invalid_signature(&user))?;

        Ok(KeyScope::new(
            Protocol::Jwt,
            &self.region,
            &self.service,
            issued.date_naive(),
            user,
        ))
    }
}

#[async_trait]
impl IdentityParser for BearerTokenParser {
    fn name(&self) -> &'static str {
        "session-token"
    }

    async fn identify(
        &self,
        headers: &RequestHeaders,
    ) -> std::result::Result<Identity, IdentityError> {
        let cookie = headers.cookie(&self.session.cookie_name);
        let Some(token) = cookie.as_deref().or_else(|| headers.bearer_token()) else {
            return Err(IdentityError::Unsigned);
        };

        let scope = self.signing_scope(token)?;
        let credential = self.backend.user_key(&scope).await?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;

        let claims = jsonwebtoken::decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(credential.key.as_bytes()),
            &validation,
        )
        .map_err(|e| {
            debug!("Session token for {} failed verification: {}", scope.identity, e);
            IdentityError::invalid_signature(&scope.identity)
        })?
        .claims;

        if claims.user != scope.identity {
            return Err(IdentityError::invalid_signature(&scope.identity));
        }

        let now = self.clock.now().timestamp();
        if claims.exp < now - self.session.leeway_secs as i64 {
            debug!("Session token for {} expired", claims.user);
            return Err(IdentityError::invalid_signature(&claims.user));
        }

        if let Some(expected) = &claims.csrf_token {
            let presented = headers.get(&self.session.csrf_header).unwrap_or_default();
            if !constant_time_eq(expected.as_bytes(), presented.as_bytes()) {
                return Err(IdentityError::CsrfError {
                    identity: claims.user,
                });
            }
        }

        Ok(Identity::new(claims.user, claims.mfa))
    }
}

/// A freshly minted session
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    /// Value the client must send back in the CSRF header
    pub csrf_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Mints session tokens accepted by [`BearerTokenParser`]
pub struct SessionIssuer {
    backend: Arc<dyn CredentialBackend>,
    region: String,
    service: String,
    session: SessionSection,
    clock: Arc<dyn Clock>,
}

impl SessionIssuer {
    pub fn new(
        backend: Arc<dyn CredentialBackend>,
        region: impl Into<String>,
        service: impl Into<String>,
        session: SessionSection,
    ) -> Self {
        Self {
            backend,
            region: region.into(),
            service: service.into(),
            session,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sign a session for `username` with today's scoped key
    pub async fn issue(&self, username: &str, mfa: bool) -> Result<IssuedSession> {
        let now = self.clock.now();
        let expires_at = now + self.session.ttl();
        let scope = KeyScope::new(
            Protocol::Jwt,
            &self.region,
            &self.service,
            now.date_naive(),
            username,
        );
        let credential = self.backend.user_key(&scope).await?;

        let csrf_token = Uuid::new_v4().to_string();
        let claims = SessionClaims {
            user: credential.identity,
            mfa,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            csrf_token: Some(csrf_token.clone()),
        };

        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(credential.key.as_bytes()),
        )
        .map_err(|e| AuthzError::Internal(format!("session signing failed: {}", e)))?;

        info!("Issued session for {} (mfa: {})", claims.user, mfa);

        Ok(IssuedSession {
            token,
            csrf_token,
            expires_at,
        })
    }
}
