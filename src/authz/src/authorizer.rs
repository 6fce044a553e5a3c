//! Authorization entry points
//!
//! - [`Authorizer::internal_authorize`]: gate this service's own endpoints;
//!   basic credentials only, failures are terminal
//! - [`Authorizer::external_authorize`]: answer for another service using the
//!   full identity chain; always returns a decision
//! - [`Authorizer::external_authorize_by_login`]: same, for a username and
//!   password
//! - [`Authorizer::batch_authorize`]: many `(action, resource)` pairs against
//!   one identity
//!
//! Every decision emits one event on the `warden_authz::audit` target.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::arn::ArnBuilder;
use crate::backend::{BackendError, CachingBackend, CredentialBackend, LocalBackend};
use crate::clock::{Clock, SystemClock};
use crate::config::AuthorizerConfig;
use crate::decision::{AuthorizationDecision, AuthorizationFailure, BatchDecision, ErrorCode};
use crate::identity::{
    BasicAuthParser, BearerTokenParser, Identity, IdentityError, IdentityResolver, RequestHeaders,
    SessionIssuer,
};
use crate::policy::{AllowedResources, Context, PolicyDocument, PolicyEngine};
use crate::store::DirectoryStore;

#[cfg(feature = "remote")]
use crate::backend::HttpBackend;

const AUDIT: &str = "warden_authz::audit";

/// Orchestrates identity resolution, policy lookup and evaluation
pub struct Authorizer {
    config: AuthorizerConfig,
    backend: Arc<dyn CredentialBackend>,
    directory: Option<Arc<dyn DirectoryStore>>,
    resolver: IdentityResolver,
    internal_resolver: IdentityResolver,
    arns: ArnBuilder,
    clock: Arc<dyn Clock>,
}

impl Authorizer {
    pub fn new(config: AuthorizerConfig, backend: Arc<dyn CredentialBackend>) -> Self {
        Self::with_clock(config, backend, Arc::new(SystemClock))
    }

    /// Build with an injected clock, shared with the identity parsers
    pub fn with_clock(
        config: AuthorizerConfig,
        backend: Arc<dyn CredentialBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let region = config.service.region.clone();
        let service = config.service.service.clone();

        let basic: Arc<BasicAuthParser> = Arc::new(
            BasicAuthParser::new(backend.clone(), &region, &service).with_clock(clock.clone()),
        );
        let token = Arc::new(
            BearerTokenParser::new(backend.clone(), &region, &service, config.session.clone())
                .with_clock(clock.clone()),
        );

        let resolver = IdentityResolver::new()
            .with_parser(token)
            .with_parser(basic.clone());
        let internal_resolver = IdentityResolver::new().with_parser(basic);

        Self {
            arns: ArnBuilder::new(&config.service.partition, &config.service.service),
            config,
            backend,
            directory: None,
            resolver,
            internal_resolver,
            clock,
        }
    }

    /// Single-process authorizer over a local directory, with cached lookups
    pub fn local(
        config: AuthorizerConfig,
        directory: Arc<dyn DirectoryStore>,
        master_secret: impl Into<Vec<u8>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let uncached = LocalBackend::new(directory.clone(), master_secret)
            .with_ttl(config.keys.ttl())
            .with_clock(clock.clone());
        let backend = Arc::new(CachingBackend::with_clock(
            uncached,
            config.cache.clone(),
            clock.clone(),
        ));

        Self::with_clock(config, backend, clock).with_directory(directory)
    }

    /// Authorizer delegating lookups to the configured `[remote]` service
    #[cfg(feature = "remote")]
    pub fn remote(config: AuthorizerConfig, clock: Arc<dyn Clock>) -> crate::error::Result<Self> {
        let remote = config.remote.as_ref().ok_or_else(|| {
            crate::error::AuthzError::Config("no [remote] section configured".to_string())
        })?;

        let uncached = HttpBackend::new(remote)?
            .with_default_ttl(config.keys.ttl())
            .with_clock(clock.clone());
        let backend = Arc::new(CachingBackend::with_clock(
            uncached,
            config.cache.clone(),
            clock.clone(),
        ));

        Ok(Self::with_clock(config, backend, clock))
    }

    /// Directory holding login passwords
    pub fn with_directory(mut self, directory: Arc<dyn DirectoryStore>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn arns(&self) -> &ArnBuilder {
        &self.arns
    }

    pub fn config(&self) -> &AuthorizerConfig {
        &self.config
    }

    /// Issuer for session tokens this authorizer accepts
    pub fn session_issuer(&self) -> SessionIssuer {
        SessionIssuer::new(
            self.backend.clone(),
            &self.config.service.region,
            &self.config.service.service,
            self.config.session.clone(),
        )
        .with_clock(self.clock.clone())
    }

    /// Authorize a call to one of this service's own endpoints
    ///
    /// `action` is namespaced under the configured service name and
    /// `RequestDateTime` is added to the context unless already present.
    pub async fn internal_authorize(
        &self,
        action: &str,
        resource: &str,
        headers: &RequestHeaders,
        context: &Context,
    ) -> Result<AuthorizationDecision, AuthorizationFailure> {
        let action = format!("{}:{}", self.config.service.service, action);

        let mut context = context.clone();
        context
            .entry("RequestDateTime".to_string())
            .or_insert_with(|| Value::String(self.clock.now().to_rfc3339()));

        let decision = match self.internal_resolver.identify(headers).await {
            Ok(identity) => self.authorize_identity(&identity, &action, resource, context).await,
            Err(err) => identity_denied(&err),
        };
        audit("internal", &action, resource, headers, &decision);

        if decision.authorized {
            Ok(decision)
        } else {
            Err(AuthorizationFailure::from_decision(decision))
        }
    }

    /// Authorize another service's request
    pub async fn external_authorize(
        &self,
        action: &str,
        resource: &str,
        headers: &RequestHeaders,
        context: &Context,
    ) -> AuthorizationDecision {
        let decision = match self.resolver.identify(headers).await {
            Ok(identity) => {
                self.authorize_identity(&identity, action, resource, context.clone())
                    .await
            }
            Err(err) => identity_denied(&err),
        };
        audit("external", action, resource, headers, &decision);
        decision
    }

    /// Authorize a username and password presented as a basic credential
    pub async fn external_authorize_by_login(
        &self,
        action: &str,
        resource: &str,
        headers: &RequestHeaders,
        context: &Context,
    ) -> AuthorizationDecision {
        let decision = match self.login(headers).await {
            Ok(identity) => {
                self.authorize_identity(&identity, action, resource, context.clone())
                    .await
            }
            Err(err) => identity_denied(&err),
        };
        audit("login", action, resource, headers, &decision);
        decision
    }

    /// Authorize every `(action, resource)` pair in `permits` for one identity
    ///
    /// `authorized` is true only when every pair is permitted. An empty
    /// `permits` map grants nothing and is not authorized.
    pub async fn batch_authorize(
        &self,
        permits: &BTreeMap<String, Vec<String>>,
        headers: &RequestHeaders,
        context: &Context,
    ) -> BatchDecision {
        let identity = match self.resolver.identify(headers).await {
            Ok(identity) => identity,
            Err(err) => return BatchDecision::denied(err.code()),
        };

        let policy = match self.policy_for(&identity).await {
            Ok(policy) => policy,
            Err(code) => return BatchDecision::denied(code),
        };
        let context = with_mfa(context.clone(), &identity);

        let mut decision = BatchDecision {
            identity: Some(identity.id.clone()),
            ..Default::default()
        };

        for (action, resources) in permits {
            for resource in resources {
                let allowed = PolicyEngine::allow(&policy, action, resource, &context).is_allowed();
                let bucket = if allowed {
                    &mut decision.permitted
                } else {
                    &mut decision.not_permitted
                };
                bucket.entry(action.clone()).or_default().push(resource.clone());
            }
        }

        decision.authorized = !decision.permitted.is_empty() && decision.not_permitted.is_empty();
        if !decision.authorized {
            decision.error_code = Some(ErrorCode::NotPermitted);
            decision.status = Some(ErrorCode::NotPermitted.status());
        }

        info!(
            target: AUDIT,
            mode = "batch",
            identity = %identity.id,
            permitted = decision.permitted.values().map(Vec::len).sum::<usize>(),
            not_permitted = decision.not_permitted.values().map(Vec::len).sum::<usize>(),
            authorized = decision.authorized,
            "authorization decision"
        );
        decision
    }

    /// Resource patterns the caller is allowed and denied for `action`
    pub async fn allowed_resources(
        &self,
        action: &str,
        headers: &RequestHeaders,
        context: &Context,
    ) -> Result<AllowedResources, ErrorCode> {
        let identity = self
            .resolver
            .identify(headers)
            .await
            .map_err(|err| err.code())?;
        let policy = self.policy_for(&identity).await?;

        Ok(PolicyEngine::allowed_resources(
            &policy,
            action,
            &with_mfa(context.clone(), &identity),
        ))
    }

    async fn login(&self, headers: &RequestHeaders) -> Result<Identity, IdentityError> {
        let Some((username, password)) = headers.basic_credentials()? else {
            return Err(IdentityError::Unsigned);
        };

        let directory = self
            .directory
            .as_ref()
            .ok_or_else(|| {
                IdentityError::BackendUnavailable("no directory for logins".to_string())
            })?;

        let user = directory
            .user(&username)
            .await
            .map_err(|e| IdentityError::BackendUnavailable(e.to_string()))?
            .filter(|user| user.password_hash.is_some())
            .ok_or_else(|| IdentityError::NoSuchKey {
                identity: username.clone(),
            })?;

        if !verify_blocking(move || user.verify_password(&password)).await? {
            return Err(IdentityError::InvalidSecretKey { identity: username });
        }

        Ok(Identity::new(username, false))
    }

    async fn policy_for(&self, identity: &Identity) -> Result<PolicyDocument, ErrorCode> {
        self.backend
            .user_policies(
                &self.config.service.region,
                &self.config.service.service,
                &identity.id,
            )
            .await
            .map_err(|err| {
                debug!("Policy lookup for {} failed: {}", identity.id, err);
                match err {
                    BackendError::NoSuchKey { .. } => ErrorCode::NoSuchKey,
                    BackendError::Unavailable(_) => ErrorCode::BackendUnavailable,
                }
            })
    }

    async fn authorize_identity(
        &self,
        identity: &Identity,
        action: &str,
        resource: &str,
        context: Context,
    ) -> AuthorizationDecision {
        let policy = match self.policy_for(identity).await {
            Ok(policy) => policy,
            Err(code) => return AuthorizationDecision::denied(code),
        };

        let context = with_mfa(context, identity);
        if PolicyEngine::allow(&policy, action, resource, &context).is_allowed() {
            AuthorizationDecision::allowed(&identity.id)
        } else {
            AuthorizationDecision::denied(ErrorCode::NotPermitted)
        }
    }
}

fn with_mfa(mut context: Context, identity: &Identity) -> Context {
    context.insert("Mfa".to_string(), Value::Bool(identity.mfa));
    context
}

/// Run a password check off the async runtime
async fn verify_blocking<F>(check: F) -> Result<bool, IdentityError>
where
    F: FnOnce() -> bool + Send + 'static,
{
    tokio::task::spawn_blocking(check).await.map_err(|e| {
        warn!("Password check did not complete: {}", e);
        IdentityError::BackendUnavailable(format!("password check failed: {}", e))
    })
}

fn identity_denied(err: &IdentityError) -> AuthorizationDecision {
    debug!("Identity not resolved: {}", err);
    AuthorizationDecision::denied(err.code())
}

fn audit(
    mode: &str,
    action: &str,
    resource: &str,
    headers: &RequestHeaders,
    decision: &AuthorizationDecision,
) {
    info!(
        target: AUDIT,
        mode,
        action,
        resource,
        identity = decision.identity.as_deref().unwrap_or("-"),
        authorized = decision.authorized,
        error_code = decision.error_code.map(|code| code.as_str()).unwrap_or("-"),
        headers = ?headers,
        "authorization decision"
    );
}
