//! End-to-end authorization flows
//!
//! Directory -> scoped keys -> identity chain -> cached policy lookup ->
//! evaluation, with the backend taken down mid-run.

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use warden_authz::backend::{BackendError, BackendResult, ScopedCredential};
use warden_authz::clock::ManualClock;
use warden_authz::identity::basic_authorization;
use warden_authz::keys::KeyScope;
use warden_authz::policy::{Context, PolicyDocument};
use warden_authz::store::{AccessKeyRecord, InMemoryDirectory, UserRecord};
use warden_authz::{
    Authorizer, AuthorizerConfig, CachingBackend, ErrorCode, Expiring, LocalBackend,
    RequestHeaders, UncachedBackend,
};

const MASTER: &[u8] = b"master-signing-key";

fn allow_all() -> PolicyDocument {
    PolicyDocument::from_json(
        r#"{"Statement": [{"Action": "rockets:*", "Resource": "*", "Effect": "Allow"}]}"#,
    )
    .unwrap()
}

fn deny_all() -> PolicyDocument {
    PolicyDocument::from_json(
        r#"{"Statement": [{"Action": "rockets:*", "Resource": "*", "Effect": "Deny"}]}"#,
    )
    .unwrap()
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 17, 9, 0, 0).unwrap(),
    ))
}

fn config() -> AuthorizerConfig {
    AuthorizerConfig::from_toml_str(
        r#"
        [service]
        partition = "warden"
        region = "eu-west-1"
        service = "rockets"

        [keys]
        ttl_secs = 60
        "#,
    )
    .unwrap()
}

async fn directory() -> InMemoryDirectory {
    let directory = InMemoryDirectory::new();
    directory
        .put_user(UserRecord::new("charles").with_policy(allow_all()))
        .await;
    directory
        .put_access_key(AccessKeyRecord::new("AKIDEXAMPLE", "keymaster", "charles"))
        .await;
    directory
}

fn charles() -> RequestHeaders {
    RequestHeaders::new().with("Authorization", basic_authorization("AKIDEXAMPLE", "keymaster"))
}

/// Local backend that can be switched off
struct Flaky {
    inner: LocalBackend,
    down: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl Flaky {
    fn check(&self) -> BackendResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            Err(BackendError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl UncachedBackend for Flaky {
    async fn fetch_user_key(&self, scope: &KeyScope) -> BackendResult<Expiring<ScopedCredential>> {
        self.check()?;
        self.inner.fetch_user_key(scope).await
    }

    async fn fetch_access_key(
        &self,
        scope: &KeyScope,
    ) -> BackendResult<Expiring<ScopedCredential>> {
        self.check()?;
        self.inner.fetch_access_key(scope).await
    }

    async fn fetch_user_policies(
        &self,
        region: &str,
        service: &str,
        username: &str,
    ) -> BackendResult<Expiring<PolicyDocument>> {
        self.check()?;
        self.inner.fetch_user_policies(region, service, username).await
    }
}

struct Outage {
    authorizer: Authorizer,
    clock: Arc<ManualClock>,
    down: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

async fn outage_fixture() -> Outage {
    let config = config();
    let clock = clock();
    let down = Arc::new(AtomicBool::new(false));
    let calls = Arc::new(AtomicUsize::new(0));

    let flaky = Flaky {
        inner: LocalBackend::new(Arc::new(directory().await), MASTER)
            .with_ttl(config.keys.ttl())
            .with_clock(clock.clone()),
        down: down.clone(),
        calls: calls.clone(),
    };
    let backend = Arc::new(CachingBackend::with_clock(
        flaky,
        config.cache.clone(),
        clock.clone(),
    ));

    Outage {
        authorizer: Authorizer::with_clock(config, backend, clock.clone()),
        clock,
        down,
        calls,
    }
}

// ============================================================================
// END TO END
// ============================================================================

#[tokio::test]
async fn test_allow_then_deny_after_policy_change() {
    let clock = clock();
    let directory = Arc::new(directory().await);
    let authorizer = Authorizer::local(config(), directory.clone(), MASTER, clock.clone());
    let thrift = "arn:warden:rockets::/rockets/thrift";

    let decision = authorizer
        .external_authorize("rockets:Launch", thrift, &charles(), &Context::new())
        .await;
    assert_eq!(
        serde_json::to_value(&decision).unwrap(),
        json!({"Authorized": true, "Identity": "charles"})
    );

    directory
        .set_user_policies("charles", vec![deny_all()])
        .await
        .unwrap();

    // Cached policy still applies until its expiry
    let cached = authorizer
        .external_authorize("rockets:Launch", thrift, &charles(), &Context::new())
        .await;
    assert!(cached.authorized);

    clock.advance(Duration::seconds(61));

    let decision = authorizer
        .external_authorize("rockets:Launch", thrift, &charles(), &Context::new())
        .await;
    assert!(!decision.authorized);
    assert_eq!(decision.error_code, Some(ErrorCode::NotPermitted));
    assert_eq!(decision.status, Some(403));
}

#[tokio::test]
async fn test_internal_endpoint_uses_configured_namespace() {
    let clock = clock();
    let authorizer = Authorizer::local(config(), Arc::new(directory().await), MASTER, clock);
    let resource = authorizer.arns().resource("rockets", "thrift");

    let decision = authorizer
        .internal_authorize("Launch", &resource, &charles(), &Context::new())
        .await
        .unwrap();
    assert_eq!(decision.identity.as_deref(), Some("charles"));

    let failure = authorizer
        .internal_authorize("Launch", &resource, &RequestHeaders::new(), &Context::new())
        .await
        .unwrap_err();
    assert_eq!(failure.code, ErrorCode::UnsignedRequest);
    assert_eq!(failure.status, 401);
}

#[tokio::test]
async fn test_session_issued_by_authorizer_is_accepted() {
    let clock = clock();
    let authorizer = Authorizer::local(config(), Arc::new(directory().await), MASTER, clock);
    let session = authorizer.session_issuer().issue("charles", true).await.unwrap();

    let headers = RequestHeaders::new()
        .with("Cookie", format!("tinysess={}", session.token))
        .with("X-CSRF-Token", session.csrf_token.clone());

    let decision = authorizer
        .external_authorize("rockets:Launch", "r", &headers, &Context::new())
        .await;
    assert!(decision.authorized);
    assert_eq!(decision.identity.as_deref(), Some("charles"));
}

#[tokio::test]
async fn test_mfa_condition_follows_session_flag() {
    let clock = clock();
    let directory = directory().await;
    let mfa_only = PolicyDocument::from_json(
        r#"{"Statement": [{"Action": "rockets:Launch", "Resource": "*", "Effect": "Deny",
            "Condition": {"StringNotEquals": {"Mfa": "true"}}}]}"#,
    )
    .unwrap();
    directory
        .set_user_policies("charles", vec![allow_all(), mfa_only])
        .await
        .unwrap();
    let authorizer = Authorizer::local(config(), Arc::new(directory), MASTER, clock);
    let issuer = authorizer.session_issuer();

    for (mfa, expected) in [(true, true), (false, false)] {
        let session = issuer.issue("charles", mfa).await.unwrap();
        let headers = RequestHeaders::new()
            .with("Cookie", format!("tinysess={}", session.token))
            .with("X-CSRF-Token", session.csrf_token.clone());

        // Caller-supplied Mfa never overrides the session's
        let spoofed = Context::from([("Mfa".to_string(), json!(true))]);
        let decision = authorizer
            .external_authorize("rockets:Launch", "r", &headers, &spoofed)
            .await;
        assert_eq!(decision.authorized, expected, "mfa = {}", mfa);
    }
}

#[tokio::test]
async fn test_batch_against_one_identity() {
    let clock = clock();
    let directory = directory().await;
    directory
        .set_user_policies(
            "charles",
            vec![PolicyDocument::from_json(
                r#"{"Statement": [{"Action": "rockets:Get*", "Resource": "arn:warden:rockets::/rockets/*", "Effect": "Allow"}]}"#,
            )
            .unwrap()],
        )
        .await
        .unwrap();
    let authorizer = Authorizer::local(config(), Arc::new(directory), MASTER, clock);

    let permits = BTreeMap::from([
        (
            "rockets:GetRocket".to_string(),
            vec![
                "arn:warden:rockets::/rockets/thrift".to_string(),
                "arn:warden:rockets::/pads/lc39".to_string(),
            ],
        ),
        (
            "rockets:Launch".to_string(),
            vec!["arn:warden:rockets::/rockets/thrift".to_string()],
        ),
    ]);

    let decision = authorizer
        .batch_authorize(&permits, &charles(), &Context::new())
        .await;

    assert!(!decision.authorized);
    assert_eq!(decision.identity.as_deref(), Some("charles"));
    assert_eq!(
        decision.permitted["rockets:GetRocket"],
        vec!["arn:warden:rockets::/rockets/thrift"]
    );
    assert_eq!(
        decision.not_permitted["rockets:GetRocket"],
        vec!["arn:warden:rockets::/pads/lc39"]
    );
    assert_eq!(
        decision.not_permitted["rockets:Launch"],
        vec!["arn:warden:rockets::/rockets/thrift"]
    );
}

// ============================================================================
// BACKEND OUTAGE
// ============================================================================

#[tokio::test]
async fn test_outage_serves_last_known_credentials() {
    let f = outage_fixture().await;

    let first = f
        .authorizer
        .external_authorize("rockets:Launch", "r", &charles(), &Context::new())
        .await;
    assert!(first.authorized);

    f.down.store(true, Ordering::SeqCst);
    f.clock.advance(Duration::seconds(120));

    let during = f
        .authorizer
        .external_authorize("rockets:Launch", "r", &charles(), &Context::new())
        .await;
    assert!(during.authorized);
    assert_eq!(during.identity.as_deref(), Some("charles"));

    // Both lookups were retried against the backend before falling back
    assert_eq!(f.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_outage_without_cached_value() {
    let f = outage_fixture().await;
    f.down.store(true, Ordering::SeqCst);

    let decision = f
        .authorizer
        .external_authorize("rockets:Launch", "r", &charles(), &Context::new())
        .await;

    assert!(!decision.authorized);
    assert_eq!(decision.identity, None);
    assert_eq!(decision.error_code, Some(ErrorCode::BackendUnavailable));
    assert_eq!(decision.status, Some(503));
}

#[tokio::test]
async fn test_recovery_after_outage_refreshes() {
    let f = outage_fixture().await;

    f.authorizer
        .external_authorize("rockets:Launch", "r", &charles(), &Context::new())
        .await;

    f.down.store(true, Ordering::SeqCst);
    f.clock.advance(Duration::seconds(120));
    f.authorizer
        .external_authorize("rockets:Launch", "r", &charles(), &Context::new())
        .await;

    f.down.store(false, Ordering::SeqCst);
    let after = f
        .authorizer
        .external_authorize("rockets:Launch", "r", &charles(), &Context::new())
        .await;
    assert!(after.authorized);
    assert_eq!(f.calls.load(Ordering::SeqCst), 6);

    // Fresh again, so no further backend calls
    f.authorizer
        .external_authorize("rockets:Launch", "r", &charles(), &Context::new())
        .await;
    assert_eq!(f.calls.load(Ordering::SeqCst), 6);
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[tokio::test]
async fn test_config_file_drives_namespace_and_cookie() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("authz.toml");
    std::fs::write(
        &path,
        r#"
        [service]
        partition = "acme"
        region = "us-east-2"
        service = "rockets"

        [session]
        cookie_name = "acme-session"

        [cache]
        capacity = 16
        "#,
    )
    .unwrap();

    let config = AuthorizerConfig::load(&path).unwrap();
    assert_eq!(config.cache.capacity, 16);

    let authorizer = Authorizer::local(config, Arc::new(directory().await), MASTER, clock());
    assert_eq!(authorizer.arns().to_string(), "arn:acme:rockets::");

    let session = authorizer.session_issuer().issue("charles", false).await.unwrap();
    let headers = RequestHeaders::new()
        .with("Cookie", format!("acme-session={}", session.token))
        .with("X-CSRF-Token", session.csrf_token.clone());

    let decision = authorizer
        .internal_authorize("Launch", "r", &headers, &Context::new())
        .await;

    // Internal endpoints only accept access key credentials
    assert_eq!(decision.unwrap_err().code, ErrorCode::UnsignedRequest);

    let decision = authorizer
        .external_authorize("rockets:Launch", "r", &headers, &Context::new())
        .await;
    assert!(decision.authorized);
}
