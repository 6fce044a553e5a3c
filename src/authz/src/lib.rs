//! # Warden Authorization Core
//!
//! Answers "may this caller perform action A on resource R?" for its own
//! endpoints and, as an oracle, for other services.
//!
//! ## Features
//!
//! - **IAM-style policies** with `*`/`?` globs, explicit deny precedence and
//!   `IpAddress`/`StringEquals` style conditions
//! - **Identity chain** over session tokens and access key credentials
//! - **Scoped signing keys** derived per protocol, region, service, day and
//!   identity with HMAC-SHA256
//! - **Resilient caching** of backend lookups that serves the last known
//!   value while the backend is down
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use warden_authz::clock::SystemClock;
//! use warden_authz::identity::basic_authorization;
//! use warden_authz::policy::{Context, PolicyDocument};
//! use warden_authz::store::{AccessKeyRecord, InMemoryDirectory, UserRecord};
//! use warden_authz::{Authorizer, AuthorizerConfig, RequestHeaders};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let policy = PolicyDocument::from_json(
//!         r#"{"Statement": [{"Action": "svc:*", "Resource": "*", "Effect": "Allow"}]}"#,
//!     )?;
//!
//!     let directory = InMemoryDirectory::new();
//!     directory.put_user(UserRecord::new("charles").with_policy(policy)).await;
//!     directory
//!         .put_access_key(AccessKeyRecord::new("AKIDEXAMPLE", "keymaster", "charles"))
//!         .await;
//!
//!     let authorizer = Authorizer::local(
//!         AuthorizerConfig::default(),
//!         Arc::new(directory),
//!         b"master-secret".to_vec(),
//!         Arc::new(SystemClock),
//!     );
//!
//!     let headers = RequestHeaders::new()
//!         .with("Authorization", basic_authorization("AKIDEXAMPLE", "keymaster"));
//!     let decision = authorizer
//!         .external_authorize("svc:Launch", "arn:svc:rockets/thrift", &headers, &Context::new())
//!         .await;
//!
//!     assert!(decision.authorized);
//!     assert_eq!(decision.identity.as_deref(), Some("charles"));
//!     Ok(())
//! }
//! ```

pub mod arn;
pub mod authorizer;
pub mod backend;
pub mod cache;
pub mod clock;
pub mod config;
pub mod decision;
pub mod error;
pub mod identity;
pub mod keys;
pub mod policy;
pub mod store;

// Re-export commonly used types
pub use arn::ArnBuilder;
pub use authorizer::Authorizer;
pub use backend::{BackendError, CachingBackend, CredentialBackend, LocalBackend, UncachedBackend};
pub use cache::{CacheConfig, CacheStats, Expiring, ResilientCache};
pub use config::AuthorizerConfig;
pub use decision::{AuthorizationDecision, AuthorizationFailure, BatchDecision, ErrorCode};
pub use error::{AuthzError, Result};
pub use identity::{Identity, IdentityError, IdentityResolver, RequestHeaders};
pub use keys::{derive_key, KeyScope, Protocol, ScopedKey};
pub use policy::{Evaluation, PolicyDocument, PolicyEngine};

#[cfg(feature = "remote")]
pub use backend::HttpBackend;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
