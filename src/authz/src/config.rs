//! Authorizer configuration loading and validation
//!
//! ```toml
//! [service]
//! partition = "warden"
//! region = "eu-west-1"
//! service = "warden"
//!
//! [cache]
//! capacity = 1000
//!
//! [keys]
//! ttl_secs = 300
//!
//! [session]
//! cookie_name = "tinysess"
//! csrf_header = "X-CSRF-Token"
//!
//! [remote]
//! endpoint = "https://authz.internal"
//! access_key_id = "AKIDSERVICE"
//! secret_access_key = "..."
//! ```
//!
//! The master signing secret is never part of this file.

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::cache::CacheConfig;

/// Complete authorizer configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthorizerConfig {
    #[serde(default)]
    pub service: ServiceSection,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub keys: KeysSection,

    #[serde(default)]
    pub session: SessionSection,

    /// Delegate lookups to a remote authorization service
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
}

/// Naming and key scope of this service
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceSection {
    #[serde(default = "default_partition")]
    pub partition: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Also the namespace of internal actions (`<service>:<Action>`)
    #[serde(default = "default_service")]
    pub service: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeysSection {
    #[serde(default = "default_key_ttl")]
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionSection {
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "default_csrf_header")]
    pub csrf_header: String,
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
    #[serde(default)]
    pub leeway_secs: u64,
}

#[derive(Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default = "default_remote_timeout")]
    pub timeout_ms: u64,
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** NOT LOGGED **")
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

// Default value functions
fn default_partition() -> String { "warden".to_string() }
fn default_region() -> String { "default".to_string() }
fn default_service() -> String { "warden".to_string() }
fn default_key_ttl() -> u64 { 300 }
fn default_cookie_name() -> String { "tinysess".to_string() }
fn default_csrf_header() -> String { "X-CSRF-Token".to_string() }
fn default_session_ttl() -> u64 { 8 * 60 * 60 }
fn default_remote_timeout() -> u64 { 5000 }

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            partition: default_partition(),
            region: default_region(),
            service: default_service(),
        }
    }
}

impl Default for KeysSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_key_ttl(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            csrf_header: default_csrf_header(),
            ttl_secs: default_session_ttl(),
            leeway_secs: 0,
        }
    }
}

impl KeysSection {
    pub fn ttl(&self) -> Duration {
        Duration::seconds(self.ttl_secs as i64)
    }
}

impl SessionSection {
    pub fn ttl(&self) -> Duration {
        Duration::seconds(self.ttl_secs as i64)
    }
}

impl AuthorizerConfig {
    /// Load and validate configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AuthorizerConfig =
            toml::from_str(contents).context("Failed to parse configuration file")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("service.partition", &self.service.partition),
            ("service.region", &self.service.region),
            ("service.service", &self.service.service),
        ] {
            if value.is_empty() {
                anyhow::bail!("{} must not be empty", name);
            }
            if value.contains(':') || value.contains('/') {
                anyhow::bail!("{} must not contain ':' or '/'", name);
            }
        }

        if self.cache.capacity == 0 {
            anyhow::bail!("cache.capacity must be greater than 0");
        }

        if self.keys.ttl_secs == 0 {
            anyhow::bail!("keys.ttl_secs must be greater than 0");
        }

        if self.session.cookie_name.is_empty() || self.session.csrf_header.is_empty() {
            anyhow::bail!("session.cookie_name and session.csrf_header must be set");
        }

        if let Some(remote) = &self.remote {
            if !remote.endpoint.starts_with("http://") && !remote.endpoint.starts_with("https://") {
                anyhow::bail!("remote.endpoint must be an http(s) URL");
            }
            if remote.access_key_id.is_empty() {
                anyhow::bail!("remote.access_key_id must be set");
            }
        }

        Ok(())
    }
}
