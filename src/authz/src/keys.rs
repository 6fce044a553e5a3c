//! Scoped key derivation
//!
//! A master secret is folded through a chain of HMAC-SHA256 steps into a key
//! that is only valid for one `(protocol, region, service, date, identity)`
//! tuple:
//!
//! ```text
//! k0 = HMAC(master, identity)              (identity-bound protocols only)
//! k1 = HMAC(prefix || k0, "YYYYMMDD")
//! k2 = HMAC(k1, region)
//! k3 = HMAC(k2, service)
//! k  = HMAC(k3, protocol terminator)
//! ```
//!
//! The terminator differs per protocol, so a key minted for session tokens
//! never validates a basic credential for the same identity and day.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::NaiveDate;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::str::FromStr;

use crate::error::AuthzError;

type HmacSha256 = Hmac<Sha256>;

const COMPARE_KEY: &[u8] = b"warden-constant-time-compare";

/// Credential protocols that consume derived keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    /// Session tokens
    Jwt,
    /// Access key id + secret in an `Authorization: Basic` header
    BasicAuth,
    /// Request signing in the SigV4 family; not bound to an identity
    RequestSigning,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Jwt => "jwt",
            Protocol::BasicAuth => "basic-auth",
            Protocol::RequestSigning => "request-signing",
        }
    }

    fn prefix(&self) -> &'static [u8] {
        match self {
            Protocol::RequestSigning => b"AWS4",
            Protocol::Jwt | Protocol::BasicAuth => b"TINYAUTH",
        }
    }

    fn terminator(&self) -> &'static [u8] {
        match self {
            Protocol::Jwt => b"jwt_request",
            Protocol::BasicAuth => b"basic_auth_request",
            Protocol::RequestSigning => b"aws4_request",
        }
    }

    fn is_identity_bound(&self) -> bool {
        !matches!(self, Protocol::RequestSigning)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jwt" => Ok(Protocol::Jwt),
            "basic-auth" => Ok(Protocol::BasicAuth),
            "request-signing" => Ok(Protocol::RequestSigning),
            other => Err(AuthzError::Config(format!("unknown protocol '{}'", other))),
        }
    }
}

/// Derived secret bound to a [`KeyScope`]
#[derive(Clone, PartialEq, Eq)]
pub struct ScopedKey(Vec<u8>);

impl ScopedKey {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        ScopedKey(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    pub fn from_base64(encoded: &str) -> Result<Self, AuthzError> {
        STANDARD
            .decode(encoded)
            .map(ScopedKey)
            .map_err(|e| AuthzError::Internal(format!("invalid base64 key: {}", e)))
    }

    /// Constant-time comparison with a presented byte string
    pub fn matches(&self, other: &[u8]) -> bool {
        constant_time_eq(&self.0, other)
    }
}

impl fmt::Debug for ScopedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ScopedKey(** redacted **)")
    }
}

/// The tuple a derived key is valid for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyScope {
    pub protocol: Protocol,
    pub region: String,
    pub service: String,
    pub date: NaiveDate,
    pub identity: String,
}

impl KeyScope {
    pub fn new(
        protocol: Protocol,
        region: impl Into<String>,
        service: impl Into<String>,
        date: NaiveDate,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            protocol,
            region: region.into(),
            service: service.into(),
            date,
            identity: identity.into(),
        }
    }

    /// Derive the scoped key for this tuple from a master secret
    pub fn derive(&self, master_secret: &[u8]) -> ScopedKey {
        ScopedKey(self.final_step(master_secret).finalize().into_bytes().to_vec())
    }

    /// Check, in constant time, that `presented_secret` derives `expected`
    pub fn verify(&self, presented_secret: &[u8], expected: &ScopedKey) -> bool {
        self.final_step(presented_secret)
            .verify_slice(expected.as_bytes())
            .is_ok()
    }

    /// Every step but the last is materialized; the returned MAC already
    /// holds the terminator
    fn final_step(&self, master_secret: &[u8]) -> HmacSha256 {
        let mut key = master_secret.to_vec();
        if self.protocol.is_identity_bound() {
            key = sign(&key, self.identity.as_bytes());
        }

        let mut prefixed = self.protocol.prefix().to_vec();
        prefixed.extend_from_slice(&key);

        let date = self.date.format("%Y%m%d").to_string();
        let key = sign(&prefixed, date.as_bytes());
        let key = sign(&key, self.region.as_bytes());
        let key = sign(&key, self.service.as_bytes());

        let mut mac = new_mac(&key);
        mac.update(self.protocol.terminator());
        mac
    }
}

/// Derive a scoped key in one call
pub fn derive_key(
    protocol: Protocol,
    region: &str,
    service: &str,
    date: NaiveDate,
    identity: &str,
    master_secret: &[u8],
) -> ScopedKey {
    KeyScope::new(protocol, region, service, date, identity).derive(master_secret)
}

/// Compare two byte strings without an early exit on the first difference
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut left = new_mac(COMPARE_KEY);
    left.update(a);
    let mut right = new_mac(COMPARE_KEY);
    right.update(b);
    left.verify_slice(&right.finalize().into_bytes()).is_ok()
}

fn sign(key: &[u8], msg: &[u8]) -> Vec<u8> {
    let mut mac = new_mac(key);
    mac.update(msg);
    mac.finalize().into_bytes().to_vec()
}

fn new_mac(key: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 17).unwrap()
    }

    fn scope(protocol: Protocol) -> KeyScope {
        KeyScope::new(protocol, "eu-west-1", "rockets", date(), "charles")
    }

    #[test]
    fn test_deterministic() {
        let a = scope(Protocol::Jwt).derive(b"master");
        let b = scope(Protocol::Jwt).derive(b"master");
        assert_eq!(a, b);
        assert_eq!(a.as_bytes().len(), 32);
    }

    #[test]
    fn test_each_component_changes_output() {
        let base = scope(Protocol::BasicAuth);
        let reference = base.derive(b"master");

        let variants = vec![
            KeyScope { protocol: Protocol::Jwt, ..base.clone() },
            KeyScope { region: "us-east-1".into(), ..base.clone() },
            KeyScope { service: "boats".into(), ..base.clone() },
            KeyScope { date: date().succ_opt().unwrap(), ..base.clone() },
            KeyScope { identity: "bob".into(), ..base.clone() },
        ];

        for variant in variants {
            assert_ne!(variant.derive(b"master"), reference, "{:?}", variant);
        }
        assert_ne!(base.derive(b"other-master"), reference);
    }

    #[test]
    fn test_jwt_and_basic_auth_differ() {
        assert_ne!(
            scope(Protocol::Jwt).derive(b"master"),
            scope(Protocol::BasicAuth).derive(b"master")
        );
    }

    #[test]
    fn test_request_signing_ignores_identity() {
        let a = KeyScope::new(Protocol::RequestSigning, "r", "s", date(), "alice").derive(b"k");
        let b = KeyScope::new(Protocol::RequestSigning, "r", "s", date(), "bob").derive(b"k");
        assert_eq!(a, b);
    }

    #[test]
    fn test_request_signing_matches_sigv4_chain() {
        // AWS documentation example signing key
        let date = NaiveDate::from_ymd_opt(2012, 2, 15).unwrap();
        let key = KeyScope::new(Protocol::RequestSigning, "us-east-1", "iam", date, "")
            .derive(b"wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY");

        let hex: String = key.as_bytes().iter().map(|b| format!("{:02x}", b)).collect();
        assert_eq!(
            hex,
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_verify() {
        let scope = scope(Protocol::BasicAuth);
        let expected = scope.derive(b"keymaster");

        assert!(scope.verify(b"keymaster", &expected));
        assert!(!scope.verify(b"keymaster2", &expected));
        assert!(!scope.verify(b"", &expected));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_protocol_names() {
        for protocol in [Protocol::Jwt, Protocol::BasicAuth, Protocol::RequestSigning] {
            assert_eq!(protocol.as_str().parse::<Protocol>().unwrap(), protocol);
        }
        assert!("kerberos".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = scope(Protocol::Jwt).derive(b"master");
        assert_eq!(format!("{:?}", key), "ScopedKey(** redacted **)");
    }

    #[test]
    fn test_base64_roundtrip() {
        let key = scope(Protocol::Jwt).derive(b"master");
        assert_eq!(ScopedKey::from_base64(&key.to_base64()).unwrap(), key);
    }
}
