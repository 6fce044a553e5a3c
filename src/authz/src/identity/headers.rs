//! Request headers as seen by the identity parsers

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::error::IdentityError;

const NOT_LOGGED: &str = "** NOT LOGGED **";
const SENSITIVE: [&str; 2] = ["authorization", "cookie"];

/// Ordered multimap of header names to values
///
/// Names compare case-insensitively. Serializes as a list of
/// `[name, value]` pairs. `Debug` output redacts credentials.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestHeaders {
    entries: Vec<(String, String)>,
}

impl RequestHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header, keeping any existing values for the same name
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// First value of `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Every value of `name`, in insertion order
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cookies from every `Cookie` header; later values win
    pub fn cookies(&self) -> HashMap<String, String> {
        self.get_all("Cookie")
            .flat_map(|header| header.split(';'))
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                let value = value.trim().trim_matches('"');
                Some((name.trim().to_string(), value.to_string()))
            })
            .collect()
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.cookies().remove(name)
    }

    /// Credentials from an `Authorization: Basic` header
    ///
    /// `Ok(None)` when there is no basic credential at all; an error when
    /// one is present but cannot be decoded.
    pub fn basic_credentials(&self) -> Result<Option<(String, String)>, IdentityError> {
        let Some(encoded) = self.authorization_param("Basic") else {
            return Ok(None);
        };

        let malformed = || IdentityError::InvalidSignature { identity: None };
        let decoded = STANDARD.decode(encoded.trim()).map_err(|_| malformed())?;
        let decoded = String::from_utf8(decoded).map_err(|_| malformed())?;
        let (username, secret) = decoded.split_once(':').ok_or_else(malformed)?;

        Ok(Some((username.to_string(), secret.to_string())))
    }

    /// Token from an `Authorization: Bearer` header
    pub fn bearer_token(&self) -> Option<&str> {
        self.authorization_param("Bearer")
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    fn authorization_param(&self, scheme: &str) -> Option<&str> {
        let header = self.get("Authorization")?;
        let (found, param) = header.split_once(' ')?;
        found.eq_ignore_ascii_case(scheme).then_some(param)
    }

    /// Headers safe to write to an audit trail
    pub fn redacted(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(name, value)| {
                let value = if is_sensitive(name) {
                    NOT_LOGGED.to_string()
                } else {
                    value.clone()
                };
                (name.clone(), value)
            })
            .collect()
    }
}

fn is_sensitive(name: &str) -> bool {
    SENSITIVE.iter().any(|s| s.eq_ignore_ascii_case(name))
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for RequestHeaders {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

impl fmt::Debug for RequestHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.redacted()).finish()
    }
}

/// `Authorization` header value for a basic credential
pub fn basic_authorization(username: &str, secret: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", username, secret)))
}
