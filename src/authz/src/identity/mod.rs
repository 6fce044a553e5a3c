//! Turning request credentials into a verified identity
//!
//! An [`IdentityResolver`] asks each registered [`IdentityParser`] in turn.
//! A parser answers [`IdentityError::Unsigned`] when its credential type is
//! absent, which moves on to the next parser. Any other answer, success or
//! failure, ends resolution: a request that fails a session token check is
//! never retried as a basic credential.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

mod basic;
mod error;
mod headers;
mod token;

pub use basic::BasicAuthParser;
pub use error::IdentityError;
pub use headers::{basic_authorization, RequestHeaders};
pub use token::{BearerTokenParser, IssuedSession, SessionClaims, SessionIssuer};

/// A resolved principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    /// The credential path proved a second factor
    pub mfa: bool,
}

impl Identity {
    pub fn new(id: impl Into<String>, mfa: bool) -> Self {
        Self { id: id.into(), mfa }
    }
}

/// One credential mechanism
#[async_trait]
pub trait IdentityParser: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Resolve the identity, or [`IdentityError::Unsigned`] if this
    /// mechanism's credential is not present
    async fn identify(&self, headers: &RequestHeaders) -> Result<Identity, IdentityError>;
}

/// Ordered chain of identity parsers
#[derive(Clone, Default)]
pub struct IdentityResolver {
    parsers: Vec<Arc<dyn IdentityParser>>,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parser; earlier parsers take priority
    pub fn with_parser(mut self, parser: Arc<dyn IdentityParser>) -> Self {
        self.parsers.push(parser);
        self
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }

    /// Resolve the identity behind `headers`
    pub async fn identify(&self, headers: &RequestHeaders) -> Result<Identity, IdentityError> {
        for parser in &self.parsers {
            match parser.identify(headers).await {
                Err(IdentityError::Unsigned) => continue,
                Ok(identity) => {
                    debug!("{} resolved identity {}", parser.name(), identity.id);
                    return Ok(identity);
                }
                Err(err) => {
                    debug!("{} rejected credential: {}", parser.name(), err);
                    return Err(err);
                }
            }
        }

        Err(IdentityError::Unsigned)
    }
}
