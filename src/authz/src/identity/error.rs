//! Identity resolution errors

use thiserror::Error;

use crate::backend::BackendError;
use crate::decision::ErrorCode;

/// Why a request could not be tied to an identity
///
/// [`IdentityError::Unsigned`] is the only variant that lets the resolver
/// try the next parser; every other variant is final.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// This parser's credential type is absent from the request
    #[error("Request is not signed")]
    Unsigned,

    #[error("No such key: {identity}")]
    NoSuchKey { identity: String },

    #[error("Invalid signature")]
    InvalidSignature { identity: Option<String> },

    #[error("CSRF token missing or mismatched for {identity}")]
    CsrfError { identity: String },

    /// Login password did not verify
    #[error("Invalid secret key for {identity}")]
    InvalidSecretKey { identity: String },

    #[error("Credential backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl IdentityError {
    pub fn invalid_signature(identity: impl Into<String>) -> Self {
        IdentityError::InvalidSignature {
            identity: Some(identity.into()),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            IdentityError::Unsigned => ErrorCode::UnsignedRequest,
            IdentityError::NoSuchKey { .. } => ErrorCode::NoSuchKey,
            IdentityError::InvalidSignature { .. } => ErrorCode::InvalidSignature,
            IdentityError::CsrfError { .. } => ErrorCode::CsrfError,
            IdentityError::InvalidSecretKey { .. } => ErrorCode::InvalidSecretKey,
            IdentityError::BackendUnavailable(_) => ErrorCode::BackendUnavailable,
        }
    }

    /// The identity the failed credential claimed, when known
    pub fn identity(&self) -> Option<&str> {
        match self {
            IdentityError::NoSuchKey { identity }
            | IdentityError::CsrfError { identity }
            | IdentityError::InvalidSecretKey { identity } => Some(identity),
            IdentityError::InvalidSignature { identity } => identity.as_deref(),
            IdentityError::Unsigned | IdentityError::BackendUnavailable(_) => None,
        }
    }
}

impl From<BackendError> for IdentityError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NoSuchKey { identity } => IdentityError::NoSuchKey { identity },
            BackendError::Unavailable(reason) => IdentityError::BackendUnavailable(reason),
        }
    }
}
