//! Authorization results as handed to the transport layer

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Machine-readable reason an authorization did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// No credential was presented
    UnsignedRequest,
    /// The credential names an unknown user or access key
    NoSuchKey,
    /// The credential's secret or signature is wrong
    InvalidSignature,
    /// A session token's CSRF binding is missing or wrong
    CsrfError,
    /// A login password is wrong
    InvalidSecretKey,
    /// Identity resolved, but policy did not allow the action
    NotPermitted,
    /// The credential backend could not answer and nothing was cached
    BackendUnavailable,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::UnsignedRequest => "UnsignedRequest",
            ErrorCode::NoSuchKey => "NoSuchKey",
            ErrorCode::InvalidSignature => "InvalidSignature",
            ErrorCode::CsrfError => "CsrfError",
            ErrorCode::InvalidSecretKey => "InvalidSecretKey",
            ErrorCode::NotPermitted => "NotPermitted",
            ErrorCode::BackendUnavailable => "BackendUnavailable",
        }
    }

    /// HTTP status the transport should answer with
    pub fn status(&self) -> u16 {
        match self {
            ErrorCode::NotPermitted => 403,
            ErrorCode::BackendUnavailable => 503,
            _ => 401,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single authorization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthorizationDecision {
    pub authorized: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl AuthorizationDecision {
    pub fn allowed(identity: impl Into<String>) -> Self {
        Self {
            authorized: true,
            identity: Some(identity.into()),
            error_code: None,
            status: None,
        }
    }

    pub fn denied(code: ErrorCode) -> Self {
        Self {
            authorized: false,
            identity: None,
            error_code: Some(code),
            status: Some(code.status()),
        }
    }
}

/// Outcome of authorizing several `(action, resource)` pairs at once
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchDecision {
    /// True only when every pair was permitted
    pub authorized: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,

    #[serde(default)]
    pub permitted: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub not_permitted: BTreeMap<String, Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl BatchDecision {
    /// Identity resolution failed before any pair was evaluated
    pub fn denied(code: ErrorCode) -> Self {
        Self {
            authorized: false,
            error_code: Some(code),
            status: Some(code.status()),
            ..Default::default()
        }
    }
}

/// Terminal failure of an internal authorization
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Authorization failed with status {status}: {code}")]
pub struct AuthorizationFailure {
    pub code: ErrorCode,
    pub status: u16,
    pub decision: AuthorizationDecision,
}

impl AuthorizationFailure {
    /// Build from a non-authorized decision
    pub fn from_decision(decision: AuthorizationDecision) -> Self {
        let code = decision.error_code.unwrap_or(ErrorCode::NotPermitted);
        Self {
            code,
            status: decision.status.unwrap_or_else(|| code.status()),
            decision,
        }
    }
}
