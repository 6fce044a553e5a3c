//! Condition evaluation for policy statements
//!
//! Context key lookup is exact. A condition naming a key the request context
//! does not carry is not satisfied.

use ipnetwork::IpNetwork;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;
use std::net::IpAddr;

use super::document::{ConditionBlock, ConditionOperator};

/// Request context used for condition evaluation (`SourceIp`, `Mfa`, ...)
pub type Context = HashMap<String, Value>;

/// Textual form of a context value; strings as-is, scalars by their JSON text
pub fn context_text(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        Value::Bool(b) => Some(Cow::Owned(b.to_string())),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        _ => None,
    }
}

impl ConditionOperator {
    /// Evaluate this operator for a single `actual` (context) / `expected` (policy) pair
    pub fn evaluate(&self, actual: &str, expected: &str) -> bool {
        match self {
            ConditionOperator::StringEquals => actual == expected,
            ConditionOperator::StringNotEquals => actual != expected,
            ConditionOperator::IpAddress => ip_in_network(actual, expected).unwrap_or(false),
            ConditionOperator::NotIpAddress => ip_in_network(actual, expected)
                .map(|inside| !inside)
                .unwrap_or(false),
        }
    }
}

/// `None` when either side does not parse
fn ip_in_network(address: &str, cidr: &str) -> Option<bool> {
    let address: IpAddr = address.trim().parse().ok()?;
    let network: IpNetwork = cidr.trim().parse().ok()?;
    Some(network.contains(address))
}

/// Check every condition in a block against the context
pub fn conditions_match(block: &ConditionBlock, context: &Context) -> bool {
    block.iter().all(|(operator, entries)| {
        entries.iter().all(|(key, expected)| {
            let Some(actual) = context.get(key).and_then(context_text) else {
                return false;
            };
            operator.evaluate(&actual, expected)
        })
    })
}
