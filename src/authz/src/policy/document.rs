//! Policy document structure
//!
//! Documents follow the familiar IAM layout:
//!
//! ```json
//! {
//!   "Version": "2012-10-17",
//!   "Statement": [{
//!     "Effect": "Allow",
//!     "Action": "svc:*",
//!     "Resource": ["arn:aws:svc::/instances/*"],
//!     "Condition": {"IpAddress": {"SourceIp": "10.0.0.0/8"}}
//!   }]
//! }
//! ```
//!
//! `Action` and `Resource` accept a single string or a list. A statement without
//! them matches nothing.

use ipnetwork::IpNetwork;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use super::pattern::PatternMatcher;
use crate::error::{AuthzError, Result};

/// Effect of a policy statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// Allow the action
    Allow,
    /// Deny the action (takes precedence over Allow)
    Deny,
}

/// Condition operators understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConditionOperator {
    /// Context address lies inside the CIDR block
    IpAddress,
    /// Context address lies outside the CIDR block
    NotIpAddress,
    /// Exact, case-sensitive string match
    StringEquals,
    /// Negated exact string match
    StringNotEquals,
}

/// `{operator: {contextKey: expectedValue}}`
pub type ConditionBlock = BTreeMap<ConditionOperator, BTreeMap<String, String>>;

/// A single allow/deny rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    /// Statement ID (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    /// Effect of this statement
    pub effect: Effect,

    /// Action glob patterns
    #[serde(default, deserialize_with = "one_or_many")]
    pub action: Vec<String>,

    /// Resource glob patterns
    #[serde(default, deserialize_with = "one_or_many")]
    pub resource: Vec<String>,

    /// Conditions that must all hold for the statement to participate
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub condition: ConditionBlock,
}

impl Statement {
    /// Create a statement without conditions
    pub fn new(effect: Effect, action: Vec<String>, resource: Vec<String>) -> Self {
        Statement {
            sid: None,
            effect,
            action,
            resource,
            condition: ConditionBlock::new(),
        }
    }

    /// Attach a condition `operator: {key: value}`
    pub fn with_condition(
        mut self,
        operator: ConditionOperator,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.condition
            .entry(operator)
            .or_default()
            .insert(key.into(), value.into());
        self
    }

    /// Check if any action pattern matches
    pub fn matches_action(&self, action: &str) -> bool {
        self.action
            .iter()
            .any(|pattern| PatternMatcher::matches(pattern, action))
    }

    /// Check if any resource pattern matches
    pub fn matches_resource(&self, resource: &str) -> bool {
        self.resource
            .iter()
            .any(|pattern| PatternMatcher::matches(pattern, resource))
    }

    fn validate(&self, index: usize) -> Result<()> {
        for (operator, entries) in &self.condition {
            if !matches!(
                operator,
                ConditionOperator::IpAddress | ConditionOperator::NotIpAddress
            ) {
                continue;
            }
            for (key, cidr) in entries {
                cidr.parse::<IpNetwork>().map_err(|e| {
                    AuthzError::InvalidPolicy(format!(
                        "statement {}: {:?} condition on '{}' has invalid CIDR '{}': {}",
                        index, operator, key, cidr, e
                    ))
                })?;
            }
        }
        Ok(())
    }
}

/// Complete policy document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    /// Policy language version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Statements in document order
    #[serde(default)]
    pub statement: Vec<Statement>,
}

impl PolicyDocument {
    /// Create an empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON policy document
    pub fn from_json(json: &str) -> Result<Self> {
        let document: PolicyDocument =
            serde_json::from_str(json).map_err(|e| AuthzError::InvalidPolicy(e.to_string()))?;
        document.validate()?;
        Ok(document)
    }

    /// Convert and validate an already parsed JSON value
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let document: PolicyDocument =
            serde_json::from_value(value).map_err(|e| AuthzError::InvalidPolicy(e.to_string()))?;
        document.validate()?;
        Ok(document)
    }

    /// Add a statement
    pub fn add_statement(&mut self, statement: Statement) {
        self.statement.push(statement);
    }

    /// Builder form of [`add_statement`](Self::add_statement)
    pub fn with_statement(mut self, statement: Statement) -> Self {
        self.add_statement(statement);
        self
    }

    /// Concatenate the statements of several documents, preserving order
    pub fn merged<'a>(documents: impl IntoIterator<Item = &'a PolicyDocument>) -> Self {
        let statement = documents
            .into_iter()
            .flat_map(|doc| doc.statement.iter().cloned())
            .collect();
        PolicyDocument {
            version: None,
            statement,
        }
    }

    /// Check load-time invariants that serde cannot express
    pub fn validate(&self) -> Result<()> {
        self.statement
            .iter()
            .enumerate()
            .try_for_each(|(index, statement)| statement.validate(index))
    }
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}
