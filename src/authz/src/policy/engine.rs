//! Policy evaluation with deny precedence
//!
//! Evaluation walks statements in document order. A statement participates
//! when its action patterns, resource patterns and conditions all match.
//! Any participating `Deny` ends evaluation with [`Evaluation::Deny`]; otherwise
//! a participating `Allow` yields [`Evaluation::Allow`], and no participation at
//! all yields [`Evaluation::Default`].

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::condition::{conditions_match, Context};
use super::document::{Effect, PolicyDocument};

/// Outcome of evaluating a policy document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Evaluation {
    /// At least one statement allowed and none denied
    Allow,
    /// A statement explicitly denied
    Deny,
    /// No statement participated
    Default,
}

impl Evaluation {
    /// Only an explicit `Allow` permits
    pub fn is_allowed(&self) -> bool {
        matches!(self, Evaluation::Allow)
    }
}

/// Resource patterns partitioned by effect
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedResources {
    pub allowed: Vec<String>,
    pub denied: Vec<String>,
}

/// Stateless policy evaluator
pub struct PolicyEngine;

impl PolicyEngine {
    /// Evaluate whether `action` on `resource` is allowed by `policy`
    ///
    /// # Examples
    ///
    /// ```
    /// use warden_authz::policy::{Effect, Evaluation, PolicyDocument, PolicyEngine, Statement};
    ///
    /// let policy = PolicyDocument::new().with_statement(Statement::new(
    ///     Effect::Allow,
    ///     vec!["svc:*".to_string()],
    ///     vec!["arn::svc:::instances/foo_*".to_string()],
    /// ));
    ///
    /// let ctx = Default::default();
    /// assert_eq!(
    ///     PolicyEngine::allow(&policy, "svc:List", "arn::svc:::instances/foo_1", &ctx),
    ///     Evaluation::Allow
    /// );
    /// assert_eq!(
    ///     PolicyEngine::allow(&policy, "svc:List", "arn::svc:::bar_1", &ctx),
    ///     Evaluation::Default
    /// );
    /// ```
    pub fn allow(
        policy: &PolicyDocument,
        action: &str,
        resource: &str,
        context: &Context,
    ) -> Evaluation {
        let mut result = Evaluation::Default;

        for (index, statement) in policy.statement.iter().enumerate() {
            if !statement.matches_action(action) {
                continue;
            }
            if !statement.matches_resource(resource) {
                continue;
            }
            if !conditions_match(&statement.condition, context) {
                continue;
            }

            match statement.effect {
                Effect::Deny => {
                    debug!("Statement {} denies {} on {}", index, action, resource);
                    return Evaluation::Deny;
                }
                Effect::Allow => result = Evaluation::Allow,
            }
        }

        result
    }

    /// Partition the resource patterns of every statement matching `action`
    /// and `context` into allowed and denied lists
    pub fn allowed_resources(
        policy: &PolicyDocument,
        action: &str,
        context: &Context,
    ) -> AllowedResources {
        let mut resources = AllowedResources::default();

        for statement in &policy.statement {
            if !statement.matches_action(action) {
                continue;
            }
            if !conditions_match(&statement.condition, context) {
                continue;
            }

            let bucket = match statement.effect {
                Effect::Deny => &mut resources.denied,
                Effect::Allow => &mut resources.allowed,
            };
            bucket.extend(statement.resource.iter().cloned());
        }

        resources
    }
}
