//! IAM-style policy documents and their evaluation
//!
//! Provides:
//! - JSON policy documents validated at load time
//! - Allow/Deny statements with explicit deny precedence
//! - `*`/`?` glob matching for actions and resources
//! - `IpAddress`, `NotIpAddress`, `StringEquals`, `StringNotEquals` conditions

mod condition;
mod document;
mod engine;
mod pattern;

pub use condition::{conditions_match, context_text, Context};
pub use document::{ConditionBlock, ConditionOperator, Effect, PolicyDocument, Statement};
pub use engine::{AllowedResources, Evaluation, PolicyEngine};
pub use pattern::PatternMatcher;
