//! Resource names of the form `arn:<partition>:<service>::/<class>/<name>`

use std::fmt;

/// Builds resource names for one partition and service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArnBuilder {
    partition: String,
    service: String,
}

impl ArnBuilder {
    pub fn new(partition: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            service: service.into(),
        }
    }

    /// ```
    /// use warden_authz::ArnBuilder;
    ///
    /// let arns = ArnBuilder::new("warden", "warden");
    /// assert_eq!(arns.resource("users", "charles"), "arn:warden:warden::/users/charles");
    /// ```
    pub fn resource(&self, class: &str, name: &str) -> String {
        format!("{}/{}/{}", self, class, name)
    }

    /// Resource name for a whole class, e.g. for listing endpoints
    pub fn class(&self, class: &str) -> String {
        format!("{}/{}/", self, class)
    }

    /// Glob matching every resource of a class
    pub fn class_pattern(&self, class: &str) -> String {
        format!("{}/{}/*", self, class)
    }
}

impl fmt::Display for ArnBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "arn:{}:{}::", self.partition, self.service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PatternMatcher;

    #[test]
    fn test_resource_format() {
        let arns = ArnBuilder::new("acme", "rockets");
        assert_eq!(arns.resource("launchpads", "thrift"), "arn:acme:rockets::/launchpads/thrift");
        assert_eq!(arns.class("launchpads"), "arn:acme:rockets::/launchpads/");
        assert_eq!(arns.to_string(), "arn:acme:rockets::");
    }

    #[test]
    fn test_class_pattern_matches_members_only() {
        let arns = ArnBuilder::new("acme", "rockets");
        let pattern = arns.class_pattern("launchpads");

        assert!(PatternMatcher::matches(&pattern, &arns.resource("launchpads", "thrift")));
        assert!(!PatternMatcher::matches(&pattern, &arns.resource("engines", "thrift")));
    }
}
