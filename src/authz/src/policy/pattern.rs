//! Glob matching for actions and resources
//!
//! Supports wildcards:
//! - `*` - Matches any run of characters, including `:` and `/`
//! - `?` - Matches exactly one character
//!
//! Matching is case-sensitive and anchored at both ends.

use wildmatch::WildMatch;

/// Pattern matcher for action and resource names
pub struct PatternMatcher;

impl PatternMatcher {
    /// Check if a name matches a glob pattern
    ///
    /// # Examples
    /// ```
    /// use warden_authz::policy::PatternMatcher;
    ///
    /// assert!(PatternMatcher::matches("svc:*", "svc:List"));
    /// assert!(PatternMatcher::matches("arn::svc:::instances/foo_?", "arn::svc:::instances/foo_1"));
    /// assert!(!PatternMatcher::matches("svc:*", "other:List"));
    /// ```
    pub fn matches(pattern: &str, name: &str) -> bool {
        if pattern == "*" {
            return true;
        }

        if !pattern.contains(|c: char| c == '*' || c == '?') {
            return pattern == name;
        }

        WildMatch::new(pattern).matches(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(PatternMatcher::matches("svc:List", "svc:List"));
        assert!(!PatternMatcher::matches("svc:List", "svc:Launch"));
    }

    #[test]
    fn test_case_sensitive() {
        assert!(!PatternMatcher::matches("svc:list", "svc:List"));
        assert!(!PatternMatcher::matches("SVC:*", "svc:List"));
    }

    #[test]
    fn test_star_crosses_separators() {
        assert!(PatternMatcher::matches("arn:*", "arn:tinyauth:users/charles"));
        assert!(PatternMatcher::matches(
            "arn::svc:::instances/foo_*",
            "arn::svc:::instances/foo_bar_1"
        ));
        assert!(!PatternMatcher::matches(
            "arn::svc:::instances/foo_*",
            "arn::svc:::bar_1"
        ));
    }

    #[test]
    fn test_question_mark_is_single_char() {
        assert!(PatternMatcher::matches("svc:Get?", "svc:GetX"));
        assert!(!PatternMatcher::matches("svc:Get?", "svc:Get"));
        assert!(!PatternMatcher::matches("svc:Get?", "svc:GetXY"));
    }

    #[test]
    fn test_match_all() {
        assert!(PatternMatcher::matches("*", ""));
        assert!(PatternMatcher::matches("*", "anything:at/all"));
    }

    #[test]
    fn test_empty_pattern_matches_only_empty() {
        assert!(PatternMatcher::matches("", ""));
        assert!(!PatternMatcher::matches("", "svc:List"));
    }
}
