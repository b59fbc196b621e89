//! Path-based access control
//!
//! A small SVN-authz style rule set: sections are path prefixes, entries
//! grant `r` or `rw` to a user, to `$authenticated`, or to everyone (`*`).
//! The deepest matching section wins. Read denials surface to the delta
//! reporter as absent entries rather than hard failures.

use crate::error::{Result, SvnError};
use crate::paths;
use crate::users::User;
use std::collections::BTreeMap;

/// Access level granted by a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccessLevel {
    None,
    Read,
    Write,
}

/// Rule subject
#[derive(Debug, Clone, PartialEq, Eq)]
enum Subject {
    Everyone,
    Authenticated,
    Named(String),
}

#[derive(Debug, Clone)]
struct Rule {
    subject: Subject,
    level: AccessLevel,
}

/// Per-repository access rules.
#[derive(Debug, Clone, Default)]
pub struct AccessRules {
    /// Path prefix → rules, deepest match wins
    sections: BTreeMap<String, Vec<Rule>>,
}

impl AccessRules {
    /// Everyone may read and write; the default when no rules are configured.
    pub fn allow_all() -> Self {
        let mut rules = Self::default();
        rules.add("", "*", AccessLevel::Write);
        rules
    }

    /// Authenticated users read and write, anonymous gets read-only.
    pub fn anonymous_read() -> Self {
        let mut rules = Self::default();
        rules.add("", "*", AccessLevel::Read);
        rules.add("", "$authenticated", AccessLevel::Write);
        rules
    }

    /// Authenticated users read and write, anonymous gets nothing.
    pub fn authenticated_only() -> Self {
        let mut rules = Self::default();
        rules.add("", "$authenticated", AccessLevel::Write);
        rules
    }

    /// Add one rule under a path prefix.
    pub fn add(&mut self, path: &str, subject: &str, level: AccessLevel) {
        let subject = match subject {
            "*" => Subject::Everyone,
            "$authenticated" => Subject::Authenticated,
            name => Subject::Named(name.to_string()),
        };
        self.sections
            .entry(paths::normalize(path))
            .or_default()
            .push(Rule { subject, level });
    }

    fn level_for(&self, user: &User, path: &str) -> AccessLevel {
        let path = paths::normalize(path);
        let mut best_prefix_len = None;
        let mut level = AccessLevel::None;
        for (prefix, rules) in &self.sections {
            if !paths::is_ancestor(prefix, &path) {
                continue;
            }
            // Deeper sections override shallower ones entirely.
            let depth = prefix.len();
            let section_level = rules
                .iter()
                .filter(|rule| match &rule.subject {
                    Subject::Everyone => true,
                    Subject::Authenticated => !user.is_anonymous(),
                    Subject::Named(name) => *name == user.username,
                })
                .map(|rule| rule.level)
                .max();
            if let Some(section_level) = section_level {
                if best_prefix_len.map_or(true, |len| depth >= len) {
                    best_prefix_len = Some(depth);
                    level = section_level;
                }
            }
        }
        level
    }

    pub fn can_read(&self, user: &User, path: &str) -> bool {
        self.level_for(user, path) >= AccessLevel::Read
    }

    pub fn can_write(&self, user: &User, path: &str) -> bool {
        self.level_for(user, path) >= AccessLevel::Write
    }

    pub fn check_read(&self, user: &User, path: &str) -> Result<()> {
        if self.can_read(user, path) {
            Ok(())
        } else {
            Err(SvnError::not_authorized(format!(
                "User {user} has no read access to /{path}"
            )))
        }
    }

    pub fn check_write(&self, user: &User, path: &str) -> Result<()> {
        if self.can_write(user, path) {
            Ok(())
        } else {
            Err(SvnError::not_authorized(format!(
                "User {user} has no write access to /{path}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_all() {
        let rules = AccessRules::allow_all();
        assert!(rules.can_write(&User::anonymous(), "any/path"));
    }

    #[test]
    fn test_anonymous_read() {
        let rules = AccessRules::anonymous_read();
        let anon = User::anonymous();
        let alice = User::new("alice", "Alice", None);
        assert!(rules.can_read(&anon, "trunk"));
        assert!(!rules.can_write(&anon, "trunk"));
        assert!(rules.can_write(&alice, "trunk"));
    }

    #[test]
    fn test_deeper_section_wins() {
        let mut rules = AccessRules::anonymous_read();
        rules.add("private", "$authenticated", AccessLevel::None);
        rules.add("private", "alice", AccessLevel::Write);
        let alice = User::new("alice", "Alice", None);
        let bob = User::new("bob", "Bob", None);
        assert!(rules.can_read(&alice, "private/keys"));
        assert!(!rules.can_read(&bob, "private/keys"));
        assert!(rules.can_read(&bob, "trunk"));
    }

    #[test]
    fn test_check_errors_carry_not_authorized() {
        let rules = AccessRules::authenticated_only();
        let err = rules.check_read(&User::anonymous(), "x").unwrap_err();
        assert_eq!(err.code, crate::error::codes::RA_NOT_AUTHORIZED);
    }
}
