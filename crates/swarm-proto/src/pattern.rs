//! Suffix patterns for trigger routing.
//!
//! A pattern is matched against the end of a span name:
//! - `*.motion.open` matches `governance.motion.open` and `x.motion.open`
//! - `motion.open` matches any name ending in `motion.open`
//! - `*` matches every name
//!
//! The length of the literal suffix is the pattern's specificity; routing
//! prefers the longest matching suffix.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SuffixPattern {
    raw: String,
    suffix: String,
}

impl SuffixPattern {
    /// Parses a pattern. A `*` is only allowed as the leading character.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let suffix = raw.strip_prefix('*').unwrap_or(raw);
        if raw.is_empty() || suffix.contains('*') {
            return Err(Error::InvalidPattern(raw.to_string()));
        }
        Ok(Self {
            raw: raw.to_string(),
            suffix: suffix.to_string(),
        })
    }

    /// Returns true if `name` ends with this pattern's suffix.
    pub fn matches(&self, name: &str) -> bool {
        name.ends_with(&self.suffix)
    }

    /// Length of the literal suffix.
    pub fn specificity(&self) -> usize {
        self.suffix.len()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }
}

impl TryFrom<String> for SuffixPattern {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl TryFrom<&str> for SuffixPattern {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<SuffixPattern> for String {
    fn from(p: SuffixPattern) -> Self {
        p.raw
    }
}

impl fmt::Display for SuffixPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_wildcard() {
        let p = SuffixPattern::parse("*.motion.open").unwrap();
        assert!(p.matches("governance.motion.open"));
        assert!(p.matches("swarmsh.roberts.motion.open"));
        assert!(!p.matches("governance.motion.vote"));
        assert!(!p.matches("motion.open"));
        assert_eq!(p.specificity(), ".motion.open".len());
    }

    #[test]
    fn test_literal_suffix() {
        let p = SuffixPattern::parse("ping.request").unwrap();
        assert!(p.matches("swarmsh.ping.request"));
        assert!(p.matches("ping.request"));
        assert!(!p.matches("ping.response"));
    }

    #[test]
    fn test_global_wildcard_matches_all() {
        let p = SuffixPattern::parse("*").unwrap();
        assert!(p.matches("anything.at.all"));
        assert!(p.matches(""));
        assert_eq!(p.specificity(), 0);
    }

    #[test]
    fn test_rejects_inner_wildcards() {
        assert!(SuffixPattern::parse("task.*").is_err());
        assert!(SuffixPattern::parse("*.a.*").is_err());
        assert!(SuffixPattern::parse("").is_err());
    }

    #[test]
    fn test_serde_uses_raw_string() {
        let p: SuffixPattern = serde_json::from_str(r#""*.sprint.plan""#).unwrap();
        assert_eq!(p.suffix(), ".sprint.plan");
        assert_eq!(serde_json::to_string(&p).unwrap(), r#""*.sprint.plan""#);
        assert!(serde_json::from_str::<SuffixPattern>(r#""a.*""#).is_err());
    }
}
