//! Rate limit tiers and the path rules that select them.
//!
//! Rules are plain data loaded from configuration. They are compiled once at
//! startup into an ordered list of matchers and evaluated top to bottom; the
//! first match wins and anything unmatched falls back to [`LimitTier::Normal`].

use crate::error::{AdmissionError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Named rate limit policy applied to a class of routes
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
#[serde(rename_all = "kebab-case")]
pub enum LimitTier {
    Strict,
    #[default]
    Normal,
    Relaxed,
    AdminExempt,
}

impl LimitTier {
    pub const ALL: [LimitTier; 4] = [
        LimitTier::Strict,
        LimitTier::Normal,
        LimitTier::Relaxed,
        LimitTier::AdminExempt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LimitTier::Strict => "strict",
            LimitTier::Normal => "normal",
            LimitTier::Relaxed => "relaxed",
            LimitTier::AdminExempt => "admin-exempt",
        }
    }

    /// Quota used when configuration does not override the tier
    pub fn default_config(&self) -> TierConfig {
        let max_requests = match self {
            LimitTier::Strict => 10,
            LimitTier::Normal => 100,
            LimitTier::Relaxed => 300,
            LimitTier::AdminExempt => 10_000,
        };

        TierConfig {
            window_ms: 60_000,
            max_requests,
        }
    }
}

impl fmt::Display for LimitTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LimitTier {
    type Err = AdmissionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(LimitTier::Strict),
            "normal" => Ok(LimitTier::Normal),
            "relaxed" => Ok(LimitTier::Relaxed),
            "admin-exempt" | "admin_exempt" => Ok(LimitTier::AdminExempt),
            _ => Err(AdmissionError::InvalidTier(s.to_string())),
        }
    }
}

/// Window length and quota of a tier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierConfig {
    /// Length of one fixed window in milliseconds
    pub window_ms: u64,
    /// Requests admitted per window
    pub max_requests: u64,
}

impl TierConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// One `(pattern, tier)` entry of the rule table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierRule {
    /// Path prefix, or a glob when it contains `*`
    pub pattern: String,
    pub tier: LimitTier,
}

#[derive(Debug, Clone)]
enum PathMatcher {
    Prefix(String),
    Glob(Regex),
}

impl PathMatcher {
    fn compile(pattern: &str) -> Result<Self> {
        if !pattern.contains('*') {
            return Ok(PathMatcher::Prefix(pattern.to_string()));
        }

        let regex = Regex::new(&glob_to_regex(pattern)).map_err(|e| {
            AdmissionError::Config(format!("Invalid rule pattern '{}': {}", pattern, e))
        })?;
        Ok(PathMatcher::Glob(regex))
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            PathMatcher::Prefix(prefix) => path.starts_with(prefix.as_str()),
            PathMatcher::Glob(regex) => regex.is_match(path),
        }
    }
}

/// Translate a path glob into an anchored regex.
///
/// `**` crosses segment boundaries, `*` stays inside one segment.
fn glob_to_regex(pattern: &str) -> String {
    let mut result = String::from("^");
    let mut chars = pattern.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    result.push_str(".*");
                } else {
                    result.push_str("[^/]*");
                }
            }
            _ => result.push_str(&regex::escape(&ch.to_string())),
        }
    }

    result.push('$');
    result
}

/// Maps a request path to exactly one tier
#[derive(Debug, Clone)]
pub struct TierSelector {
    rules: Vec<(PathMatcher, LimitTier)>,
    default_tier: LimitTier,
}

impl TierSelector {
    /// Compile the rule table in order
    pub fn new(rules: &[TierRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| Ok((PathMatcher::compile(&rule.pattern)?, rule.tier)))
            .collect::<Result<Vec<_>>>()?;

        debug!(rules = rules.len(), "Compiled tier rules");

        Ok(Self {
            rules,
            default_tier: LimitTier::default(),
        })
    }

    pub fn select_tier(&self, path: &str) -> LimitTier {
        self.rules
            .iter()
            .find(|(matcher, _)| matcher.matches(path))
            .map(|(_, tier)| *tier)
            .unwrap_or(self.default_tier)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str, tier: LimitTier) -> TierRule {
        TierRule {
            pattern: pattern.to_string(),
            tier,
        }
    }

    fn test_selector() -> TierSelector {
        TierSelector::new(&[
            rule("/admin/", LimitTier::AdminExempt),
            rule("/api/auth/login", LimitTier::Strict),
            rule("/api/*/messages", LimitTier::Strict),
            rule("/static/**", LimitTier::Relaxed),
            rule("/api/", LimitTier::Normal),
        ])
        .unwrap()
    }

    #[test]
    fn test_prefix_match() {
        let selector = test_selector();
        assert_eq!(selector.select_tier("/admin/rate-limit"), LimitTier::AdminExempt);
        assert_eq!(selector.select_tier("/api/auth/login"), LimitTier::Strict);
        assert_eq!(selector.select_tier("/api/cities"), LimitTier::Normal);
    }

    #[test]
    fn test_glob_single_segment() {
        let selector = test_selector();
        assert_eq!(selector.select_tier("/api/forum/messages"), LimitTier::Strict);
        // `*` does not cross a slash
        assert_eq!(selector.select_tier("/api/forum/x/messages"), LimitTier::Normal);
    }

    #[test]
    fn test_glob_double_star() {
        let selector = test_selector();
        assert_eq!(selector.select_tier("/static/css/site.css"), LimitTier::Relaxed);
    }

    #[test]
    fn test_first_match_wins() {
        let selector = TierSelector::new(&[
            rule("/api/", LimitTier::Relaxed),
            rule("/api/auth/", LimitTier::Strict),
        ])
        .unwrap();

        assert_eq!(selector.select_tier("/api/auth/login"), LimitTier::Relaxed);
    }

    #[test]
    fn test_default_tier() {
        let selector = test_selector();
        assert_eq!(selector.select_tier("/"), LimitTier::Normal);
        assert_eq!(selector.select_tier("/guides/paris"), LimitTier::Normal);

        let empty = TierSelector::new(&[]).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.select_tier("/anything"), LimitTier::Normal);
    }

    #[test]
    fn test_glob_escapes_regex_metacharacters() {
        let selector = TierSelector::new(&[rule("/v1.0/*", LimitTier::Strict)]).unwrap();
        assert_eq!(selector.select_tier("/v1.0/users"), LimitTier::Strict);
        assert_eq!(selector.select_tier("/v100/users"), LimitTier::Normal);
    }

    #[test]
    fn test_tier_parsing() {
        assert_eq!("strict".parse::<LimitTier>().unwrap(), LimitTier::Strict);
        assert_eq!("Admin-Exempt".parse::<LimitTier>().unwrap(), LimitTier::AdminExempt);
        assert!("bogus".parse::<LimitTier>().is_err());
        assert_eq!(LimitTier::AdminExempt.to_string(), "admin-exempt");
    }

    #[test]
    fn test_default_tier_configs() {
        assert_eq!(LimitTier::Strict.default_config().max_requests, 10);
        assert_eq!(LimitTier::Normal.default_config().max_requests, 100);
        assert_eq!(
            LimitTier::Normal.default_config().window(),
            Duration::from_secs(60)
        );
    }
}
