//! Ordered detection rules and exclusion patterns

use crate::config::TrackerConfig;
use crate::error::{IdtraceError, Result};
use crate::models::IdType;
use regex::Regex;

/// A named detection rule compiled once at configuration time
#[derive(Debug, Clone)]
pub struct DetectionRule {
    pub name: String,
    pub id_type: IdType,
    regex: Regex,
    anchored: Regex,
}

impl DetectionRule {
    pub fn new(name: &str, pattern: &str) -> Result<Self> {
        let compile = |p: &str| {
            Regex::new(p).map_err(|source| IdtraceError::InvalidPattern {
                name: format!("patterns.{name}"),
                source,
            })
        };
        Ok(Self {
            name: name.to_string(),
            id_type: IdType::from_rule_name(name),
            regex: compile(pattern)?,
            anchored: compile(&format!("^(?:{pattern})$"))?,
        })
    }

    /// True when the rule matches the whole candidate
    pub fn matches_entire(&self, candidate: &str) -> bool {
        self.anchored.is_match(candidate)
    }
}

/// Outcome of classifying a single candidate value
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Detected(IdType),
    Excluded,
    NoMatch,
}

/// An accepted substring found by [`PatternMatcher::scan`]
#[derive(Debug, Clone, PartialEq)]
pub struct IdMatch {
    pub value: String,
    pub id_type: IdType,
    pub start: usize,
}

/// Applies detection rules in configuration order and vetoes exclusions
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    rules: Vec<DetectionRule>,
    exclusions: Vec<Regex>,
}

impl PatternMatcher {
    /// Compiles rules and exclusions, failing on the first invalid pattern
    pub fn new(patterns: &[(String, String)], exclude_patterns: &[String]) -> Result<Self> {
        let rules = patterns
            .iter()
            .map(|(name, pattern)| DetectionRule::new(name, pattern))
            .collect::<Result<Vec<_>>>()?;

        let exclusions = exclude_patterns
            .iter()
            .enumerate()
            .map(|(i, p)| {
                Regex::new(&format!("^(?:{p})$")).map_err(|source| {
                    IdtraceError::InvalidPattern {
                        name: format!("exclude_patterns[{i}]"),
                        source,
                    }
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { rules, exclusions })
    }

    pub fn from_config(config: &TrackerConfig) -> Result<Self> {
        Self::new(&config.patterns, &config.exclude_patterns)
    }

    /// True when an exclusion pattern matches the whole value
    pub fn is_excluded(&self, value: &str) -> bool {
        self.exclusions.iter().any(|re| re.is_match(value))
    }

    /// Classifies a whole value: first matching rule wins, exclusion vetoes it
    pub fn classify(&self, candidate: &str) -> MatchOutcome {
        match self.rules.iter().find(|r| r.matches_entire(candidate)) {
            Some(_) if self.is_excluded(candidate) => MatchOutcome::Excluded,
            Some(rule) => MatchOutcome::Detected(rule.id_type.clone()),
            None => MatchOutcome::NoMatch,
        }
    }

    /// Finds every accepted identifier substring in `text`.
    ///
    /// Rules run in order; a span claimed by an earlier rule cannot be claimed
    /// by a later one, even when the earlier match was excluded. Results are
    /// ordered by position.
    pub fn scan(&self, text: &str) -> Vec<IdMatch> {
        let mut claimed: Vec<(usize, usize)> = Vec::new();
        let mut found = Vec::new();

        for rule in &self.rules {
            for m in rule.regex.find_iter(text) {
                if m.as_str().is_empty() {
                    continue;
                }
                let overlaps = claimed
                    .iter()
                    .any(|&(start, end)| m.start() < end && start < m.end());
                if overlaps {
                    continue;
                }
                claimed.push((m.start(), m.end()));

                if self.is_excluded(m.as_str()) {
                    continue;
                }
                found.push(IdMatch {
                    value: m.as_str().to_string(),
                    id_type: rule.id_type.clone(),
                    start: m.start(),
                });
            }
        }

        found.sort_by_key(|m| m.start);
        found
    }
}
