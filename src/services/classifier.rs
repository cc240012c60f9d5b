// src/services/classifier.rs

//! Failure cause classification.
//!
//! Patterns are compiled once and evaluated in a fixed order; the first match
//! wins and unmatched logs fall back to [`FALLBACK_CAUSE`].

use regex::Regex;

use crate::error::{AppError, Result};
use crate::models::{CausePattern, FALLBACK_CAUSE, builtin_patterns, merge_layers};

/// A compiled cause pattern.
#[derive(Debug, Clone)]
pub struct CauseRule {
    pub cause: String,
    pub matcher: Regex,
}

impl CauseRule {
    /// Compile a pattern. Literal patterns match as plain substrings.
    pub fn compile(pattern: &CausePattern) -> Result<Self> {
        if pattern.pattern.is_empty() {
            return Err(AppError::pattern(&pattern.cause, "pattern is empty"));
        }
        let source = if pattern.regex {
            pattern.pattern.clone()
        } else {
            regex::escape(&pattern.pattern)
        };
        let matcher = Regex::new(&source).map_err(|e| AppError::pattern(&pattern.pattern, e))?;
        Ok(Self {
            cause: pattern.cause.clone(),
            matcher,
        })
    }

    pub fn is_match(&self, content: &str) -> bool {
        self.matcher.is_match(content)
    }
}

/// Ordered, first-match cause classifier.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<CauseRule>,
}

impl Classifier {
    /// Compile patterns, keeping the given evaluation order.
    pub fn new(patterns: &[CausePattern]) -> Result<Self> {
        let rules = patterns
            .iter()
            .map(CauseRule::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Built-in patterns layered under the given overrides.
    pub fn layered(overrides: Vec<CausePattern>) -> Result<Self> {
        Self::new(&merge_layers(overrides, builtin_patterns()))
    }

    /// Label of the first matching rule, or [`FALLBACK_CAUSE`].
    pub fn classify(&self, content: &str) -> &str {
        self.rules
            .iter()
            .find(|rule| rule.is_match(content))
            .map_or(FALLBACK_CAUSE, |rule| rule.cause.as_str())
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[CauseRule] {
        &self.rules
    }
}

impl Default for Classifier {
    fn default() -> Self {
        let rules = merge_layers(Vec::new(), builtin_patterns())
            .iter()
            .filter_map(|p| CauseRule::compile(p).ok())
            .collect();
        Self { rules }
    }
}
