//! Cause pattern definitions and layering.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Label assigned when no pattern matches.
pub const FALLBACK_CAUSE: &str = "other";

/// A named rule mapping log text to a cause label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CausePattern {
    /// Cause label, also the rule's name
    pub cause: String,

    /// Text searched for in the log
    pub pattern: String,

    /// Treat `pattern` as a regular expression instead of a literal substring
    #[serde(default)]
    pub regex: bool,
}

impl CausePattern {
    pub fn literal(cause: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
            pattern: pattern.into(),
            regex: false,
        }
    }

    pub fn regex(cause: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
            pattern: pattern.into(),
            regex: true,
        }
    }
}

/// On-disk pattern overrides (`patterns.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternFile {
    #[serde(default)]
    pub patterns: Vec<CausePattern>,
}

impl PatternFile {
    /// Load overrides from a TOML file. A missing file means no overrides.
    pub fn load_optional(path: impl AsRef<Path>) -> Result<Vec<CausePattern>> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => {
                let file: PatternFile = toml::from_str(&content)?;
                log::debug!(
                    "Loaded {} pattern overrides from {}",
                    file.patterns.len(),
                    path.display()
                );
                Ok(file.patterns)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Patterns shipped with the tracker.
pub fn builtin_patterns() -> Vec<CausePattern> {
    vec![
        CausePattern::literal("timeout", "Build killed with signal 15"),
        CausePattern::literal("segfault", "Segmentation fault"),
        CausePattern::regex(
            "out-of-memory",
            r"virtual memory exhausted|Cannot allocate memory",
        ),
        CausePattern::literal("dependency-wait", "unmet dependencies"),
        CausePattern::regex(
            "test-failure",
            r"(?m)^FAIL:|make(\[\d+\])?: \*\*\* \[(check|test)",
        ),
    ]
}

/// Compose the evaluation order: overrides first, then built-ins.
///
/// Each layer is ordered by cause label. An override replaces the built-in
/// rule with the same label; a repeated label within one layer keeps its
/// last definition.
pub fn merge_layers(overrides: Vec<CausePattern>, builtins: Vec<CausePattern>) -> Vec<CausePattern> {
    let overrides: BTreeMap<String, CausePattern> = overrides
        .into_iter()
        .map(|p| (p.cause.clone(), p))
        .collect();

    let builtins: BTreeMap<String, CausePattern> = builtins
        .into_iter()
        .filter(|p| !overrides.contains_key(&p.cause))
        .map(|p| (p.cause.clone(), p))
        .collect();

    overrides.into_values().chain(builtins.into_values()).collect()
}
