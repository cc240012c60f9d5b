//! Stored failure records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One package currently believed to be failing to build.
///
/// Records are keyed by `package`: a later failure for the same package
/// replaces the earlier one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildRecord {
    /// Source package name
    pub package: String,

    /// Source package version
    pub version: String,

    /// Architecture tag of the failing build
    pub arch: String,

    /// Build log URL
    pub url: String,

    /// Cause label assigned by the classifier
    pub cause: String,

    /// Tail of the build log
    pub content: String,

    /// When the build was created on the farm
    pub date_created: DateTime<Utc>,

    /// Archive component (e.g. "main", "universe")
    pub component: String,
}

impl BuildRecord {
    /// Key under which the record is stored.
    pub fn key(&self) -> &str {
        &self.package
    }
}

/// A record without its log tail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordSummary {
    pub package: String,
    pub version: String,
    pub arch: String,
    pub url: String,
    pub cause: String,
    pub date_created: DateTime<Utc>,
    pub component: String,
}

impl From<&BuildRecord> for RecordSummary {
    fn from(record: &BuildRecord) -> Self {
        Self {
            package: record.package.clone(),
            version: record.version.clone(),
            arch: record.arch.clone(),
            url: record.url.clone(),
            cause: record.cause.clone(),
            date_created: record.date_created,
            component: record.component.clone(),
        }
    }
}

/// Equality filter over record fields. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub url: Option<String>,
    pub cause: Option<String>,
    pub package: Option<String>,
}

impl RecordFilter {
    pub fn by_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn by_cause(cause: impl Into<String>) -> Self {
        Self {
            cause: Some(cause.into()),
            ..Self::default()
        }
    }

    pub fn by_package(package: impl Into<String>) -> Self {
        Self {
            package: Some(package.into()),
            ..Self::default()
        }
    }

    /// Check whether a record satisfies every set field.
    pub fn matches(&self, record: &BuildRecord) -> bool {
        fn field(expected: &Option<String>, actual: &str) -> bool {
            expected.as_deref().is_none_or(|e| e == actual)
        }

        field(&self.url, &record.url)
            && field(&self.cause, &record.cause)
            && field(&self.package, &record.package)
    }
}

#[cfg(test)]
pub(crate) fn sample_record(package: &str, url: &str, cause: &str) -> BuildRecord {
    BuildRecord {
        package: package.to_string(),
        version: "1.0-1".to_string(),
        arch: "armel".to_string(),
        url: url.to_string(),
        cause: cause.to_string(),
        content: format!("log for {package}"),
        date_created: DateTime::parse_from_rfc3339("2011-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc),
        component: "main".to_string(),
    }
}
