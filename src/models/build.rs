//! Build-farm query and listing types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// The currently published source a build belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourcePublication {
    pub package: String,
    pub version: String,
    pub component: String,
}

/// One build as reported by the farm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildDescriptor {
    /// Build log URL, absent when no log was produced
    pub log_url: Option<String>,

    /// Architecture tag (e.g. "armel")
    pub arch_tag: String,

    pub date_created: DateTime<Utc>,

    /// `None` marks a superseded, non-current build
    pub publication: Option<SourcePublication>,
}

/// One farm query: series × pocket × state, optionally narrowed to a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildQuery {
    /// Series name; the distribution's focus series when `None`
    pub series: Option<String>,
    pub pocket: String,
    pub state: String,
    pub source_name: Option<String>,
}

/// Builds gathered by an enumeration, plus the error that cut it short.
///
/// A listing with a failure still carries every build read before the
/// failure, but callers must not treat it as the complete failing set.
#[derive(Debug, Default)]
pub struct BuildListing {
    pub builds: Vec<BuildDescriptor>,
    pub failure: Option<AppError>,
}

impl BuildListing {
    pub fn complete(builds: Vec<BuildDescriptor>) -> Self {
        Self {
            builds,
            failure: None,
        }
    }

    pub fn interrupted(builds: Vec<BuildDescriptor>, failure: AppError) -> Self {
        Self {
            builds,
            failure: Some(failure),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }

    /// Append another listing, keeping the first failure seen.
    pub fn merge(&mut self, other: BuildListing) {
        self.builds.extend(other.builds);
        if self.failure.is_none() {
            self.failure = other.failure;
        }
    }
}
