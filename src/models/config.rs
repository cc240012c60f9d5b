//! Application configuration structures.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Build-farm query settings
    #[serde(default)]
    pub farm: FarmConfig,

    /// Architectures whose failures are tracked
    #[serde(default)]
    pub targets: TargetConfig,

    /// Build log retrieval settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Polling cadence
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Read-only dashboard settings
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.farm.api_root.trim().is_empty() {
            return Err(AppError::validation("farm.api_root is empty"));
        }
        if self.farm.distribution.trim().is_empty() {
            return Err(AppError::validation("farm.distribution is empty"));
        }
        if self.farm.states.is_empty() {
            return Err(AppError::validation("farm.states must not be empty"));
        }
        if self.farm.pockets.is_empty() {
            return Err(AppError::validation("farm.pockets must not be empty"));
        }
        if self.farm.page_size == 0 {
            return Err(AppError::validation("farm.page_size must be > 0"));
        }
        if self.targets.architectures.is_empty() {
            return Err(AppError::validation("No target architectures defined"));
        }
        if self.fetch.user_agent.trim().is_empty() {
            return Err(AppError::validation("fetch.user_agent is empty"));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(AppError::validation("fetch.timeout_secs must be > 0"));
        }
        if self.fetch.max_log_bytes == 0 {
            return Err(AppError::validation("fetch.max_log_bytes must be > 0"));
        }
        if self.fetch.max_concurrent == 0 {
            return Err(AppError::validation("fetch.max_concurrent must be > 0"));
        }
        if self.fetch.trim.enabled && self.fetch.trim.tail_lines == 0 {
            return Err(AppError::validation(
                "fetch.trim.tail_lines must be > 0 when trimming is enabled",
            ));
        }
        if self.schedule.interval_secs == 0 {
            return Err(AppError::validation("schedule.interval_secs must be > 0"));
        }
        if self.dashboard.refresh_secs == 0 {
            return Err(AppError::validation("dashboard.refresh_secs must be > 0"));
        }
        Ok(())
    }
}

/// Build-farm (Launchpad) query settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarmConfig {
    /// Root of the web service API
    #[serde(default = "defaults::api_root")]
    pub api_root: String,

    /// Distribution whose builds are polled
    #[serde(default = "defaults::distribution")]
    pub distribution: String,

    /// Series to poll; the distribution's current focus series when unset
    #[serde(default)]
    pub series: Option<String>,

    /// Restrict the query to one source package
    #[serde(default)]
    pub source_name: Option<String>,

    /// Build states treated as failing
    #[serde(default = "defaults::states")]
    pub states: Vec<String>,

    /// Pockets to query
    #[serde(default = "defaults::pockets")]
    pub pockets: Vec<String>,

    /// Entries requested per collection page
    #[serde(default = "defaults::page_size")]
    pub page_size: usize,
}

impl Default for FarmConfig {
    fn default() -> Self {
        Self {
            api_root: defaults::api_root(),
            distribution: defaults::distribution(),
            series: None,
            source_name: None,
            states: defaults::states(),
            pockets: defaults::pockets(),
            page_size: defaults::page_size(),
        }
    }
}

/// Architecture filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Architecture tags whose failures are tracked (e.g. "armel")
    #[serde(default = "defaults::architectures")]
    pub architectures: Vec<String>,
}

impl TargetConfig {
    /// Whether builds for `arch_tag` are tracked.
    pub fn is_target(&self, arch_tag: &str) -> bool {
        self.architectures.iter().any(|a| a == arch_tag)
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            architectures: defaults::architectures(),
        }
    }
}

/// HTTP client and log retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Bytes kept from the end of each build log
    #[serde(default = "defaults::max_log_bytes")]
    pub max_log_bytes: usize,

    /// Maximum concurrent log downloads within one cycle
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Delay between completed downloads in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Secondary trimming applied after the byte window
    #[serde(default)]
    pub trim: TrimConfig,
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            max_log_bytes: defaults::max_log_bytes(),
            max_concurrent: defaults::max_concurrent(),
            request_delay_ms: defaults::request_delay(),
            trim: TrimConfig::default(),
        }
    }
}

/// Cut at an end marker, then keep the trailing lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrimConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Text after the first occurrence of this marker is dropped
    #[serde(default = "defaults::end_marker")]
    pub end_marker: String,

    /// Number of trailing lines retained
    #[serde(default = "defaults::tail_lines")]
    pub tail_lines: usize,
}

impl Default for TrimConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            end_marker: defaults::end_marker(),
            tail_lines: defaults::tail_lines(),
        }
    }
}

/// Poll cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between the starts of consecutive cycles
    #[serde(default = "defaults::interval")]
    pub interval_secs: u64,
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: defaults::interval(),
        }
    }
}

/// Dashboard settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// TCP port the dashboard listens on
    #[serde(default = "defaults::port")]
    pub port: u16,

    /// Seconds between store snapshots
    #[serde(default = "defaults::refresh")]
    pub refresh_secs: u64,
}

impl DashboardConfig {
    pub fn refresh(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            port: defaults::port(),
            refresh_secs: defaults::refresh(),
        }
    }
}

mod defaults {
    // Farm defaults
    pub fn api_root() -> String {
        "https://api.launchpad.net/1.0".into()
    }
    pub fn distribution() -> String {
        "ubuntu".into()
    }
    pub fn states() -> Vec<String> {
        vec!["Failed to build".into()]
    }
    pub fn pockets() -> Vec<String> {
        vec!["Release".into()]
    }
    pub fn page_size() -> usize {
        300
    }

    // Target defaults
    pub fn architectures() -> Vec<String> {
        vec!["armel".into()]
    }

    // Fetch defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; ftbfs-tracker/0.1)".into()
    }
    pub fn timeout() -> u64 {
        60
    }
    pub fn max_log_bytes() -> usize {
        100 * 1024
    }
    pub fn max_concurrent() -> usize {
        5
    }
    pub fn request_delay() -> u64 {
        0
    }
    pub fn end_marker() -> String {
        "Build finished at".into()
    }
    pub fn tail_lines() -> usize {
        200
    }

    // Schedule defaults
    pub fn interval() -> u64 {
        3600
    }

    // Dashboard defaults
    pub fn port() -> u16 {
        8080
    }
    pub fn refresh() -> u64 {
        3
    }
}
