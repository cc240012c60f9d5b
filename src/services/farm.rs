// src/services/farm.rs

//! Build-farm access.
//!
//! [`LaunchpadClient`] talks to the anonymous Launchpad web service:
//! `getBuildRecords` on a distro series, paged through
//! `next_collection_link`, with each build's current source publication
//! resolved to obtain package name, version and component.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::models::{
    BuildDescriptor, BuildListing, BuildQuery, FarmConfig, SourcePublication, TargetConfig,
};
use crate::utils::{http, join_path, with_params};

/// Lists builds from a build farm.
#[async_trait]
pub trait BuildFarm: Send + Sync {
    /// Enumerate builds matching `query` on any target architecture.
    ///
    /// Errors during enumeration are reported inside the listing so that
    /// builds read before the failure are still available.
    async fn list_builds(&self, query: &BuildQuery, targets: &TargetConfig) -> BuildListing;
}

#[derive(Debug, Deserialize)]
struct Distribution {
    current_series_link: String,
}

#[derive(Debug, Deserialize)]
struct Collection<T> {
    #[serde(default = "Vec::new")]
    entries: Vec<T>,
    #[serde(default)]
    next_collection_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BuildEntry {
    #[serde(default)]
    build_log_url: Option<String>,
    arch_tag: String,
    datecreated: DateTime<Utc>,
    #[serde(default)]
    current_source_publication_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PublicationEntry {
    source_package_name: String,
    source_package_version: String,
    component_name: String,
}

impl From<PublicationEntry> for SourcePublication {
    fn from(entry: PublicationEntry) -> Self {
        Self {
            package: entry.source_package_name,
            version: entry.source_package_version,
            component: entry.component_name,
        }
    }
}

/// Anonymous Launchpad client.
pub struct LaunchpadClient {
    client: Client,
    config: FarmConfig,
    concurrency: usize,
}

impl LaunchpadClient {
    pub fn new(client: Client, config: FarmConfig, concurrency: usize) -> Self {
        Self {
            client,
            config,
            concurrency: concurrency.max(1),
        }
    }

    /// Link of the queried series, looking up the focus series if unnamed.
    async fn series_link(&self, series: Option<&str>) -> Result<String> {
        let distro_link = join_path(&self.config.api_root, &[&self.config.distribution])?;
        match series {
            Some(name) => join_path(&distro_link, &[name]),
            None => {
                let distro: Distribution = http::get_json(&self.client, &distro_link).await?;
                log::info!("Using focus series {}", distro.current_series_link);
                Ok(distro.current_series_link)
            }
        }
    }

    fn build_records_url(&self, series_link: &str, query: &BuildQuery) -> Result<String> {
        let size = self.config.page_size.to_string();
        let mut params = vec![
            ("ws.op", "getBuildRecords"),
            ("build_state", query.state.as_str()),
            ("pocket", query.pocket.as_str()),
            ("ws.size", size.as_str()),
        ];
        if let Some(source) = &query.source_name {
            params.push(("source_name", source.as_str()));
        }
        with_params(series_link, &params)
    }

    /// Read every page, stopping at the first failing page.
    async fn read_pages(
        &self,
        first_page: String,
        targets: &TargetConfig,
    ) -> (Vec<BuildEntry>, Option<AppError>) {
        let mut entries = Vec::new();
        let mut next = Some(first_page);

        while let Some(url) = next.take() {
            match http::get_json::<Collection<BuildEntry>>(&self.client, &url).await {
                Ok(page) => {
                    log::debug!("Read {} builds from {}", page.entries.len(), url);
                    entries.extend(
                        page.entries
                            .into_iter()
                            .filter(|entry| targets.is_target(&entry.arch_tag)),
                    );
                    next = page.next_collection_link;
                }
                Err(e) => return (entries, Some(AppError::farm(format!("{url}: {e}")))),
            }
        }
        (entries, None)
    }

    async fn resolve(&self, entry: BuildEntry) -> Result<BuildDescriptor> {
        let publication = match &entry.current_source_publication_link {
            Some(link) => http::get_json_optional::<PublicationEntry>(&self.client, link)
                .await
                .map_err(|e| AppError::farm(format!("{link}: {e}")))?
                .map(SourcePublication::from),
            None => None,
        };

        Ok(BuildDescriptor {
            log_url: entry.build_log_url,
            arch_tag: entry.arch_tag,
            date_created: entry.datecreated,
            publication,
        })
    }
}

#[async_trait]
impl BuildFarm for LaunchpadClient {
    async fn list_builds(&self, query: &BuildQuery, targets: &TargetConfig) -> BuildListing {
        let first_page = match self
            .series_link(query.series.as_deref())
            .await
            .and_then(|link| self.build_records_url(&link, query))
        {
            Ok(url) => url,
            Err(e) => return BuildListing::interrupted(Vec::new(), AppError::farm(e)),
        };

        let (entries, mut failure) = self.read_pages(first_page, targets).await;

        let mut builds = Vec::with_capacity(entries.len());
        let mut resolved = stream::iter(entries)
            .map(|entry| self.resolve(entry))
            .buffered(self.concurrency);

        while let Some(result) = resolved.next().await {
            match result {
                Ok(build) => builds.push(build),
                Err(e) => {
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }

        BuildListing { builds, failure }
    }
}
