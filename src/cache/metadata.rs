//! Metadata cache with search-index enrichment
//!
//! Registration records describe one exact version but lack aggregate data
//! (download count, prefix verification). Those come from the search index,
//! which is also the fallback when the registration lookup fails.

use std::sync::Arc;
use std::time::Duration;

use super::{CacheStats, DEFAULT_TTL, TtlCache, VersionCache};
use crate::registries::http_client::DEFAULT_TIMEOUT;
use crate::registries::version_utils::compare_versions;
use crate::registries::{
    PackageMetadata, RegistrationProvider, RegistryError, SearchProvider, SearchResult,
    with_timeout,
};

const DEFAULT_SEARCH_TAKE: usize = 20;

/// Which version of a package a cached record answers for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum VersionKey {
    Latest,
    Exact(String),
}

type MetadataKey = (String, VersionKey);

pub struct MetadataCache {
    registration: Arc<dyn RegistrationProvider>,
    search: Arc<dyn SearchProvider>,
    versions: Arc<VersionCache>,
    entries: TtlCache<MetadataKey, PackageMetadata>,
    timeout: Duration,
    search_take: usize,
}

impl MetadataCache {
    pub fn new(
        registration: Arc<dyn RegistrationProvider>,
        search: Arc<dyn SearchProvider>,
        versions: Arc<VersionCache>,
    ) -> Self {
        Self::with_settings(registration, search, versions, DEFAULT_TTL, DEFAULT_TIMEOUT)
    }

    pub fn with_settings(
        registration: Arc<dyn RegistrationProvider>,
        search: Arc<dyn SearchProvider>,
        versions: Arc<VersionCache>,
        ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            registration,
            search,
            versions,
            entries: TtlCache::with_ttl(ttl),
            timeout,
            search_take: DEFAULT_SEARCH_TAKE,
        }
    }

    /// Number of search results scanned for a matching package id
    pub fn with_search_take(mut self, take: usize) -> Self {
        self.search_take = take.max(1);
        self
    }

    /// Metadata for `package` at `version`, or at its latest version when
    /// `version` is `None`.
    pub async fn get_metadata(
        &self,
        package: &str,
        version: Option<&str>,
    ) -> Option<PackageMetadata> {
        let key = (
            package.to_lowercase(),
            version.map_or(VersionKey::Latest, |v| VersionKey::Exact(v.to_lowercase())),
        );

        if let Some(metadata) = self.entries.get(&key) {
            tracing::debug!(
                "Metadata cache hit for {} {}",
                package,
                version.unwrap_or("(latest)")
            );
            return Some(metadata);
        }

        let target = match version {
            Some(v) => Some(v.to_string()),
            None => self.versions.get_latest_version(package).await,
        };

        let primary = match target.as_deref() {
            Some(target) => self.fetch_registration(package, target).await,
            None => Ok(None),
        };

        let metadata = match primary {
            Ok(Some(metadata)) => self.enrich(package, metadata).await,
            Ok(None) => {
                tracing::debug!("No registration for {}, falling back to search", package);
                self.synthesize_from_search(package, target.as_deref()).await?
            }
            Err(e) => {
                tracing::warn!(
                    "Registration lookup failed for {}: {}, falling back to search",
                    package,
                    e
                );
                self.synthesize_from_search(package, target.as_deref()).await?
            }
        };

        self.entries.insert(key, metadata.clone());
        Some(metadata)
    }

    /// Free-text search; empty on failure
    pub async fn search(
        &self,
        query: &str,
        take: usize,
        include_prerelease: bool,
    ) -> Vec<SearchResult> {
        match self.run_search(query, take, include_prerelease).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!("Search for {:?} failed: {}", query, e);
                Vec::new()
            }
        }
    }

    async fn fetch_registration(
        &self,
        package: &str,
        version: &str,
    ) -> Result<Option<PackageMetadata>, RegistryError> {
        with_timeout(
            self.timeout,
            &format!("registration of {package} {version}"),
            self.registration.fetch_registration(package, version),
        )
        .await
    }

    async fn run_search(
        &self,
        query: &str,
        take: usize,
        include_prerelease: bool,
    ) -> Result<Vec<SearchResult>, RegistryError> {
        with_timeout(
            self.timeout,
            &format!("search for {query:?}"),
            self.search.search(query, take, include_prerelease),
        )
        .await
    }

    async fn best_match(&self, package: &str) -> Result<Option<SearchResult>, RegistryError> {
        let results = self.run_search(package, self.search_take, true).await?;
        Ok(results
            .into_iter()
            .find(|r| r.id.eq_ignore_ascii_case(package)))
    }

    /// Back-fill fields the registration record lacks. Failures leave the
    /// record as it was.
    async fn enrich(&self, package: &str, metadata: PackageMetadata) -> PackageMetadata {
        match self.best_match(package).await {
            Ok(Some(result)) => metadata.merge_missing(result.into()),
            Ok(None) => metadata,
            Err(e) => {
                tracing::debug!("Search enrichment failed for {}: {}", package, e);
                metadata
            }
        }
    }

    /// Synthesize a record from the best search match.
    async fn synthesize_from_search(
        &self,
        package: &str,
        version: Option<&str>,
    ) -> Option<PackageMetadata> {
        let result = match self.best_match(package).await {
            Ok(Some(result)) => result,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Search fallback failed for {}: {}", package, e);
                return None;
            }
        };

        let published_version = version.and_then(|v| {
            result
                .versions
                .iter()
                .find(|sv| {
                    compare_versions(&sv.version.to_lowercase(), &v.to_lowercase()).is_eq()
                })
                .map(|sv| sv.version.clone())
        });

        let mut metadata = PackageMetadata::from(result);
        if let Some(v) = published_version {
            metadata.version = v;
        }
        Some(metadata)
    }

    /// Drop every cached record of one package
    pub fn invalidate(&self, package: &str) {
        let package = package.to_lowercase();
        self.entries.remove_where(|(name, _)| *name == package);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn sweep_expired(&self) -> usize {
        self.entries.sweep_expired()
    }

    pub fn stats(&self) -> CacheStats {
        self.entries.stats()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
