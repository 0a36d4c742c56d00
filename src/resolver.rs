//! Resolution engine: the facade the editor layer talks to
//!
//! For every installed package the engine answers which version is latest
//! stable, which is latest pre-release, whether an update is available, what
//! kind of update it is and which known vulnerabilities affect the pinned
//! version. Packages in a batch resolve concurrently and independently; a
//! failed lookup degrades that one package and nothing else.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::cache::versions::{VersionList, latest_prerelease, latest_version};
use crate::cache::{CacheStats, MetadataCache, VersionCache};
use crate::config::Config;
use crate::registries::http_client::create_client_with_timeout;
use crate::registries::nuget::NuGetClient;
use crate::registries::version_utils::{compare_versions, normalize_declared_version};
use crate::registries::{
    Deprecation, PackageMetadata, RegistrationProvider, RegistryError, SearchProvider,
    SearchResult, VersionListProvider, Vulnerability, VulnerabilityFeedProvider,
};
use crate::update::{UpdateKind, classify_update, upgrade_candidate};
use crate::vulnerabilities::VulnerabilityIndex;

/// Shortest interval accepted for the background sweep
const MIN_CLEANUP_INTERVAL: Duration = Duration::from_secs(1);

/// The remote resources the engine reads from
#[derive(Clone)]
pub struct Providers {
    pub versions: Arc<dyn VersionListProvider>,
    pub registration: Arc<dyn RegistrationProvider>,
    pub search: Arc<dyn SearchProvider>,
    pub vulnerabilities: Arc<dyn VulnerabilityFeedProvider>,
}

impl Providers {
    /// Serve every resource from one NuGet client
    pub fn from_client(client: Arc<NuGetClient>) -> Self {
        Self {
            versions: client.clone(),
            registration: client.clone(),
            search: client.clone(),
            vulnerabilities: client,
        }
    }
}

/// Resolution result for one installed package
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageResolution {
    pub package: String,
    pub current_version: String,
    pub latest_stable: Option<String>,
    /// Only set when newer than `latest_stable`
    pub latest_prerelease: Option<String>,
    pub update_available: bool,
    pub update_kind: UpdateKind,
    /// Advisories affecting `current_version`
    pub vulnerabilities: Vec<Vulnerability>,
    pub deprecation: Option<Deprecation>,
    /// The version list could not be fetched; update fields are unknown
    pub lookup_failed: bool,
}

impl PackageResolution {
    pub fn is_vulnerable(&self) -> bool {
        !self.vulnerabilities.is_empty()
    }

    /// Version "upgrade all" would move this package to, if it is newer
    pub fn upgrade_target(&self) -> Option<&str> {
        if !self.update_available {
            return None;
        }
        upgrade_candidate(
            &self.current_version,
            self.latest_stable.as_deref(),
            self.latest_prerelease.as_deref(),
        )
    }
}

pub struct ResolutionEngine {
    versions: Arc<VersionCache>,
    metadata: MetadataCache,
    vulnerabilities: VulnerabilityIndex,
    config: Config,
}

impl ResolutionEngine {
    /// Engine backed by the NuGet endpoints named in `config`
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let http_client = create_client_with_timeout(config.registry.timeout())?;
        let client = Arc::new(NuGetClient::with_client(
            http_client,
            config.registry.endpoints(),
        ));
        Ok(Self::with_providers(config, Providers::from_client(client)))
    }

    pub fn with_providers(config: &Config, providers: Providers) -> Self {
        let timeout = config.registry.timeout();
        let versions = Arc::new(VersionCache::with_settings(
            providers.versions,
            config.cache.ttl(),
            timeout,
        ));
        let metadata = MetadataCache::with_settings(
            providers.registration,
            providers.search,
            Arc::clone(&versions),
            config.cache.metadata_ttl(),
            timeout,
        )
        .with_search_take(config.registry.search_take);
        let vulnerabilities = VulnerabilityIndex::with_settings(
            providers.vulnerabilities,
            config.security.cache_ttl(),
            timeout,
        )
        .with_min_severity(config.security.min_severity_level());

        Self {
            versions,
            metadata,
            vulnerabilities,
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolve `(package, installed version)` pairs concurrently, in input
    /// order.
    pub async fn resolve_batch(&self, packages: &[(String, String)]) -> Vec<PackageResolution> {
        tracing::info!("Resolving {} packages", packages.len());
        join_all(
            packages
                .iter()
                .map(|(package, version)| self.resolve_package(package, version)),
        )
        .await
    }

    /// Resolve one package. Never fails; lookups that error degrade to
    /// empty fields.
    pub async fn resolve_package(&self, package: &str, declared_version: &str) -> PackageResolution {
        let current = normalize_declared_version(declared_version);

        let (versions, metadata, vulnerabilities) = tokio::join!(
            self.versions.try_get_versions(package),
            self.current_metadata(package, &current),
            self.current_vulnerabilities(package, &current),
        );

        let mut resolution = PackageResolution {
            package: package.to_string(),
            current_version: current,
            latest_stable: None,
            latest_prerelease: None,
            update_available: false,
            update_kind: UpdateKind::None,
            vulnerabilities,
            deprecation: metadata.and_then(|m| m.deprecation),
            lookup_failed: false,
        };

        match versions {
            Ok(list) => apply_versions(&mut resolution, &list),
            Err(e) => {
                tracing::warn!("Version lookup failed for {}: {}", package, e);
                resolution.lookup_failed = true;
            }
        }

        if !resolution.vulnerabilities.is_empty() {
            tracing::debug!(
                "{} {} has {} known vulnerabilities",
                package,
                resolution.current_version,
                resolution.vulnerabilities.len()
            );
        }

        resolution
    }

    async fn current_metadata(&self, package: &str, version: &str) -> Option<PackageMetadata> {
        if !self.config.resolution.fetch_metadata {
            return None;
        }
        self.metadata.get_metadata(package, Some(version)).await
    }

    async fn current_vulnerabilities(&self, package: &str, version: &str) -> Vec<Vulnerability> {
        if !self.config.security.enabled {
            return Vec::new();
        }
        self.vulnerabilities
            .get_vulnerabilities(package, version)
            .await
    }

    /// All versions, newest first; empty when the lookup failed
    pub async fn versions(&self, package: &str) -> Vec<String> {
        self.versions.get_versions(package).await
    }

    pub async fn try_versions(&self, package: &str) -> Result<VersionList, RegistryError> {
        self.versions.try_get_versions(package).await
    }

    pub async fn latest_version(&self, package: &str) -> Option<String> {
        self.versions.get_latest_version(package).await
    }

    pub async fn latest_prerelease(&self, package: &str) -> Option<String> {
        self.versions.get_latest_prerelease(package).await
    }

    pub async fn metadata(&self, package: &str, version: Option<&str>) -> Option<PackageMetadata> {
        self.metadata.get_metadata(package, version).await
    }

    pub async fn search(
        &self,
        query: &str,
        take: usize,
        include_prerelease: bool,
    ) -> Vec<SearchResult> {
        self.metadata.search(query, take, include_prerelease).await
    }

    pub async fn vulnerabilities(&self, package: &str, version: &str) -> Vec<Vulnerability> {
        self.vulnerabilities
            .get_vulnerabilities(package, &normalize_declared_version(version))
            .await
    }

    /// Forget everything cached about one package, e.g. after the manifest
    /// changed its version
    pub fn invalidate_package(&self, package: &str) {
        tracing::debug!("Invalidating cached data for {}", package);
        self.versions.invalidate(package);
        self.metadata.invalidate(package);
    }

    pub fn clear_caches(&self) {
        self.versions.clear();
        self.metadata.clear();
        self.vulnerabilities.invalidate();
    }

    /// Remove expired cache entries; returns how many were dropped
    pub fn sweep_expired(&self) -> usize {
        self.versions.sweep_expired() + self.metadata.sweep_expired()
    }

    pub fn version_cache_stats(&self) -> CacheStats {
        self.versions.stats()
    }

    pub fn metadata_cache_stats(&self) -> CacheStats {
        self.metadata.stats()
    }

    /// Sweep expired entries every `cache.cleanup_interval_secs`. The task
    /// stops once the engine is dropped.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> JoinHandle<()> {
        let period = self.config.cache.cleanup_interval().max(MIN_CLEANUP_INTERVAL);
        let engine: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                let removed = engine.sweep_expired();
                if removed > 0 {
                    tracing::info!("Cache cleanup removed {} expired entries", removed);
                }
            }
            tracing::debug!("Cache cleanup task stopped");
        })
    }
}

fn apply_versions(resolution: &mut PackageResolution, versions: &[String]) {
    let stable = latest_version(versions);
    let prerelease = latest_prerelease(versions)
        .filter(|pre| stable.is_none_or(|stable| compare_versions(pre, stable).is_gt()));

    resolution.latest_stable = stable.map(str::to_string);
    resolution.latest_prerelease = prerelease.map(str::to_string);

    let current = resolution.current_version.as_str();
    if let Some(candidate) = upgrade_candidate(current, stable, prerelease)
        && compare_versions(candidate, current).is_gt()
    {
        resolution.update_available = true;
        resolution.update_kind = classify_update(current, candidate);
    }
}
