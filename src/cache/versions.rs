//! Version-list cache with request coalescing
//!
//! Each package's full version list is cached for the configured TTL.
//! Concurrent misses for the same package share a single in-flight fetch:
//! the first caller registers a shared future in the pending set and every
//! later caller awaits that same future until it resolves.
//!
//! Fetches are spawned onto the runtime, so a caller that stops waiting does
//! not cancel the fetch; its result still lands in the cache.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use super::{CacheStats, DEFAULT_TTL, TtlCache};
use crate::registries::http_client::DEFAULT_TIMEOUT;
use crate::registries::version_utils::{is_prerelease, sort_descending};
use crate::registries::{RegistryError, VersionListProvider, with_timeout};

/// Sorted version list shared between the cache and its readers
pub type VersionList = Arc<Vec<String>>;

type SharedFetch = Shared<BoxFuture<'static, Result<VersionList, RegistryError>>>;

/// Cache of per-package version lists, newest first
pub struct VersionCache {
    provider: Arc<dyn VersionListProvider>,
    entries: TtlCache<String, VersionList>,
    pending: Arc<DashMap<String, SharedFetch>>,
    timeout: Duration,
}

/// Removes a package from the pending set when the fetch task ends, even if
/// the provider panicked.
struct PendingGuard {
    pending: Arc<DashMap<String, SharedFetch>>,
    key: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.remove(&self.key);
    }
}

impl VersionCache {
    pub fn new(provider: Arc<dyn VersionListProvider>) -> Self {
        Self::with_settings(provider, DEFAULT_TTL, DEFAULT_TIMEOUT)
    }

    pub fn with_settings(
        provider: Arc<dyn VersionListProvider>,
        ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            entries: TtlCache::with_ttl(ttl),
            pending: Arc::new(DashMap::new()),
            timeout,
        }
    }

    /// Versions of `package`, newest first.
    ///
    /// Fetch failures are coalesced like successes: every waiter sees the same
    /// error, and nothing is cached so the next call retries.
    pub async fn try_get_versions(&self, package: &str) -> Result<VersionList, RegistryError> {
        let key = package.to_lowercase();

        if let Some(versions) = self.entries.get(&key) {
            tracing::debug!("Version cache hit for {}", package);
            return Ok(versions);
        }

        self.pending_fetch(key, package).await
    }

    /// Versions of `package`, newest first; empty when the fetch failed.
    pub async fn get_versions(&self, package: &str) -> Vec<String> {
        match self.try_get_versions(package).await {
            Ok(versions) => versions.as_ref().clone(),
            Err(e) => {
                tracing::warn!("Failed to fetch versions for {}: {}", package, e);
                Vec::new()
            }
        }
    }

    /// Latest stable version, falling back to the newest pre-release when no
    /// stable version exists.
    pub async fn get_latest_version(&self, package: &str) -> Option<String> {
        let versions = self.try_get_versions(package).await.ok()?;
        latest_version(&versions).map(str::to_string)
    }

    pub async fn get_latest_prerelease(&self, package: &str) -> Option<String> {
        let versions = self.try_get_versions(package).await.ok()?;
        latest_prerelease(&versions).map(str::to_string)
    }

    /// Join an in-flight fetch for `key`, or start one.
    fn pending_fetch(&self, key: String, package: &str) -> SharedFetch {
        match self.pending.entry(key) {
            Entry::Occupied(entry) => {
                tracing::debug!("Joining in-flight version fetch for {}", package);
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                // A fetch may have completed between the cache check and here
                if let Some(versions) = self.entries.get(entry.key()) {
                    return futures::future::ready(Ok(versions)).boxed().shared();
                }

                let fetch = self.spawn_fetch(entry.key().clone(), package.to_string());
                entry.insert(fetch.clone());
                fetch
            }
        }
    }

    fn spawn_fetch(&self, key: String, package: String) -> SharedFetch {
        let provider = Arc::clone(&self.provider);
        let entries = self.entries.clone();
        let guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            key,
        };
        let timeout = self.timeout;

        let handle = tokio::spawn(async move {
            tracing::debug!("Fetching versions for {}", package);

            let result = with_timeout(
                timeout,
                &format!("version list for {package}"),
                provider.fetch_versions(&package),
            )
            .await;

            let result = result.map(|mut versions| {
                sort_descending(&mut versions);
                Arc::new(versions)
            });

            if let Ok(versions) = &result {
                entries.insert(guard.key.clone(), Arc::clone(versions));
            }
            drop(guard);
            result
        });

        async move { handle.await.unwrap_or_else(|e| Err(e.into())) }
            .boxed()
            .shared()
    }

    /// Drop the cached list for one package, e.g. after it was upgraded
    pub fn invalidate(&self, package: &str) {
        self.entries.remove(package.to_lowercase().as_str());
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

    /// Number of cached packages (including expired)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of fetches currently in flight
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// First stable entry of a descending list, else the first entry.
pub fn latest_version(versions: &[String]) -> Option<&str> {
    versions
        .iter()
        .find(|v| !is_prerelease(v))
        .or_else(|| versions.first())
        .map(String::as_str)
}

/// First pre-release entry of a descending list.
pub fn latest_prerelease(versions: &[String]) -> Option<&str> {
    versions
        .iter()
        .find(|v| is_prerelease(v))
        .map(String::as_str)
}
