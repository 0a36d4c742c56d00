//! Vulnerability index with a 6-hour TTL
//!
//! The NuGet vulnerability feed is small enough to mirror whole. The index
//! keeps one immutable snapshot of it (package id to advisories) and swaps in
//! a freshly built snapshot when the current one goes stale. Refreshes are
//! serialized so a burst of lookups against a stale snapshot fetches the feed
//! once.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use futures::future::try_join_all;
use tokio::sync::Mutex;

use super::range::is_in_range;
use crate::registries::http_client::DEFAULT_TIMEOUT;
use crate::registries::{
    RegistryError, Vulnerability, VulnerabilityFeedProvider, VulnerabilitySeverity, with_timeout,
};

/// Default TTL for the vulnerability snapshot (6 hours)
pub const DEFAULT_VULN_CACHE_TTL: Duration = Duration::from_secs(6 * 3600);

/// Service index resource type of the vulnerability feed
const VULNERABILITY_RESOURCE: &str = "VulnerabilityInfo";

struct Snapshot {
    entries: HashMap<String, Vec<Vulnerability>>,
    fetched_at: Instant,
}

pub struct VulnerabilityIndex {
    provider: Arc<dyn VulnerabilityFeedProvider>,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    /// Serializes refreshes; holds the time the last attempt finished
    refresh_lock: Mutex<Option<Instant>>,
    ttl: Duration,
    timeout: Duration,
    min_severity: VulnerabilitySeverity,
}

impl VulnerabilityIndex {
    pub fn new(provider: Arc<dyn VulnerabilityFeedProvider>) -> Self {
        Self::with_settings(provider, DEFAULT_VULN_CACHE_TTL, DEFAULT_TIMEOUT)
    }

    pub fn with_settings(
        provider: Arc<dyn VulnerabilityFeedProvider>,
        ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            snapshot: RwLock::new(None),
            refresh_lock: Mutex::new(None),
            ttl,
            timeout,
            min_severity: VulnerabilitySeverity::Low,
        }
    }

    /// Hide advisories below `min_severity`
    pub fn with_min_severity(mut self, min_severity: VulnerabilitySeverity) -> Self {
        self.min_severity = min_severity;
        self
    }

    /// Advisories whose affected range contains `version`.
    ///
    /// Empty when the package has none, or when the feed has never been
    /// fetched successfully.
    pub async fn get_vulnerabilities(&self, package: &str, version: &str) -> Vec<Vulnerability> {
        let Some(snapshot) = self.current_snapshot().await else {
            return Vec::new();
        };

        snapshot
            .entries
            .get(&package.to_lowercase())
            .map(|advisories| {
                advisories
                    .iter()
                    .filter(|v| v.severity.meets_threshold(&self.min_severity))
                    .filter(|v| is_in_range(version, &v.affected_range))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop the snapshot so the next lookup refetches the feed
    pub fn invalidate(&self) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Whether a snapshot younger than the TTL is loaded
    pub fn is_fresh(&self) -> bool {
        self.fresh_snapshot().is_some()
    }

    /// Number of packages in the loaded snapshot
    pub fn package_count(&self) -> usize {
        self.stored_snapshot().map_or(0, |s| s.entries.len())
    }

    fn stored_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn fresh_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.stored_snapshot()
            .filter(|s| s.fetched_at.elapsed() < self.ttl)
    }

    async fn current_snapshot(&self) -> Option<Arc<Snapshot>> {
        if let Some(snapshot) = self.fresh_snapshot() {
            return Some(snapshot);
        }

        let requested_at = Instant::now();
        let mut last_attempt = self.refresh_lock.lock().await;

        // Another caller refreshed (or tried to) while we waited
        if let Some(snapshot) = self.fresh_snapshot() {
            return Some(snapshot);
        }
        if last_attempt.is_some_and(|at| at > requested_at) {
            return self.stored_snapshot();
        }

        let result = self.fetch_feed().await;
        *last_attempt = Some(Instant::now());

        match result {
            Ok(entries) => {
                tracing::info!("Loaded vulnerability feed: {} packages", entries.len());
                let snapshot = Arc::new(Snapshot {
                    entries,
                    fetched_at: Instant::now(),
                });
                *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) =
                    Some(Arc::clone(&snapshot));
                Some(snapshot)
            }
            Err(e) => {
                let stale = self.stored_snapshot();
                tracing::warn!(
                    "Vulnerability feed refresh failed: {}{}",
                    e,
                    if stale.is_some() {
                        ", keeping stale data"
                    } else {
                        ""
                    }
                );
                stale
            }
        }
    }

    /// Service index, then the feed's page index, then every page at once.
    async fn fetch_feed(&self) -> Result<HashMap<String, Vec<Vulnerability>>, RegistryError> {
        let index = with_timeout(
            self.timeout,
            "service index",
            self.provider.fetch_service_index(),
        )
        .await?;

        let feed_url = index
            .resource_url(VULNERABILITY_RESOURCE)
            .ok_or_else(|| RegistryError::MissingResource(VULNERABILITY_RESOURCE.to_string()))?
            .to_string();

        let pages = with_timeout(
            self.timeout,
            "vulnerability page index",
            self.provider.fetch_feed_index(&feed_url),
        )
        .await?;
        tracing::debug!("Fetching {} vulnerability pages", pages.len());

        let contents = try_join_all(pages.iter().map(|page| {
            with_timeout(
                self.timeout,
                &page.name,
                self.provider.fetch_feed_page(&page.url),
            )
        }))
        .await?;

        let mut entries: HashMap<String, Vec<Vulnerability>> = HashMap::new();
        for content in contents {
            for (package, advisories) in content {
                entries
                    .entry(package.to_lowercase())
                    .or_default()
                    .extend(advisories);
            }
        }
        Ok(entries)
    }
}
