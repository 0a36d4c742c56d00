//! Registry clients and the data they return.
//!
//! The resolution core talks to four remote resources through the traits
//! below. [`nuget::NuGetClient`] implements all of them against the NuGet v3
//! protocol; tests substitute in-memory fakes.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub mod error;
pub mod http_client;
pub mod nuget;
pub mod version_utils;

pub use error::RegistryError;

/// Descriptive metadata for one package version
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageMetadata {
    /// Package id as published
    pub id: String,
    /// Exact version this record describes
    pub version: String,
    pub description: Option<String>,
    pub authors: Vec<String>,
    pub owners: Vec<String>,
    pub project_url: Option<String>,
    pub icon_url: Option<String>,
    /// SPDX expression, or the license URL when no expression is published
    pub license: Option<String>,
    pub tags: Vec<String>,
    /// Aggregate downloads across all versions (search index only)
    pub total_downloads: Option<u64>,
    /// Whether the package id prefix is reserved (search index only)
    pub verified: Option<bool>,
    pub release_notes: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub deprecation: Option<Deprecation>,
}

impl PackageMetadata {
    /// Back-fill every field this record leaves empty from `secondary`.
    ///
    /// Values already present are never overwritten.
    pub fn merge_missing(mut self, secondary: PackageMetadata) -> Self {
        fn fill<T>(slot: &mut Option<T>, other: Option<T>) {
            if slot.is_none() {
                *slot = other;
            }
        }
        fn fill_vec<T>(slot: &mut Vec<T>, other: Vec<T>) {
            if slot.is_empty() {
                *slot = other;
            }
        }

        if self.id.is_empty() {
            self.id = secondary.id;
        }
        if self.version.is_empty() {
            self.version = secondary.version;
        }
        fill(&mut self.description, secondary.description);
        fill_vec(&mut self.authors, secondary.authors);
        fill_vec(&mut self.owners, secondary.owners);
        fill(&mut self.project_url, secondary.project_url);
        fill(&mut self.icon_url, secondary.icon_url);
        fill(&mut self.license, secondary.license);
        fill_vec(&mut self.tags, secondary.tags);
        fill(&mut self.total_downloads, secondary.total_downloads);
        fill(&mut self.verified, secondary.verified);
        fill(&mut self.release_notes, secondary.release_notes);
        fill(&mut self.published, secondary.published);
        fill(&mut self.deprecation, secondary.deprecation);
        self
    }

    pub fn is_deprecated(&self) -> bool {
        self.deprecation.is_some()
    }
}

/// Deprecation record attached to a package version
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deprecation {
    #[serde(default)]
    pub reasons: Vec<String>,
    pub message: Option<String>,
    #[serde(default, deserialize_with = "deserialize_alternate_package")]
    pub alternate_package: Option<String>,
}

fn deserialize_alternate_package<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct AlternatePackage {
        id: String,
    }

    let alternate = Option::<AlternatePackage>::deserialize(deserializer)?;
    Ok(alternate.map(|a| a.id))
}

/// A package summary from the search index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: String,
    /// Latest version matching the query's pre-release flag
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "string_or_vec")]
    pub authors: Vec<String>,
    #[serde(default, deserialize_with = "string_or_vec")]
    pub owners: Vec<String>,
    #[serde(default)]
    pub total_downloads: Option<u64>,
    #[serde(default)]
    pub verified: Option<bool>,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub project_url: Option<String>,
    #[serde(default)]
    pub license_url: Option<String>,
    #[serde(default, deserialize_with = "string_or_vec")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub versions: Vec<SearchVersion>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchVersion {
    pub version: String,
    #[serde(default)]
    pub downloads: Option<u64>,
}

impl From<SearchResult> for PackageMetadata {
    fn from(result: SearchResult) -> Self {
        PackageMetadata {
            id: result.id,
            version: result.version,
            description: result.description.filter(|d| !d.is_empty()),
            authors: result.authors,
            owners: result.owners,
            project_url: result.project_url,
            icon_url: result.icon_url,
            license: result.license_url,
            tags: result.tags,
            total_downloads: result.total_downloads,
            verified: result.verified,
            ..Default::default()
        }
    }
}

/// Accept either `"a, b"` or `["a", "b"]`; NuGet uses both shapes.
pub(crate) fn string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        One(String),
        Many(Vec<String>),
        Null,
    }

    Ok(match StringOrVec::deserialize(deserializer)? {
        StringOrVec::One(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        StringOrVec::Many(v) => v,
        StringOrVec::Null => Vec::new(),
    })
}

/// Vulnerability record from the NuGet vulnerability feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vulnerability {
    /// Severity level
    pub severity: VulnerabilitySeverity,
    /// Advisory URL
    pub url: String,
    /// Affected versions in interval notation, e.g. `[1.0.0, 2.0.0)`
    #[serde(rename(deserialize = "versions"))]
    pub affected_range: String,
}

/// Vulnerability severity levels, numbered 0-3 on the wire
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(from = "u8", rename_all = "lowercase")]
pub enum VulnerabilitySeverity {
    Low,
    Moderate,
    High,
    Critical,
}

impl From<u8> for VulnerabilitySeverity {
    fn from(value: u8) -> Self {
        match value {
            0 => VulnerabilitySeverity::Low,
            1 => VulnerabilitySeverity::Moderate,
            2 => VulnerabilitySeverity::High,
            _ => VulnerabilitySeverity::Critical,
        }
    }
}

impl VulnerabilitySeverity {
    /// Check if this severity meets or exceeds a minimum threshold
    pub fn meets_threshold(&self, min: &Self) -> bool {
        self >= min
    }

    /// Parse severity from string (case-insensitive)
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "critical" => VulnerabilitySeverity::Critical,
            "high" => VulnerabilitySeverity::High,
            "moderate" | "medium" => VulnerabilitySeverity::Moderate,
            _ => VulnerabilitySeverity::Low,
        }
    }

    /// Get lowercase string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            VulnerabilitySeverity::Low => "low",
            VulnerabilitySeverity::Moderate => "moderate",
            VulnerabilitySeverity::High => "high",
            VulnerabilitySeverity::Critical => "critical",
        }
    }
}

/// NuGet v3 service index: the discovery document listing resource URLs
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceIndex {
    #[serde(default)]
    pub resources: Vec<ServiceResource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceResource {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub resource_type: String,
}

impl ServiceIndex {
    /// URL of the first resource whose type starts with `resource_type`
    /// (types carry a version suffix such as `VulnerabilityInfo/6.7.0`).
    pub fn resource_url(&self, resource_type: &str) -> Option<&str> {
        self.resources
            .iter()
            .find(|r| {
                r.resource_type == resource_type
                    || r.resource_type
                        .strip_prefix(resource_type)
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .map(|r| r.id.as_str())
    }
}

/// One entry of the vulnerability feed's page index
#[derive(Debug, Clone, Deserialize)]
pub struct FeedPage {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@id")]
    pub url: String,
}

/// One page of the vulnerability feed, keyed by lowercase package id
pub type FeedPageContent = HashMap<String, Vec<Vulnerability>>;

/// Await a provider call, failing with [`RegistryError::Timeout`] after
/// `timeout`.
pub async fn with_timeout<T, F>(timeout: Duration, what: &str, call: F) -> Result<T, RegistryError>
where
    F: Future<Output = Result<T, RegistryError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(RegistryError::Timeout(format!("{what} after {timeout:?}"))),
    }
}

/// Lists every published version of a package.
#[async_trait]
pub trait VersionListProvider: Send + Sync {
    /// Versions in whatever order the server returns them
    async fn fetch_versions(&self, package_id: &str) -> Result<Vec<String>, RegistryError>;
}

/// Looks up the registration (catalog) record of one exact version.
#[async_trait]
pub trait RegistrationProvider: Send + Sync {
    /// `Ok(None)` when the package or version is not registered
    async fn fetch_registration(
        &self,
        package_id: &str,
        version: &str,
    ) -> Result<Option<PackageMetadata>, RegistryError>;
}

/// Full-text package search.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(
        &self,
        query: &str,
        take: usize,
        include_prerelease: bool,
    ) -> Result<Vec<SearchResult>, RegistryError>;
}

/// The three stages of vulnerability feed discovery.
#[async_trait]
pub trait VulnerabilityFeedProvider: Send + Sync {
    async fn fetch_service_index(&self) -> Result<ServiceIndex, RegistryError>;

    async fn fetch_feed_index(&self, url: &str) -> Result<Vec<FeedPage>, RegistryError>;

    async fn fetch_feed_page(&self, url: &str) -> Result<FeedPageContent, RegistryError>;
}
