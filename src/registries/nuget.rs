//! Client for the NuGet v3 API

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::http_client::create_shared_client;
use super::version_utils::compare_versions;
use super::{
    Deprecation, FeedPage, FeedPageContent, PackageMetadata, RegistrationProvider,
    RegistryError, SearchProvider, SearchResult, ServiceIndex, VersionListProvider,
    VulnerabilityFeedProvider, string_or_vec,
};

pub const DEFAULT_SERVICE_INDEX_URL: &str = "https://api.nuget.org/v3/index.json";
pub const DEFAULT_FLAT_CONTAINER_URL: &str = "https://api.nuget.org/v3-flatcontainer";
pub const DEFAULT_REGISTRATION_URL: &str = "https://api.nuget.org/v3/registration5-gz-semver2";
pub const DEFAULT_SEARCH_URL: &str = "https://azuresearch-usnc.nuget.org/query";

/// Base URLs of the NuGet resources the client talks to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NuGetEndpoints {
    pub service_index: String,
    pub flat_container: String,
    pub registration: String,
    pub search: String,
}

impl Default for NuGetEndpoints {
    fn default() -> Self {
        Self {
            service_index: DEFAULT_SERVICE_INDEX_URL.to_string(),
            flat_container: DEFAULT_FLAT_CONTAINER_URL.to_string(),
            registration: DEFAULT_REGISTRATION_URL.to_string(),
            search: DEFAULT_SEARCH_URL.to_string(),
        }
    }
}

impl NuGetEndpoints {
    /// All resources served under one base URL, as a local mirror or a test
    /// server lays them out.
    pub fn from_base_url(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            service_index: format!("{base}/v3/index.json"),
            flat_container: format!("{base}/v3-flatcontainer"),
            registration: format!("{base}/v3/registration5-gz-semver2"),
            search: format!("{base}/query"),
        }
    }
}

/// Client for the NuGet registry
pub struct NuGetClient {
    client: Arc<Client>,
    endpoints: NuGetEndpoints,
}

impl NuGetClient {
    pub fn with_client(client: Arc<Client>, endpoints: NuGetEndpoints) -> Self {
        Self { client, endpoints }
    }

    pub fn http_client(&self) -> Arc<Client> {
        Arc::clone(&self.client)
    }

    pub fn endpoints(&self) -> &NuGetEndpoints {
        &self.endpoints
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, RegistryError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            tracing::warn!("NuGet returned status {} for {}", status, url);
            return Err(RegistryError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.json().await.map_err(|e| {
            tracing::warn!("Failed to parse NuGet response from {}: {}", url, e);
            RegistryError::InvalidResponse(e.to_string())
        })
    }
}

impl Default for NuGetClient {
    fn default() -> Self {
        Self::with_client(
            create_shared_client().expect("Failed to create HTTP client"),
            NuGetEndpoints::default(),
        )
    }
}

// NuGet API response structures
#[derive(Debug, Deserialize)]
struct FlatContainerIndex {
    versions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RegistrationIndex {
    items: Vec<RegistrationPage>,
}

#[derive(Debug, Deserialize)]
struct RegistrationPage {
    #[serde(rename = "@id")]
    id: String,
    items: Option<Vec<RegistrationLeaf>>,
    lower: Option<String>,
    upper: Option<String>,
}

impl RegistrationPage {
    fn may_contain(&self, version: &str) -> bool {
        let above_lower = self
            .lower
            .as_deref()
            .is_none_or(|lower| compare_versions(version, lower).is_ge());
        let below_upper = self
            .upper
            .as_deref()
            .is_none_or(|upper| compare_versions(version, upper).is_le());
        above_lower && below_upper
    }
}

#[derive(Debug, Deserialize)]
struct RegistrationLeaf {
    #[serde(rename = "catalogEntry")]
    catalog_entry: CatalogEntry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogEntry {
    id: String,
    version: String,
    description: Option<String>,
    #[serde(default, deserialize_with = "string_or_vec")]
    authors: Vec<String>,
    project_url: Option<String>,
    icon_url: Option<String>,
    license_expression: Option<String>,
    license_url: Option<String>,
    #[serde(default, deserialize_with = "string_or_vec")]
    tags: Vec<String>,
    release_notes: Option<String>,
    published: Option<String>,
    deprecation: Option<Deprecation>,
}

impl CatalogEntry {
    /// Versions match when equal under the comparator.
    fn matches(&self, version: &str) -> bool {
        compare_versions(&self.version, version).is_eq()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl From<CatalogEntry> for PackageMetadata {
    fn from(entry: CatalogEntry) -> Self {
        // Unlisted packages carry a 1900-01-01 publish date
        let published = entry
            .published
            .as_deref()
            .and_then(|p| DateTime::parse_from_rfc3339(p).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .filter(|dt| dt.year() > 1900);

        PackageMetadata {
            id: entry.id,
            version: entry.version,
            description: non_empty(entry.description),
            authors: entry.authors,
            owners: Vec::new(),
            project_url: non_empty(entry.project_url),
            icon_url: non_empty(entry.icon_url),
            license: non_empty(entry.license_expression).or(non_empty(entry.license_url)),
            tags: entry.tags,
            total_downloads: None,
            verified: None,
            release_notes: non_empty(entry.release_notes),
            published,
            deprecation: entry.deprecation,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<SearchResult>,
}

#[async_trait]
impl VersionListProvider for NuGetClient {
    async fn fetch_versions(&self, package_id: &str) -> Result<Vec<String>, RegistryError> {
        // NuGet uses lowercase package IDs in URLs
        let url = format!(
            "{}/{}/index.json",
            self.endpoints.flat_container.trim_end_matches('/'),
            package_id.to_lowercase()
        );

        match self.get_json::<FlatContainerIndex>(&url).await {
            Ok(index) => Ok(index.versions),
            Err(RegistryError::NotFound(_)) => Err(RegistryError::NotFound(package_id.to_string())),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl RegistrationProvider for NuGetClient {
    async fn fetch_registration(
        &self,
        package_id: &str,
        version: &str,
    ) -> Result<Option<PackageMetadata>, RegistryError> {
        let url = format!(
            "{}/{}/index.json",
            self.endpoints.registration.trim_end_matches('/'),
            package_id.to_lowercase()
        );

        let registration: RegistrationIndex = match self.get_json(&url).await {
            Ok(registration) => registration,
            Err(RegistryError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        for page in registration.items {
            if !page.may_contain(version) {
                continue;
            }

            let leaves = match page.items {
                Some(items) => items,
                None => {
                    // Large packages page their registrations out
                    let page_data: RegistrationPage = self.get_json(&page.id).await?;
                    page_data.items.unwrap_or_default()
                }
            };

            if let Some(leaf) = leaves
                .into_iter()
                .find(|leaf| leaf.catalog_entry.matches(version))
            {
                return Ok(Some(leaf.catalog_entry.into()));
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl SearchProvider for NuGetClient {
    async fn search(
        &self,
        query: &str,
        take: usize,
        include_prerelease: bool,
    ) -> Result<Vec<SearchResult>, RegistryError> {
        let mut url = Url::parse(&self.endpoints.search)
            .map_err(|e| RegistryError::InvalidResponse(format!("invalid search URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("take", &take.to_string())
            .append_pair("prerelease", if include_prerelease { "true" } else { "false" })
            .append_pair("semVerLevel", "2.0.0");

        let response: SearchResponse = self.get_json(url.as_str()).await?;
        Ok(response.data)
    }
}

#[async_trait]
impl VulnerabilityFeedProvider for NuGetClient {
    async fn fetch_service_index(&self) -> Result<ServiceIndex, RegistryError> {
        self.get_json(&self.endpoints.service_index).await
    }

    async fn fetch_feed_index(&self, url: &str) -> Result<Vec<FeedPage>, RegistryError> {
        self.get_json(url).await
    }

    async fn fetch_feed_page(&self, url: &str) -> Result<FeedPageContent, RegistryError> {
        self.get_json(url).await
    }
}
