//! Configuration for the resolution engine

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::registries::VulnerabilitySeverity;
use crate::registries::nuget::{
    DEFAULT_FLAT_CONTAINER_URL, DEFAULT_REGISTRATION_URL, DEFAULT_SEARCH_URL,
    DEFAULT_SERVICE_INDEX_URL, NuGetEndpoints,
};

/// Default cache TTL (1 hour)
const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Default interval between expired-entry sweeps (30 minutes)
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 1800;

/// Default vulnerability cache TTL (6 hours)
const DEFAULT_VULN_CACHE_TTL_SECS: u64 = 6 * 3600;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

const DEFAULT_SEARCH_TAKE: usize = 20;

/// Engine configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Cache configuration
    pub cache: CacheConfig,
    /// Security/vulnerability configuration
    pub security: SecurityConfig,
    /// Registry endpoints and request limits
    pub registry: RegistryConfig,
    pub resolution: ResolutionConfig,
}

/// Cache configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Version-list TTL in seconds
    pub ttl_secs: u64,
    /// Metadata TTL in seconds
    pub metadata_ttl_secs: u64,
    /// Seconds between sweeps of expired entries
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_CACHE_TTL_SECS,
            metadata_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn metadata_ttl(&self) -> Duration {
        Duration::from_secs(self.metadata_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Security/vulnerability scanning configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Enable vulnerability scanning
    pub enabled: bool,
    /// Minimum severity level to report ("low", "moderate", "high", "critical")
    pub min_severity: String,
    /// Vulnerability cache TTL in seconds (default: 6 hours)
    pub cache_ttl_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_severity: "low".to_string(),
            cache_ttl_secs: DEFAULT_VULN_CACHE_TTL_SECS,
        }
    }
}

impl SecurityConfig {
    /// Parse minimum severity level to VulnerabilitySeverity
    pub fn min_severity_level(&self) -> VulnerabilitySeverity {
        VulnerabilitySeverity::from_str_loose(&self.min_severity)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// NuGet endpoints and request limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub service_index_url: String,
    pub flat_container_url: String,
    pub registration_url: String,
    pub search_url: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Search results scanned when matching a package id
    pub search_take: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            service_index_url: DEFAULT_SERVICE_INDEX_URL.to_string(),
            flat_container_url: DEFAULT_FLAT_CONTAINER_URL.to_string(),
            registration_url: DEFAULT_REGISTRATION_URL.to_string(),
            search_url: DEFAULT_SEARCH_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            search_take: DEFAULT_SEARCH_TAKE,
        }
    }
}

impl RegistryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn endpoints(&self) -> NuGetEndpoints {
        NuGetEndpoints {
            service_index: self.service_index_url.clone(),
            flat_container: self.flat_container_url.trim_end_matches('/').to_string(),
            registration: self.registration_url.trim_end_matches('/').to_string(),
            search: self.search_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Fetch current-version metadata to surface deprecations
    pub fetch_metadata: bool,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            fetch_metadata: true,
        }
    }
}

impl Config {
    /// Load a JSON configuration file. Missing sections and fields take
    /// their defaults; an unreadable or malformed file is an error.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}
