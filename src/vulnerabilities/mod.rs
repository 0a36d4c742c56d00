//! Vulnerability lookups against the NuGet vulnerability feed
//!
//! [`VulnerabilityIndex`] mirrors the feed in memory and answers which
//! advisories affect one exact package version; [`range`] parses the interval
//! notation the feed uses for affected versions.

pub mod cache;
pub mod range;

pub use cache::VulnerabilityIndex;
pub use range::{VersionRange, format_range, is_in_range};
