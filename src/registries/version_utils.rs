//! Version parsing and comparison utilities.
//!
//! NuGet version strings are compared with a permissive ordering rather than
//! strict SemVer: dot-separated numeric components of any length, an optional
//! pre-release label after the first hyphen, and zero for any component that
//! is not purely numeric. Every ordering decision in the crate goes through
//! [`compare_versions`].

use std::cmp::Ordering;

/// A version string split into its numeric components and pre-release label.
///
/// Equality follows the ordering, so `1.2` equals `1.2.0`.
#[derive(Debug, Clone)]
pub struct ParsedVersion<'a> {
    /// Dot-separated numeric components; non-numeric segments are zero.
    pub components: Vec<u64>,
    /// Everything after the first hyphen, if present.
    pub prerelease: Option<&'a str>,
}

impl<'a> ParsedVersion<'a> {
    /// Parse a version string.
    ///
    /// Build metadata (`+...`) is ignored. This never fails: unparseable
    /// segments coerce to zero.
    pub fn parse(version: &'a str) -> Self {
        let version = version.trim();
        let version = version.split_once('+').map_or(version, |(v, _)| v);
        let (base, prerelease) = match version.split_once('-') {
            Some((base, label)) => (base, Some(label)),
            None => (version, None),
        };

        let components = base
            .split('.')
            .map(|segment| segment.parse::<u64>().unwrap_or(0))
            .collect();

        Self {
            components,
            prerelease,
        }
    }

    /// Component at `index`, with missing trailing components read as zero.
    pub fn component(&self, index: usize) -> u64 {
        self.components.get(index).copied().unwrap_or(0)
    }

    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }

    /// Compare numeric components only, ignoring any label.
    pub fn cmp_components(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl Ord for ParsedVersion<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_components(other)
            .then_with(|| match (self.prerelease, other.prerelease) {
                (None, None) => Ordering::Equal,
                // Stable beats pre-release at the same numeric base
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => compare_labels(a, b),
            })
    }
}

impl PartialEq for ParsedVersion<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for ParsedVersion<'_> {}

impl PartialOrd for ParsedVersion<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Case-insensitive label ordering. NuGet treats `1.0.0-RC1` and
/// `1.0.0-rc1` as the same version.
fn compare_labels(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

/// Total order over version strings.
///
/// ```
/// use std::cmp::Ordering;
/// use nuget_lens::registries::version_utils::compare_versions;
///
/// assert_eq!(compare_versions("2.0.0", "2.0.0-preview.1"), Ordering::Greater);
/// assert_eq!(compare_versions("1.2", "1.2.0"), Ordering::Equal);
/// ```
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    ParsedVersion::parse(a).cmp(&ParsedVersion::parse(b))
}

/// Checks if a version carries a pre-release label.
pub fn is_prerelease(version: &str) -> bool {
    ParsedVersion::parse(version).is_prerelease()
}

/// Sort versions newest first.
pub fn sort_descending(versions: &mut [String]) {
    versions.sort_by(|a, b| compare_versions(b, a));
}

/// Normalize a version as declared in a manifest.
///
/// Strips surrounding whitespace and the exact-pin brackets NuGet allows
/// (`[1.2.3]`). Open ranges are returned unchanged.
pub fn normalize_declared_version(version: &str) -> String {
    let version = version.trim();
    version
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .filter(|inner| !inner.contains(','))
        .map_or(version, str::trim)
        .to_string()
}
