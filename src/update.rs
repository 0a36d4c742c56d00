//! Update classification
//!
//! Labels the step from an installed version to a candidate version so the
//! editor can colour it (major in red, minor in yellow, and so on) and decides
//! which version an "upgrade all" moves each package to.

use std::fmt;

use serde::Serialize;

use crate::registries::version_utils::{ParsedVersion, compare_versions, is_prerelease};

/// Kind of change between an installed version and a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    None,
    Patch,
    Minor,
    Major,
    Prerelease,
}

impl UpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::None => "none",
            UpdateKind::Patch => "patch",
            UpdateKind::Minor => "minor",
            UpdateKind::Major => "major",
            UpdateKind::Prerelease => "prerelease",
        }
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const SEMVER_KINDS: [UpdateKind; 3] = [UpdateKind::Major, UpdateKind::Minor, UpdateKind::Patch];

/// Classify the step from `current` to `candidate`.
///
/// The first of major, minor and patch where the candidate is larger decides
/// the kind. Moving onto a pre-release from a stable version is always
/// [`UpdateKind::Prerelease`].
pub fn classify_update(current: &str, candidate: &str) -> UpdateKind {
    // NuGet versions are case-insensitive
    if candidate.is_empty() || current.eq_ignore_ascii_case(candidate) {
        return UpdateKind::None;
    }

    let current = ParsedVersion::parse(current);
    let candidate = ParsedVersion::parse(candidate);

    if candidate.is_prerelease() && !current.is_prerelease() {
        return UpdateKind::Prerelease;
    }

    for (index, kind) in SEMVER_KINDS.into_iter().enumerate() {
        if candidate.component(index) > current.component(index) {
            return kind;
        }
    }

    if candidate.cmp_components(&current).is_eq()
        && candidate.is_prerelease()
        && current.is_prerelease()
    {
        return UpdateKind::Prerelease;
    }

    UpdateKind::Patch
}

/// Target version for "upgrade all".
///
/// A stable pin only ever moves to a stable release. A pre-release pin moves
/// to whichever of the latest stable and latest pre-release is newer.
pub fn upgrade_candidate<'a>(
    current: &str,
    latest_stable: Option<&'a str>,
    latest_prerelease: Option<&'a str>,
) -> Option<&'a str> {
    if is_prerelease(current) {
        match (latest_stable, latest_prerelease) {
            (Some(stable), Some(pre)) => {
                Some(if compare_versions(pre, stable).is_gt() { pre } else { stable })
            }
            (stable, pre) => stable.or(pre),
        }
    } else {
        latest_stable.filter(|v| !is_prerelease(v))
    }
}
