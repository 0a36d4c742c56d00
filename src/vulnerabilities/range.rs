//! Interval notation for vulnerable version ranges
//!
//! The feed publishes affected versions as NuGet intervals: `[1.0.0, 2.0.0)`,
//! `(, 3.1.4]`, `[5.0.0, )` or the exact form `[1.2.3]`. Square brackets are
//! inclusive, parentheses exclusive, and an empty bound is unbounded.

use std::cmp::Ordering;

use crate::registries::version_utils::compare_versions;

/// A parsed version interval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    pub min: Option<String>,
    pub min_inclusive: bool,
    pub max: Option<String>,
    pub max_inclusive: bool,
}

impl VersionRange {
    /// Parse interval notation. Anything else, including a bare version
    /// without brackets, yields `None`.
    pub fn parse(range: &str) -> Option<Self> {
        let range = range.trim();
        let min_inclusive = match range.chars().next()? {
            '[' => true,
            '(' => false,
            _ => return None,
        };
        let max_inclusive = match range.chars().last()? {
            ']' => true,
            ')' => false,
            _ => return None,
        };
        if range.len() < 2 {
            return None;
        }
        let inner = &range[1..range.len() - 1];

        let Some((min, max)) = inner.split_once(',') else {
            // `[1.2.3]` pins a single version
            let exact = inner.trim();
            if exact.is_empty() || !min_inclusive || !max_inclusive {
                return None;
            }
            return Some(Self {
                min: Some(exact.to_string()),
                min_inclusive,
                max: Some(exact.to_string()),
                max_inclusive,
            });
        };

        if max.contains(',') {
            return None;
        }

        let bound = |s: &str| {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        };

        Some(Self {
            min: bound(min),
            min_inclusive,
            max: bound(max),
            max_inclusive,
        })
    }

    /// Whether `version` falls inside the interval
    pub fn contains(&self, version: &str) -> bool {
        let above_min = self.min.as_deref().is_none_or(|min| {
            match compare_versions(version, min) {
                Ordering::Greater => true,
                Ordering::Equal => self.min_inclusive,
                Ordering::Less => false,
            }
        });
        let below_max = self.max.as_deref().is_none_or(|max| {
            match compare_versions(version, max) {
                Ordering::Less => true,
                Ordering::Equal => self.max_inclusive,
                Ordering::Greater => false,
            }
        });
        above_min && below_max
    }

    /// Human-readable form, or `None` when the interval is unbounded on both
    /// sides.
    pub fn describe(&self) -> Option<String> {
        let lower = self.min.as_deref().map(|min| {
            let op = if self.min_inclusive { ">=" } else { ">" };
            format!("{op} {min}")
        });
        let upper = self.max.as_deref().map(|max| {
            let op = if self.max_inclusive { "<=" } else { "<" };
            format!("{op} {max}")
        });

        match (lower, upper) {
            _ if self.min.is_some()
                && self.min == self.max
                && self.min_inclusive
                && self.max_inclusive =>
            {
                self.min.as_deref().map(|v| format!("Exact {v}"))
            }
            (Some(lower), Some(upper)) => Some(format!("{lower} && {upper}")),
            (Some(bound), None) | (None, Some(bound)) => Some(bound),
            (None, None) => None,
        }
    }
}

/// Whether `version` falls in the interval `range`. Unparseable ranges match
/// nothing.
pub fn is_in_range(version: &str, range: &str) -> bool {
    match VersionRange::parse(range) {
        Some(parsed) => parsed.contains(version),
        None => {
            tracing::debug!("Ignoring unparseable vulnerability range {:?}", range);
            false
        }
    }
}

/// Render a range for display, falling back to the raw string.
pub fn format_range(range: &str) -> String {
    VersionRange::parse(range)
        .and_then(|parsed| parsed.describe())
        .unwrap_or_else(|| range.to_string())
}
