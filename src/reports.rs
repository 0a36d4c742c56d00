//! Report generation for resolution results
//!
//! Renders a batch of [`PackageResolution`]s as a terminal summary, JSON or
//! Markdown.

use std::fmt::Write as _;

use serde::Serialize;

use crate::registries::{PackageMetadata, VulnerabilitySeverity};
use crate::resolver::PackageResolution;
use crate::update::UpdateKind;
use crate::utils::{format_downloads, truncate_string};
use crate::vulnerabilities::format_range;

/// Descriptions longer than this are cut in summaries
const MAX_DESCRIPTION_CHARS: usize = 120;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionSummary {
    pub packages: u32,
    pub outdated: u32,
    pub failed: u32,
    pub deprecated: u32,
    pub vulnerabilities: u32,
    pub critical: u32,
    pub high: u32,
    pub moderate: u32,
    pub low: u32,
}

impl ResolutionSummary {
    pub fn from_results(results: &[PackageResolution]) -> Self {
        let mut summary = Self::default();
        for result in results {
            summary.packages += 1;
            if result.update_available {
                summary.outdated += 1;
            }
            if result.lookup_failed {
                summary.failed += 1;
            }
            if result.deprecation.is_some() {
                summary.deprecated += 1;
            }
            for vuln in &result.vulnerabilities {
                summary.vulnerabilities += 1;
                match vuln.severity {
                    VulnerabilitySeverity::Critical => summary.critical += 1,
                    VulnerabilitySeverity::High => summary.high += 1,
                    VulnerabilitySeverity::Moderate => summary.moderate += 1,
                    VulnerabilitySeverity::Low => summary.low += 1,
                }
            }
        }
        summary
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    summary: ResolutionSummary,
    packages: &'a [PackageResolution],
}

fn severity_icon(severity: VulnerabilitySeverity) -> &'static str {
    match severity {
        VulnerabilitySeverity::Critical => "⚠",
        VulnerabilitySeverity::High => "▲",
        VulnerabilitySeverity::Moderate => "●",
        VulnerabilitySeverity::Low => "○",
    }
}

/// Short status label for one package, as an inline hint would show it
pub fn status_label(result: &PackageResolution) -> String {
    if result.lookup_failed {
        return "? unknown".to_string();
    }

    let mut label = match (result.update_kind, result.upgrade_target()) {
        (UpdateKind::None, _) => "✓".to_string(),
        (kind, Some(target)) => format!("⬆ {} ({})", target, kind),
        (kind, None) => format!("⬆ ({})", kind),
    };
    if result.deprecation.is_some() {
        label.push_str(" ⚠ deprecated");
    }
    if result.is_vulnerable() {
        let _ = write!(label, " ⚠ {} vuln", result.vulnerabilities.len());
        if result.vulnerabilities.len() > 1 {
            label.push('s');
        }
    }
    label
}

pub fn generate_summary_report(results: &[PackageResolution]) -> String {
    let summary = ResolutionSummary::from_results(results);
    let mut out = String::new();

    let width = results
        .iter()
        .map(|r| r.package.chars().count())
        .max()
        .unwrap_or(0);

    for result in results {
        let _ = writeln!(
            out,
            "  {:<width$}  {:<14} {}",
            result.package,
            result.current_version,
            status_label(result),
        );
        if let Some(pre) = &result.latest_prerelease {
            let _ = writeln!(out, "  {:<width$}  {:<14} pre-release: {}", "", "", pre);
        }
    }

    let _ = writeln!(out, "\n  Packages:   {}", summary.packages);
    let _ = writeln!(out, "  Outdated:   {}", summary.outdated);
    let _ = writeln!(out, "  Deprecated: {}", summary.deprecated);
    if summary.failed > 0 {
        let _ = writeln!(out, "  Failed:     {}", summary.failed);
    }
    let _ = writeln!(
        out,
        "  Vulnerabilities: {} (⚠ {} critical, ▲ {} high, ● {} moderate, ○ {} low)",
        summary.vulnerabilities, summary.critical, summary.high, summary.moderate, summary.low
    );

    out
}

pub fn generate_json_report(results: &[PackageResolution]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&JsonReport {
        summary: ResolutionSummary::from_results(results),
        packages: results,
    })
}

pub fn generate_markdown_report(results: &[PackageResolution]) -> String {
    let summary = ResolutionSummary::from_results(results);

    let mut lines = vec![
        "# Dependency Report".to_string(),
        String::new(),
        format!("**Date**: {}", chrono::Local::now().format("%Y-%m-%d")),
        String::new(),
        "## Packages".to_string(),
        String::new(),
        "| Package | Installed | Latest | Pre-release | Update |".to_string(),
        "|---------|-----------|--------|-------------|--------|".to_string(),
    ];

    for result in results {
        let update = if result.lookup_failed {
            "unknown".to_string()
        } else {
            result.update_kind.to_string()
        };
        lines.push(format!(
            "| {} | {} | {} | {} | {} |",
            result.package,
            result.current_version,
            result.latest_stable.as_deref().unwrap_or("-"),
            result.latest_prerelease.as_deref().unwrap_or("-"),
            update
        ));
    }

    lines.extend([
        String::new(),
        "## Vulnerability Summary".to_string(),
        "| Severity | Count |".to_string(),
        "|----------|-------|".to_string(),
        format!("| ⚠ Critical | {} |", summary.critical),
        format!("| ▲ High | {} |", summary.high),
        format!("| ● Moderate | {} |", summary.moderate),
        format!("| ○ Low | {} |", summary.low),
        format!("| **Total** | **{}** |", summary.vulnerabilities),
        String::new(),
    ]);

    let vulnerable: Vec<_> = results.iter().filter(|r| r.is_vulnerable()).collect();
    if vulnerable.is_empty() {
        lines.push("✅ No installed version has a known vulnerability.".to_string());
    } else {
        lines.push("## Vulnerabilities".to_string());
        lines.push(String::new());
        for result in vulnerable {
            lines.push(format!("### {}@{}", result.package, result.current_version));
            lines.push(String::new());
            for vuln in &result.vulnerabilities {
                lines.push(format!(
                    "- **[{}]({})** ({} {}): affects {}",
                    vuln.severity.as_str().to_uppercase(),
                    vuln.url,
                    severity_icon(vuln.severity),
                    vuln.severity.as_str(),
                    format_range(&vuln.affected_range)
                ));
            }
            lines.push(String::new());
        }
    }

    let deprecated: Vec<_> = results.iter().filter(|r| r.deprecation.is_some()).collect();
    if !deprecated.is_empty() {
        lines.push("## Deprecated".to_string());
        lines.push(String::new());
        for result in deprecated {
            let Some(deprecation) = &result.deprecation else {
                continue;
            };
            let mut line = format!("- **{}**", result.package);
            if !deprecation.reasons.is_empty() {
                let _ = write!(line, ": {}", deprecation.reasons.join(", "));
            }
            if let Some(alternate) = &deprecation.alternate_package {
                let _ = write!(line, " (use {} instead)", alternate);
            }
            lines.push(line);
        }
    }

    lines.join("\n")
}

/// Multi-line description of one package version
pub fn format_metadata(metadata: &PackageMetadata) -> String {
    let mut lines = vec![format!("{} {}", metadata.id, metadata.version)];

    if let Some(description) = &metadata.description {
        lines.push(truncate_string(description.trim(), MAX_DESCRIPTION_CHARS));
    }
    if !metadata.authors.is_empty() {
        lines.push(format!("Authors:   {}", metadata.authors.join(", ")));
    }
    if let Some(license) = &metadata.license {
        lines.push(format!("License:   {}", license));
    }
    if let Some(url) = &metadata.project_url {
        lines.push(format!("Project:   {}", url));
    }
    if let Some(downloads) = metadata.total_downloads {
        lines.push(format!("Downloads: {}", format_downloads(downloads)));
    }
    if metadata.verified == Some(true) {
        lines.push("Verified:  yes (reserved prefix)".to_string());
    }
    if let Some(published) = metadata.published {
        lines.push(format!("Published: {}", published.format("%Y-%m-%d")));
    }
    if !metadata.tags.is_empty() {
        lines.push(format!("Tags:      {}", metadata.tags.join(" ")));
    }
    if let Some(deprecation) = &metadata.deprecation {
        let mut line = "Deprecated".to_string();
        if !deprecation.reasons.is_empty() {
            let _ = write!(line, ": {}", deprecation.reasons.join(", "));
        }
        if let Some(message) = &deprecation.message {
            let _ = write!(line, " ({})", message);
        }
        if let Some(alternate) = &deprecation.alternate_package {
            let _ = write!(line, ", use {} instead", alternate);
        }
        lines.push(line);
    }

    lines.join("\n")
}
