//! Small string helpers shared by the CLI and the reports

/// Truncates a string to at most `max_chars` characters, the last three of
/// which become `...` when the string is cut.
///
/// Counts characters, not bytes, so multi-byte text is never split.
pub fn truncate_string(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }

    let keep_chars = max_chars.saturating_sub(3);
    let truncated: String = s.chars().take(keep_chars).collect();
    format!("{}...", truncated)
}

/// Split a `Package.Id@1.2.3` argument into id and version.
///
/// Returns `None` when either side is empty or the `@` is missing.
pub fn parse_package_spec(spec: &str) -> Option<(String, String)> {
    let (id, version) = spec.trim().rsplit_once('@')?;
    let (id, version) = (id.trim(), version.trim());
    if id.is_empty() || version.is_empty() {
        return None;
    }
    Some((id.to_string(), version.to_string()))
}

/// Compact download count: `950`, `12.3K`, `4.1M`, `2.0B`.
pub fn format_downloads(count: u64) -> String {
    const UNITS: [(u64, &str); 3] = [(1_000_000_000, "B"), (1_000_000, "M"), (1_000, "K")];

    UNITS
        .iter()
        .find(|(scale, _)| count >= *scale)
        .map(|(scale, unit)| format!("{:.1}{}", count as f64 / *scale as f64, unit))
        .unwrap_or_else(|| count.to_string())
}
