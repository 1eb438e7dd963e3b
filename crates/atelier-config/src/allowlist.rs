use std::collections::HashSet;

/// Parse the global connector allowlist CSV.
///
/// Returns `None` when unset or blank, meaning every connector is admitted.
/// Entries are trimmed and lowercased to match normalized connector ids.
pub fn parse_connector_allowlist(raw: Option<&str>) -> Option<HashSet<String>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    let allowlist: HashSet<String> = raw
        .split(',')
        .map(|entry| entry.trim().to_lowercase())
        .filter(|entry| !entry.is_empty())
        .collect();
    if allowlist.is_empty() {
        None
    } else {
        Some(allowlist)
    }
}
