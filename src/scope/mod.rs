//! Scope coverage checks.
//!
//! A granted scope covers a required one when they are equal, or when the granted
//! scope is a documented broader scope of the same resource family. The relation
//! is followed transitively (`calendar` covers `calendar.events.readonly`).

use std::collections::BTreeSet;

/// Set of OAuth permission strings.
pub type ScopeSet = BTreeSet<String>;

const GOOGLE_AUTH: &str = "https://www.googleapis.com/auth/";

/// Full-URL Google scope for a short name (`calendar.readonly`).
pub fn google_scope(short: &str) -> String {
    format!("{}{}", GOOGLE_AUTH, short)
}

/// Broader scope → the scopes it directly implies.
const IMPLIES: &[(&str, &[&str])] = &[
    ("calendar", &["calendar.readonly", "calendar.events"]),
    ("calendar.readonly", &["calendar.events.readonly"]),
    ("calendar.events", &["calendar.events.readonly"]),
    ("drive", &["drive.readonly", "drive.file", "drive.metadata"]),
    ("drive.readonly", &["drive.metadata.readonly"]),
    ("drive.metadata", &["drive.metadata.readonly"]),
];

fn implied_by(scope: &str) -> &'static [&'static str] {
    let Some(short) = scope.strip_prefix(GOOGLE_AUTH) else {
        return &[];
    };
    IMPLIES
        .iter()
        .find(|(broader, _)| *broader == short)
        .map(|(_, narrower)| *narrower)
        .unwrap_or(&[])
}

/// Whether one granted scope satisfies one required scope.
pub fn scope_covers(granted: &str, required: &str) -> bool {
    if granted == required {
        return true;
    }
    implied_by(granted)
        .iter()
        .any(|narrower| scope_covers(&google_scope(narrower), required))
}

/// Whether `granted` satisfies every scope in `required`.
///
/// Reflexive: `covers(s, s)` always holds. An empty `required` is always covered;
/// an empty `granted` covers nothing else.
pub fn covers(granted: &ScopeSet, required: &ScopeSet) -> bool {
    required
        .iter()
        .all(|r| granted.iter().any(|g| scope_covers(g, r)))
}

/// Required scopes that nothing in `granted` covers.
pub fn missing(granted: &ScopeSet, required: &ScopeSet) -> Vec<String> {
    required
        .iter()
        .filter(|r| !granted.iter().any(|g| scope_covers(g, r)))
        .cloned()
        .collect()
}

/// Splits a provider `scope` field (space-delimited, RFC 6749 §3.3).
pub fn parse_scope_list(raw: &str) -> ScopeSet {
    raw.split_whitespace().map(str::to_string).collect()
}
