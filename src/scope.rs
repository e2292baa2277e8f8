//! Scope grammar and wildcard matching.
//!
//! A scope names a resource or a class of resources:
//! `<resource>:[<attribute>:]<value>`, `<resource>:*` or `*`. A trailing `*`
//! placed directly after `:` or `/` grants every scope sharing the literal
//! prefix before it, so `dashboards:*` covers `dashboards:uid:abc` and
//! `path:folder/*` covers `path:folder/sub/dash`. Wildcards only broaden
//! downward: a grant on `path:a/b/c` never covers `path:a/b`.

use std::collections::HashSet;

use crate::errors::{AppError, AppResult};

/// The global wildcard.
pub const ALL: &str = "*";

/// Prefixes never have more than this many `:`-separated parts before the value.
const MAX_PREFIX_PARTS: usize = 2;

/// Joins non-empty parts with `:`.
pub fn build(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(":")
}

/// True when the scope ends in a wildcard marker.
pub fn is_wildcard(scope: &str) -> bool {
    scope == ALL || scope.ends_with(":*") || scope.ends_with("/*")
}

pub fn validate_scope(scope: &str) -> AppResult<()> {
    if scope.is_empty() {
        return Err(AppError::invalid_scope("scope must not be empty"));
    }

    let body = if is_wildcard(scope) {
        &scope[..scope.len() - 1]
    } else {
        scope
    };

    if body.contains(['*', '?']) {
        return Err(AppError::invalid_scope(scope));
    }

    Ok(())
}

pub fn is_valid(scope: &str) -> bool {
    validate_scope(scope).is_ok()
}

/// The literal prefix a valid wildcard scope grants, `None` for literal or invalid scopes.
pub fn wildcard_prefix(scope: &str) -> Option<&str> {
    if is_wildcard(scope) && is_valid(scope) {
        Some(&scope[..scope.len() - 1])
    } else {
        None
    }
}

/// Whether a granted scope covers the candidate scope.
pub fn matches(granted: &str, candidate: &str) -> bool {
    if granted == candidate {
        return true;
    }

    match wildcard_prefix(granted) {
        Some(prefix) => candidate.starts_with(prefix),
        None => false,
    }
}

/// The `index`-th `:`-separated part, empty when out of range.
///
/// `parameter("dashboards:uid:abc", 2)` is `abc`.
pub fn parameter(scope: &str, index: usize) -> &str {
    scope.split(':').nth(index).unwrap_or_default()
}

/// Everything up to and including the last prefix separator.
///
/// `dashboards:uid:abc` becomes `dashboards:uid:`, and values containing `:`
/// are cut after the second part: `datasources:uid:a:b` becomes `datasources:uid:`.
pub fn scope_prefix(scope: &str) -> String {
    let mut parts: Vec<&str> = scope.split(':').collect();
    if parts.len() > MAX_PREFIX_PARTS + 1 {
        parts.truncate(MAX_PREFIX_PARTS);
        parts.push("");
    } else if let Some(last) = parts.last_mut() {
        *last = "";
    }
    parts.join(":")
}

/// Every wildcard that would cover all scopes under `prefix`.
///
/// `dashboards:uid:` yields `*`, `dashboards:*` and `dashboards:uid:*`.
pub fn wildcards_from_prefix(prefix: &str) -> HashSet<String> {
    let mut wildcards = HashSet::from([ALL.to_string()]);
    let mut acc = String::with_capacity(prefix.len());
    for part in prefix.split(':').filter(|p| !p.is_empty()) {
        acc.push_str(part);
        acc.push(':');
        wildcards.insert(format!("{acc}*"));
    }
    wildcards
}

pub fn wildcards_from_prefixes<S: AsRef<str>>(prefixes: &[S]) -> HashSet<String> {
    let mut wildcards = HashSet::from([ALL.to_string()]);
    for prefix in prefixes {
        wildcards.extend(wildcards_from_prefix(prefix.as_ref()));
    }
    wildcards
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_always_succeeds() {
        for s in ["dashboards:uid:1", "*", "teams:*", "path:a/b/c", "odd*scope"] {
            assert!(matches(s, s), "{s} should match itself");
        }
    }

    #[test]
    fn global_wildcard_matches_everything() {
        assert!(matches("*", "dashboards:uid:1"));
        assert!(matches("*", "path:a/b"));
    }

    #[test]
    fn flat_wildcard_matches_shared_prefix() {
        assert!(matches("datasources:*", "datasources:uid:abc"));
        assert!(matches("datasources:uid:*", "datasources:uid:abc"));
        assert!(!matches("datasources:uid:*", "datasources:id:1"));
        assert!(!matches("datasources:*", "dashboards:uid:1"));
    }

    #[test]
    fn path_wildcard_only_grants_descendants() {
        assert!(matches("path:folder/*", "path:folder/sub/dash"));
        assert!(!matches("path:folder/*", "path:other/dash"));
        assert!(!matches("path:a/b/c", "path:a/b"));
        assert!(!matches("path:a/b/*", "path:a/b"));
    }

    #[test]
    fn narrower_grant_never_covers_broader_request() {
        assert!(!matches("dashboards:uid:*", "dashboards:*"));
        assert!(matches("dashboards:*", "dashboards:uid:*"));
    }

    #[test]
    fn star_without_separator_is_not_a_wildcard() {
        assert!(!matches("dash*", "dashboards:uid:1"));
        assert!(validate_scope("dash*").is_err());
        assert!(validate_scope("dashboards:*:uid").is_err());
        assert!(validate_scope("dashboards:uid:?").is_err());
        assert!(validate_scope("").is_err());
        assert!(validate_scope("dashboards:uid:*").is_ok());
        assert!(validate_scope("*").is_ok());
    }

    #[test]
    fn prefix_of_scope() {
        assert_eq!(scope_prefix("dashboards:uid:abc"), "dashboards:uid:");
        assert_eq!(scope_prefix("teams:id:1"), "teams:id:");
        assert_eq!(scope_prefix("users:self"), "users:");
        assert_eq!(scope_prefix("datasources:uid:a:b"), "datasources:uid:");
    }

    #[test]
    fn wildcards_cover_every_level_of_prefix() {
        let wildcards = wildcards_from_prefix("dashboards:uid:");
        let expected: HashSet<String> = ["*", "dashboards:*", "dashboards:uid:*"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(wildcards, expected);

        let merged = wildcards_from_prefixes(&["dashboards:uid:", "folders:uid:"]);
        assert!(merged.contains("folders:uid:*"));
        assert_eq!(merged.len(), 5);
    }

    #[test]
    fn parameter_picks_one_part() {
        assert_eq!(parameter("dashboards:uid:abc", 0), "dashboards");
        assert_eq!(parameter("dashboards:uid:abc", 2), "abc");
        assert_eq!(parameter("dashboards:uid:abc", 3), "");
    }

    #[test]
    fn build_skips_empty_parts() {
        assert_eq!(build(&["dashboards", "uid", "abc"]), "dashboards:uid:abc");
        assert_eq!(build(&["dashboards", "", "abc"]), "dashboards:abc");
        assert_eq!(build(&["dashboards", "*"]), "dashboards:*");
    }
}
