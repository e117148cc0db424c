//! Namespace selection.
//!
//! Turns the operator's comma-separated namespace list (which may contain
//! `*` and `?` wildcards) into the fixed `WatchSet` the engine observes.
//! Wildcards are resolved once, against a single namespace listing.

use std::collections::BTreeSet;
use std::fmt;

use regex::Regex;
use tracing::{info, warn};

use crate::cluster::ClusterClient;
use crate::error::{Error, Result};

/// The namespaces the engine observes, fixed for the process lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchSet {
    All,
    Namespaces(Vec<String>),
}

impl WatchSet {
    /// One scope per watcher task
    pub fn scopes(&self) -> Vec<NamespaceScope> {
        match self {
            WatchSet::All => vec![NamespaceScope::All],
            WatchSet::Namespaces(names) => names
                .iter()
                .cloned()
                .map(NamespaceScope::Namespace)
                .collect(),
        }
    }
}

impl fmt::Display for WatchSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchSet::All => write!(f, "all namespaces"),
            WatchSet::Namespaces(names) => write!(f, "[{}]", names.join(", ")),
        }
    }
}

/// What a single watcher subscribes to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NamespaceScope {
    All,
    Namespace(String),
}

impl fmt::Display for NamespaceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamespaceScope::All => write!(f, "all namespaces"),
            NamespaceScope::Namespace(ns) => write!(f, "namespace {ns}"),
        }
    }
}

/// Split a comma-separated list into trimmed, non-empty patterns
pub fn parse_patterns(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn has_wildcard(pattern: &str) -> bool {
    pattern.contains(['*', '?'])
}

/// Compile a glob pattern into an anchored regex
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');

    Regex::new(&expr).map_err(|e| Error::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// Match `existing` namespaces against `patterns`.
///
/// Literal patterns must match exactly. The result is sorted and free of
/// duplicates.
pub fn match_namespaces<S: AsRef<str>>(patterns: &[String], existing: &[S]) -> Result<Vec<String>> {
    let matchers = patterns
        .iter()
        .map(|p| glob_to_regex(p))
        .collect::<Result<Vec<_>>>()?;

    let resolved: BTreeSet<String> = existing
        .iter()
        .map(AsRef::as_ref)
        .filter(|ns| matchers.iter().any(|m| m.is_match(ns)))
        .map(str::to_string)
        .collect();

    Ok(resolved.into_iter().collect())
}

/// Resolve the operator's namespace patterns into a `WatchSet`.
///
/// No patterns means every namespace. Patterns without wildcards are used as
/// given and never touch the API server.
pub async fn resolve_watch_set<C>(patterns: &[String], client: &C) -> Result<WatchSet>
where
    C: ClusterClient + ?Sized,
{
    if patterns.is_empty() {
        info!("No namespaces specified, watching all namespaces");
        return Ok(WatchSet::All);
    }

    if !patterns.iter().any(|p| has_wildcard(p)) {
        let unique: BTreeSet<String> = patterns.iter().cloned().collect();
        return Ok(WatchSet::Namespaces(unique.into_iter().collect()));
    }

    let existing = client.list_namespaces().await?;
    let resolved = match_namespaces(patterns, &existing)?;

    if resolved.is_empty() {
        warn!(
            patterns = %patterns.join(","),
            "Namespace patterns did not match any existing namespace"
        );
        return Err(Error::NoMatchingNamespaces {
            patterns: patterns.join(", "),
        });
    }

    info!(
        count = resolved.len(),
        namespaces = %resolved.join(", "),
        "Wildcards resolved"
    );
    Ok(WatchSet::Namespaces(resolved))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterClient;

    fn patterns(raw: &str) -> Vec<String> {
        parse_patterns(raw)
    }

    #[test]
    fn test_parse_patterns() {
        assert_eq!(
            parse_patterns(" prod , staging,,app-* "),
            vec!["prod", "staging", "app-*"]
        );
        assert!(parse_patterns("").is_empty());
        assert!(parse_patterns(" , ").is_empty());
    }

    #[test]
    fn test_wildcard_matches_prefix() {
        let existing = ["app-dev", "app-prod", "infra"];
        assert_eq!(
            match_namespaces(&patterns("app-*"), &existing).unwrap(),
            vec!["app-dev", "app-prod"]
        );
    }

    #[test]
    fn test_match_is_anchored_and_deduplicated() {
        let existing = ["kube-system", "kube-public", "my-kube-tools", "app-x-dev", "app-dev"];
        assert_eq!(
            match_namespaces(&patterns("kube-*,*-system"), &existing).unwrap(),
            vec!["kube-public", "kube-system"]
        );
        assert_eq!(
            match_namespaces(&patterns("app-*-dev"), &existing).unwrap(),
            vec!["app-x-dev"]
        );
        assert_eq!(
            match_namespaces(&patterns("app-?ev"), &existing).unwrap(),
            vec!["app-dev"]
        );
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let existing = ["a.b", "axb"];
        assert_eq!(
            match_namespaces(&patterns("a.*"), &existing).unwrap(),
            vec!["a.b"]
        );
    }

    #[tokio::test]
    async fn test_empty_input_watches_all() {
        let mut client = MockClusterClient::new();
        client.expect_list_namespaces().never();
        assert_eq!(resolve_watch_set(&[], &client).await.unwrap(), WatchSet::All);
    }

    #[tokio::test]
    async fn test_literal_patterns_skip_listing() {
        let mut client = MockClusterClient::new();
        client.expect_list_namespaces().never();
        let set = resolve_watch_set(&patterns("staging,prod,prod"), &client)
            .await
            .unwrap();
        assert_eq!(
            set,
            WatchSet::Namespaces(vec!["prod".to_string(), "staging".to_string()])
        );
    }

    #[tokio::test]
    async fn test_wildcards_resolve_against_listing() {
        let mut client = MockClusterClient::new();
        client.expect_list_namespaces().times(1).returning(|| {
            Ok(vec![
                "app-dev".to_string(),
                "app-prod".to_string(),
                "infra".to_string(),
            ])
        });
        let set = resolve_watch_set(&patterns("app-*"), &client).await.unwrap();
        assert_eq!(
            set,
            WatchSet::Namespaces(vec!["app-dev".to_string(), "app-prod".to_string()])
        );
        assert_eq!(set.scopes().len(), 2);
    }

    #[tokio::test]
    async fn test_unmatched_wildcards_are_an_error() {
        let mut client = MockClusterClient::new();
        client
            .expect_list_namespaces()
            .returning(|| Ok(vec!["infra".to_string()]));
        let err = resolve_watch_set(&patterns("app-*"), &client)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoMatchingNamespaces { .. }));
    }

    #[test]
    fn test_watch_set_display() {
        assert_eq!(WatchSet::All.to_string(), "all namespaces");
        assert_eq!(
            WatchSet::Namespaces(vec!["a".to_string(), "b".to_string()]).to_string(),
            "[a, b]"
        );
        assert_eq!(WatchSet::All.scopes(), vec![NamespaceScope::All]);
    }
}
