//! Protected label prefixes.
//!
//! A key is protected when it starts with any configured prefix. This is a
//! plain string prefix test: `kubernetes.io/` protects `kubernetes.io/name`
//! but not `sub.kubernetes.io/name`.

use std::collections::{BTreeMap, BTreeSet};

/// Set of label key prefixes the operator never sets, overrides or clears
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtectedPrefixes(BTreeSet<String>);

impl ProtectedPrefixes {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(prefixes.into_iter().map(Into::into).collect())
    }

    /// Prefixes stored as the keys of a record's data (values are ignored)
    #[must_use]
    pub fn from_record_data(data: &BTreeMap<String, String>) -> Self {
        Self(data.keys().cloned().collect())
    }

    /// Record data representation, one empty value per prefix
    #[must_use]
    pub fn to_record_data(&self) -> BTreeMap<String, String> {
        self.0.iter().map(|p| (p.clone(), String::new())).collect()
    }

    #[must_use]
    pub fn is_protected(&self, key: &str) -> bool {
        self.0.iter().any(|prefix| key.starts_with(prefix.as_str()))
    }

    /// First key in `labels` that falls under a protected prefix
    pub fn first_violation<'a, I>(&self, keys: I) -> Option<&'a str>
    where
        I: IntoIterator<Item = &'a String>,
    {
        keys.into_iter()
            .map(String::as_str)
            .find(|key| self.is_protected(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Whether `key` starts with any prefix in `prefixes`
#[must_use]
pub fn is_protected(key: &str, prefixes: &ProtectedPrefixes) -> bool {
    prefixes.is_protected(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> ProtectedPrefixes {
        ProtectedPrefixes::new(["k8s.io/", "kubernetes.io/", "openshift.io/"])
    }

    #[test]
    fn matches_plain_prefixes() {
        let prefixes = defaults();
        assert!(is_protected("kubernetes.io/metadata.name", &prefixes));
        assert!(is_protected("k8s.io/team", &prefixes));
        assert!(is_protected("openshift.io/node-selector", &prefixes));
        assert!(!is_protected("team", &prefixes));
        assert!(!is_protected("app.kubernetes.io/name", &prefixes));
    }

    #[test]
    fn empty_set_protects_nothing() {
        let prefixes = ProtectedPrefixes::default();
        assert!(prefixes.is_empty());
        assert!(!is_protected("kubernetes.io/metadata.name", &prefixes));
        assert!(!is_protected("", &prefixes));
    }

    #[test]
    fn record_data_round_trip_keeps_keys_only() {
        let mut data = BTreeMap::new();
        data.insert("k8s.io/".to_string(), String::new());
        data.insert("corp.example/".to_string(), "ignored".to_string());

        let prefixes = ProtectedPrefixes::from_record_data(&data);
        assert_eq!(prefixes.len(), 2);
        assert_eq!(
            prefixes.to_record_data().get("corp.example/"),
            Some(&String::new())
        );
    }

    #[test]
    fn first_violation_reports_protected_key() {
        let labels: BTreeMap<String, String> = [
            ("env".to_string(), "prod".to_string()),
            ("k8s.io/team".to_string(), "a".to_string()),
        ]
        .into_iter()
        .collect();
        assert_eq!(defaults().first_violation(labels.keys()), Some("k8s.io/team"));
        assert_eq!(ProtectedPrefixes::default().first_violation(labels.keys()), None);
    }
}
