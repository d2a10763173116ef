//! Diff and apply of namespace labels.
//!
//! The operator records the keys it applied in a namespace annotation. Only
//! those keys are ever retracted, so labels set by other actors survive every
//! reconcile. Protected keys are never touched in either direction.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use super::policy::ProtectedPrefixes;
use crate::tasks::store::LabelStore;
use crate::tasks::types::Result;

/// Outcome of comparing a namespace's labels with the desired labels
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelPlan {
    /// Full label map the namespace should carry
    pub labels: BTreeMap<String, String>,
    /// Keys the operator owns once `labels` is written
    pub managed_keys: BTreeSet<String>,
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

impl LabelPlan {
    #[must_use]
    pub fn has_label_changes(&self) -> bool {
        !(self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty())
    }
}

/// Compute the label map a namespace should carry.
///
/// Starting from `current`, every unprotected key the operator previously
/// applied that is no longer desired is removed, then every unprotected desired
/// key is inserted or overwritten.
#[must_use]
pub fn plan_labels(
    current: &BTreeMap<String, String>,
    previously_managed: &BTreeSet<String>,
    desired: &BTreeMap<String, String>,
    prefixes: &ProtectedPrefixes,
) -> LabelPlan {
    let mut labels = current.clone();
    let mut plan = LabelPlan::default();

    labels.retain(|key, _| {
        let retract = !prefixes.is_protected(key)
            && !desired.contains_key(key)
            && previously_managed.contains(key);
        if retract {
            plan.removed.push(key.clone());
        }
        !retract
    });

    for (key, value) in desired {
        if prefixes.is_protected(key) {
            continue;
        }
        match labels.insert(key.clone(), value.clone()) {
            None => plan.added.push(key.clone()),
            Some(old) if old != *value => plan.updated.push(key.clone()),
            Some(_) => {}
        }
        plan.managed_keys.insert(key.clone());
    }

    plan.labels = labels;
    plan
}

/// Exact equality: same size and the same value for every key
fn labels_equal(a: &BTreeMap<String, String>, b: &BTreeMap<String, String>) -> bool {
    a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v))
}

/// Keys listed in the ownership annotation
#[must_use]
pub fn managed_keys(namespace: &Namespace, annotation: &str) -> BTreeSet<String> {
    namespace
        .annotations()
        .get(annotation)
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn encode_managed_keys(keys: &BTreeSet<String>) -> Option<String> {
    if keys.is_empty() {
        None
    } else {
        Some(keys.iter().cloned().collect::<Vec<_>>().join(","))
    }
}

/// Bring `namespace` to `desired` with at most one update call.
///
/// Returns whether an update was written. Nothing is considered applied unless
/// the update itself succeeds.
#[instrument(skip(store, namespace, desired, prefixes), fields(namespace = %namespace.name_any()))]
pub async fn reconcile_labels(
    store: &dyn LabelStore,
    namespace: &Namespace,
    desired: &BTreeMap<String, String>,
    prefixes: &ProtectedPrefixes,
    managed_keys_annotation: &str,
) -> Result<bool> {
    let current = namespace.labels();
    let previously_managed = managed_keys(namespace, managed_keys_annotation);
    let plan = plan_labels(current, &previously_managed, desired, prefixes);

    let current_annotation = namespace.annotations().get(managed_keys_annotation).cloned();
    let next_annotation = encode_managed_keys(&plan.managed_keys);

    if labels_equal(&plan.labels, current) && current_annotation == next_annotation {
        debug!("Namespace labels already up to date, no changes needed");
        return Ok(false);
    }

    let mut updated = namespace.clone();
    updated.metadata.labels = Some(plan.labels.clone());
    let annotations = updated.metadata.annotations.get_or_insert_with(BTreeMap::new);
    match next_annotation {
        Some(value) => {
            annotations.insert(managed_keys_annotation.to_string(), value);
        }
        None => {
            annotations.remove(managed_keys_annotation);
        }
    }

    store.update_namespace(&updated).await?;
    info!(
        added = ?plan.added,
        updated = ?plan.updated,
        removed = ?plan.removed,
        "Updated namespace labels"
    );
    Ok(true)
}
