//! Finalizer-guarded lifecycle of a `NamespaceLabel`.
//!
//! ```text
//! Unregistered --attach finalizer--> Active --deletion requested--> Deleting
//!                                                                     |
//!                 retract labels, then remove finalizer               v
//!                                                                 Finalized
//! ```
//!
//! The finalizer is only removed after the namespace update retracting the
//! resource's labels has succeeded. A failure anywhere before that leaves the
//! resource in `Deleting` and the next reconcile repeats the transition.

use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use super::diff::reconcile_labels;
use super::merge::merge_labels;
use super::policy::ProtectedPrefixes;
use crate::crds::NamespaceLabel;
use crate::tasks::store::LabelStore;
use crate::tasks::types::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Not yet observed by the operator, no finalizer
    Unregistered,
    /// Finalizer present, included in merges
    Active,
    /// Deletion requested, finalizer still present
    Deleting,
    /// Deletion requested and finalizer gone; the API server removes it
    Finalized,
}

impl LifecycleState {
    #[must_use]
    pub fn of(intent: &NamespaceLabel, finalizer: &str) -> Self {
        match (intent.is_deleting(), intent.has_finalizer(finalizer)) {
            (false, false) => Self::Unregistered,
            (false, true) => Self::Active,
            (true, true) => Self::Deleting,
            (true, false) => Self::Finalized,
        }
    }
}

fn same_identity(a: &NamespaceLabel, b: &NamespaceLabel) -> bool {
    a.name_any() == b.name_any() && a.namespace() == b.namespace()
}

/// Attach the finalizer if missing. Returns whether an update was issued.
#[instrument(skip(store, intent), fields(namespace_label = %intent.name_any()))]
pub async fn ensure_finalizer(
    store: &dyn LabelStore,
    intent: &NamespaceLabel,
    finalizer: &str,
) -> Result<bool> {
    if LifecycleState::of(intent, finalizer) != LifecycleState::Unregistered {
        return Ok(false);
    }

    let mut guarded = intent.clone();
    guarded
        .metadata
        .finalizers
        .get_or_insert_with(Vec::new)
        .push(finalizer.to_string());
    store.update_intent(&guarded).await?;
    debug!(%finalizer, "Added finalizer");
    Ok(true)
}

/// Remove the finalizer if present. Returns whether an update was issued.
#[instrument(skip(store, intent), fields(namespace_label = %intent.name_any()))]
pub async fn remove_finalizer(
    store: &dyn LabelStore,
    intent: &NamespaceLabel,
    finalizer: &str,
) -> Result<bool> {
    if !intent.has_finalizer(finalizer) {
        return Ok(false);
    }

    let mut released = intent.clone();
    if let Some(finalizers) = released.metadata.finalizers.as_mut() {
        finalizers.retain(|f| f != finalizer);
    }
    store.update_intent(&released).await?;
    debug!(%finalizer, "Removed finalizer");
    Ok(true)
}

/// Drive a deleting `NamespaceLabel` from `Deleting` to `Finalized`.
///
/// `siblings` is the freshly listed sibling set; the deleting resource is
/// excluded from it before merging. Returns whether the namespace changed.
#[instrument(skip_all, fields(namespace_label = %intent.name_any(), namespace = %namespace.name_any()))]
pub async fn finalize_deletion(
    store: &dyn LabelStore,
    intent: &NamespaceLabel,
    namespace: &Namespace,
    siblings: &[NamespaceLabel],
    prefixes: &ProtectedPrefixes,
    finalizer: &str,
    managed_keys_annotation: &str,
) -> Result<bool> {
    if LifecycleState::of(intent, finalizer) != LifecycleState::Deleting {
        debug!("No finalizer to release, nothing to clean up");
        return Ok(false);
    }

    let remaining: Vec<NamespaceLabel> = siblings
        .iter()
        .filter(|s| !same_identity(s, intent))
        .cloned()
        .collect();
    let desired = merge_labels(&remaining, prefixes);

    let changed = reconcile_labels(store, namespace, &desired, prefixes, managed_keys_annotation).await?;
    remove_finalizer(store, intent, finalizer).await?;

    info!(
        remaining = remaining.len(),
        namespace_changed = changed,
        "Retracted labels and released NamespaceLabel"
    );
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::NamespaceLabelSpec;
    use crate::tasks::store::MockLabelStore;
    use crate::tasks::types::Error;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    const FINALIZER: &str = "finalizer.namespacelabel.dana.io";
    const ANNOTATION: &str = "namespacelabel.dana.io/managed-keys";

    fn intent(name: &str, labels: &[(&str, &str)], finalizer: bool, deleting: bool) -> NamespaceLabel {
        let mut nl = NamespaceLabel::new(
            name,
            NamespaceLabelSpec {
                labels: labels
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            },
        );
        nl.metadata.namespace = Some("apps".to_string());
        if finalizer {
            nl.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        }
        if deleting {
            nl.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        }
        nl
    }

    fn namespace() -> Namespace {
        let mut labels = BTreeMap::new();
        labels.insert("x".to_string(), "1".to_string());
        labels.insert("y".to_string(), "2".to_string());
        let mut annotations = BTreeMap::new();
        annotations.insert(ANNOTATION.to_string(), "x,y".to_string());
        Namespace {
            metadata: ObjectMeta {
                name: Some("apps".to_string()),
                labels: Some(labels),
                annotations: Some(annotations),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn prefixes() -> ProtectedPrefixes {
        ProtectedPrefixes::new(["k8s.io/"])
    }

    #[test]
    fn state_follows_marker_and_finalizer() {
        assert_eq!(
            LifecycleState::of(&intent("a", &[], false, false), FINALIZER),
            LifecycleState::Unregistered
        );
        assert_eq!(
            LifecycleState::of(&intent("a", &[], true, false), FINALIZER),
            LifecycleState::Active
        );
        assert_eq!(
            LifecycleState::of(&intent("a", &[], true, true), FINALIZER),
            LifecycleState::Deleting
        );
        assert_eq!(
            LifecycleState::of(&intent("a", &[], false, true), FINALIZER),
            LifecycleState::Finalized
        );
    }

    #[tokio::test]
    async fn finalizer_is_added_once() {
        let mut store = MockLabelStore::new();
        store
            .expect_update_intent()
            .times(1)
            .withf(|nl| nl.has_finalizer(FINALIZER))
            .returning(|_| Ok(()));

        assert!(ensure_finalizer(&store, &intent("a", &[], false, false), FINALIZER)
            .await
            .unwrap());
        assert!(!ensure_finalizer(&store, &intent("a", &[], true, false), FINALIZER)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn finalizer_is_released_after_namespace_update() {
        let deleting = intent("a", &[("x", "1")], true, true);
        let siblings = vec![deleting.clone(), intent("b", &[("y", "2")], true, false)];

        let mut store = MockLabelStore::new();
        let mut seq = mockall::Sequence::new();
        store
            .expect_update_namespace()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|ns| !ns.labels().contains_key("x") && ns.labels().get("y").map(String::as_str) == Some("2"))
            .returning(|_| Ok(()));
        store
            .expect_update_intent()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|nl| !nl.has_finalizer(FINALIZER))
            .returning(|_| Ok(()));

        let changed = finalize_deletion(
            &store,
            &deleting,
            &namespace(),
            &siblings,
            &prefixes(),
            FINALIZER,
            ANNOTATION,
        )
        .await
        .unwrap();
        assert!(changed);
    }

    #[tokio::test]
    async fn failed_retraction_keeps_finalizer() {
        let deleting = intent("a", &[("x", "1")], true, true);

        let mut store = MockLabelStore::new();
        store.expect_update_namespace().returning(|_| {
            Err(Error::Conflict {
                kind: "Namespace",
                name: "apps".to_string(),
            })
        });
        store.expect_update_intent().never();

        let result = finalize_deletion(
            &store,
            &deleting,
            &namespace(),
            &[deleting.clone()],
            &prefixes(),
            FINALIZER,
            ANNOTATION,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn already_retracted_namespace_only_releases_finalizer() {
        let deleting = intent("a", &[("x", "1")], true, true);
        let mut retracted = namespace();
        retracted.metadata.labels.get_or_insert_with(BTreeMap::new).remove("x");
        retracted
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(ANNOTATION.to_string(), "y".to_string());
        let siblings = vec![deleting.clone(), intent("b", &[("y", "2")], true, false)];

        let mut store = MockLabelStore::new();
        store.expect_update_namespace().never();
        store
            .expect_update_intent()
            .times(1)
            .withf(|nl| !nl.has_finalizer(FINALIZER))
            .returning(|_| Ok(()));

        let changed = finalize_deletion(
            &store,
            &deleting,
            &retracted,
            &siblings,
            &prefixes(),
            FINALIZER,
            ANNOTATION,
        )
        .await
        .unwrap();
        assert!(!changed);
    }

    #[tokio::test]
    async fn finalized_resource_is_left_alone() {
        let mut store = MockLabelStore::new();
        store.expect_update_namespace().never();
        store.expect_update_intent().never();

        let finalized = intent("a", &[("x", "1")], false, true);
        let changed = finalize_deletion(
            &store,
            &finalized,
            &namespace(),
            &[],
            &prefixes(),
            FINALIZER,
            ANNOTATION,
        )
        .await
        .unwrap();
        assert!(!changed);
    }
}
