//! Protected prefix records.
//!
//! Each `NamespaceLabel` gets a `ConfigMap` next to it whose data keys are the
//! protected prefixes. It is created lazily with the configured defaults and
//! carries a controller owner reference, so garbage collection removes it
//! together with its owner.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use super::policy::ProtectedPrefixes;
use crate::crds::NamespaceLabel;
use crate::tasks::store::LabelStore;
use crate::tasks::types::{Error, Result};

/// Name of the protected prefix record owned by a `NamespaceLabel`
#[must_use]
pub fn record_name(intent_name: &str) -> String {
    format!("{intent_name}-protected-labels-configmap")
}

fn build_record(intent: &NamespaceLabel, defaults: &ProtectedPrefixes) -> Result<ConfigMap> {
    let namespace = intent.namespace().ok_or(Error::MissingObjectKey)?;
    let owner = intent.controller_owner_ref(&()).ok_or(Error::MissingObjectKey)?;

    let mut labels = BTreeMap::new();
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "namespace-label-operator".to_string(),
    );

    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(record_name(&intent.name_any())),
            namespace: Some(namespace),
            labels: Some(labels),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        data: Some(defaults.to_record_data()),
        ..Default::default()
    })
}

fn prefixes_of(record: &ConfigMap) -> ProtectedPrefixes {
    record
        .data
        .as_ref()
        .map(ProtectedPrefixes::from_record_data)
        .unwrap_or_default()
}

/// Return the protected prefixes for `intent`, creating its record with
/// `defaults` when none exists yet.
///
/// A concurrent creation is resolved by reading the winner's record. Any other
/// store failure aborts the reconcile as [`Error::PrefixRegistry`].
#[instrument(skip(store, intent, defaults), fields(namespace_label = %intent.name_any()))]
pub async fn resolve_protected_prefixes(
    store: &dyn LabelStore,
    intent: &NamespaceLabel,
    defaults: &ProtectedPrefixes,
) -> Result<ProtectedPrefixes> {
    let namespace = intent.namespace().ok_or(Error::MissingObjectKey)?;
    let name = record_name(&intent.name_any());

    if let Some(record) = store.get_prefix_record(&namespace, &name).await? {
        debug!(record = %name, "Using existing protected prefix record");
        return Ok(prefixes_of(&record));
    }

    info!(record = %name, "Creating protected prefix record");
    let record = build_record(intent, defaults)?;
    match store.create_prefix_record(&record).await {
        Ok(()) => Ok(defaults.clone()),
        Err(Error::AlreadyExists { .. }) => {
            warn!(record = %name, "Protected prefix record created concurrently, re-reading");
            match store.get_prefix_record(&namespace, &name).await? {
                Some(existing) => Ok(prefixes_of(&existing)),
                None => Err(Error::PrefixRegistry {
                    name,
                    reason: "record reported as existing but could not be read".to_string(),
                }),
            }
        }
        Err(e) => Err(Error::PrefixRegistry {
            name,
            reason: e.to_string(),
        }),
    }
}
