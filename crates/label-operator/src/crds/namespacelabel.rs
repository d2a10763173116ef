//! `NamespaceLabel` Custom Resource Definition
//!
//! A `NamespaceLabel` declares labels that should be present on the namespace
//! it lives in. Any number of them may target the same namespace.

use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type reported on every reconciled `NamespaceLabel`
pub const READY_CONDITION: &str = "Ready";

/// Reason used when the namespace matches the merged desired labels
pub const REASON_SYNCED: &str = "Synced";

/// Reason used when the resource declares a label under a protected prefix
pub const REASON_PROTECTED_LABEL: &str = "ProtectedLabel";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "namespacelabel.dana.io", version = "v1alpha1", kind = "NamespaceLabel")]
#[kube(namespaced)]
#[kube(status = "NamespaceLabelStatus")]
#[kube(shortname = "nslabel")]
#[kube(printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#)]
#[kube(printcolumn = r#"{"name":"Synced","type":"date","jsonPath":".status.lastSyncedTimeStamp"}"#)]
pub struct NamespaceLabelSpec {
    /// Labels to apply to the namespace. Keys under a protected prefix
    /// (for example `kubernetes.io/`) are rejected.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceLabelStatus {
    #[serde(rename = "lastSyncedTimeStamp", skip_serializing_if = "Option::is_none")]
    pub last_synced_timestamp: Option<String>,
    #[serde(default)]
    pub conditions: Vec<NamespaceLabelCondition>,
}

/// Condition for the `NamespaceLabel`
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceLabelCondition {
    /// Type of condition
    #[serde(rename = "type")]
    pub condition_type: String,

    /// Status of the condition (True, False, or Unknown)
    pub status: String,

    /// Last time the condition transitioned (RFC3339 format)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,

    /// Reason for the condition's last transition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message about the condition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl NamespaceLabelCondition {
    #[must_use]
    pub fn ready(message: impl Into<String>) -> Self {
        Self {
            condition_type: READY_CONDITION.to_string(),
            status: "True".to_string(),
            last_transition_time: None,
            reason: Some(REASON_SYNCED.to_string()),
            message: Some(message.into()),
        }
    }

    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            condition_type: READY_CONDITION.to_string(),
            status: "False".to_string(),
            last_transition_time: None,
            reason: Some(REASON_PROTECTED_LABEL.to_string()),
            message: Some(message.into()),
        }
    }

    /// Same condition, ignoring the transition timestamp
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        self.condition_type == other.condition_type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

impl NamespaceLabel {
    /// Deletion has been requested for this resource
    #[must_use]
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether the given finalizer is present on this resource
    #[must_use]
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers().iter().any(|f| f == finalizer)
    }

    /// The currently recorded `Ready` condition, if any
    #[must_use]
    pub fn ready_condition(&self) -> Option<&NamespaceLabelCondition> {
        self.status
            .as_ref()?
            .conditions
            .iter()
            .find(|c| c.condition_type == READY_CONDITION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::CustomResourceExt;

    #[test]
    fn crd_is_namespaced_under_expected_group() {
        let crd = NamespaceLabel::crd();
        assert_eq!(crd.spec.group, "namespacelabel.dana.io");
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(crd.spec.names.kind, "NamespaceLabel");
        assert_eq!(crd.spec.versions[0].name, "v1alpha1");
    }

    #[test]
    fn spec_labels_default_to_empty() {
        let spec: NamespaceLabelSpec = serde_json::from_str("{}").unwrap();
        assert!(spec.labels.is_empty());
    }

    #[test]
    fn status_uses_original_timestamp_field_name() {
        let status = NamespaceLabelStatus {
            last_synced_timestamp: Some("2025-01-01T00:00:00Z".to_string()),
            conditions: vec![NamespaceLabelCondition::ready("ok")],
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["lastSyncedTimeStamp"], "2025-01-01T00:00:00Z");
        assert_eq!(value["conditions"][0]["type"], "Ready");
        assert_eq!(value["conditions"][0]["reason"], "Synced");
    }

    #[test]
    fn deletion_and_finalizer_helpers() {
        let mut nl = NamespaceLabel::new("team", NamespaceLabelSpec::default());
        assert!(!nl.is_deleting());
        assert!(!nl.has_finalizer("finalizer.namespacelabel.dana.io"));

        nl.metadata.finalizers = Some(vec!["finalizer.namespacelabel.dana.io".to_string()]);
        nl.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert!(nl.is_deleting());
        assert!(nl.has_finalizer("finalizer.namespacelabel.dana.io"));
    }

    #[test]
    fn condition_comparison_ignores_transition_time() {
        let mut a = NamespaceLabelCondition::ready("in sync");
        let b = NamespaceLabelCondition::ready("in sync");
        a.last_transition_time = Some("2025-01-01T00:00:00Z".to_string());
        assert!(a.same_as(&b));
        assert!(!a.same_as(&NamespaceLabelCondition::rejected("in sync")));
    }
}
