//! Object store access for the label controller.
//!
//! The reconcile logic only talks to [`LabelStore`], which keeps it testable
//! without an API server. [`KubeLabelStore`] is the production implementation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crds::{NamespaceLabel, NamespaceLabelStatus};
use crate::tasks::types::{Error, Result};

/// Field manager recorded on status patches
pub const FIELD_MANAGER: &str = "namespace-label-operator";

/// Read and write verbs the reconciler needs from the cluster.
///
/// Updates are optimistic: an object written back with a stale
/// `resourceVersion` fails with [`Error::Conflict`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LabelStore: Send + Sync {
    /// Fetch a `NamespaceLabel`; `None` when it no longer exists
    async fn get_intent(&self, namespace: &str, name: &str) -> Result<Option<NamespaceLabel>>;

    /// Every `NamespaceLabel` in a namespace
    async fn list_intents(&self, namespace: &str) -> Result<Vec<NamespaceLabel>>;

    /// Write back metadata (finalizers) of a `NamespaceLabel`
    async fn update_intent(&self, intent: &NamespaceLabel) -> Result<()>;

    /// Replace the status subresource of a `NamespaceLabel`
    async fn patch_intent_status(
        &self,
        namespace: &str,
        name: &str,
        status: &NamespaceLabelStatus,
    ) -> Result<()>;

    /// Fetch a namespace; `None` when it does not exist
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>>;

    /// Write back a namespace previously read from the store
    async fn update_namespace(&self, namespace: &Namespace) -> Result<()>;

    /// Fetch a protected prefix record
    async fn get_prefix_record(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;

    /// Create a protected prefix record; [`Error::AlreadyExists`] on a race
    async fn create_prefix_record(&self, record: &ConfigMap) -> Result<()>;
}

/// [`LabelStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeLabelStore {
    client: Client,
}

impl KubeLabelStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Parameters for merge patches of the status subresource
fn status_patch_params() -> PatchParams {
    PatchParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..PatchParams::default()
    }
}

fn not_found_as_none<T>(result: std::result::Result<T, kube::Error>) -> Result<Option<T>> {
    match result {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn conflict_on_409(kind: &'static str, name: String, err: kube::Error) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 409 => Error::Conflict { kind, name },
        e => e.into(),
    }
}

#[async_trait]
impl LabelStore for KubeLabelStore {
    async fn get_intent(&self, namespace: &str, name: &str) -> Result<Option<NamespaceLabel>> {
        let api: Api<NamespaceLabel> = Api::namespaced(self.client.clone(), namespace);
        not_found_as_none(api.get(name).await)
    }

    async fn list_intents(&self, namespace: &str) -> Result<Vec<NamespaceLabel>> {
        let api: Api<NamespaceLabel> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn update_intent(&self, intent: &NamespaceLabel) -> Result<()> {
        let namespace = intent.namespace().ok_or(Error::MissingObjectKey)?;
        let name = intent.name_any();
        let api: Api<NamespaceLabel> = Api::namespaced(self.client.clone(), &namespace);
        match api.replace(&name, &PostParams::default(), intent).await {
            Ok(_) => Ok(()),
            // Finalizer removal on a deleting object can race the garbage collector
            Err(kube::Error::Api(ae)) if ae.code == 404 && intent.is_deleting() => {
                debug!(%name, "NamespaceLabel already removed");
                Ok(())
            }
            Err(e) => Err(conflict_on_409("NamespaceLabel", name, e)),
        }
    }

    async fn patch_intent_status(
        &self,
        namespace: &str,
        name: &str,
        status: &NamespaceLabelStatus,
    ) -> Result<()> {
        let api: Api<NamespaceLabel> = Api::namespaced(self.client.clone(), namespace);
        let status_patch = serde_json::json!({ "status": status });
        api.patch_status(
            name,
            &status_patch_params(),
            &Patch::Merge(&status_patch),
        )
        .await?;
        Ok(())
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        not_found_as_none(api.get(name).await)
    }

    async fn update_namespace(&self, namespace: &Namespace) -> Result<()> {
        let name = namespace.name_any();
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.replace(&name, &PostParams::default(), namespace)
            .await
            .map_err(|e| conflict_on_409("Namespace", name, e))?;
        Ok(())
    }

    async fn get_prefix_record(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        not_found_as_none(api.get(name).await)
    }

    async fn create_prefix_record(&self, record: &ConfigMap) -> Result<()> {
        let namespace = record.namespace().ok_or(Error::MissingObjectKey)?;
        let name = record.name_any();
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &namespace);
        match api.create(&PostParams::default(), record).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Err(Error::AlreadyExists {
                kind: "ConfigMap",
                name,
            }),
            Err(e) => Err(e.into()),
        }
    }
}
