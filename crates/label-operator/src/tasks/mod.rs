use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::Config;
use kube::{Api, Client, ResourceExt};
use tracing::{debug, error, info, instrument, Instrument};

use crate::crds::NamespaceLabel;

pub mod config;
pub mod labels;
pub mod store;
pub mod types;

// Re-export commonly used items
pub use config::ControllerConfig;
pub use labels::reconcile_namespace_label;
pub use store::{KubeLabelStore, LabelStore};
pub use types::{Context, Error, Result};

/// Label selector matching the protected prefix records this operator creates
const MANAGED_RECORD_SELECTOR: &str = "app.kubernetes.io/managed-by=namespace-label-operator";

/// Main entry point for the `NamespaceLabel` controller
#[instrument(skip(client, config), fields(watch_namespace = ?config.watch_namespace))]
pub async fn run_label_controller(client: Client, config: ControllerConfig) -> Result<()> {
    if let Err(validation_error) = config.validate() {
        error!("Configuration validation failed: {}", validation_error);
        return Err(Error::ConfigError(validation_error.to_string()));
    }

    let config = Arc::new(config);
    let context = Arc::new(Context::new(
        Arc::new(KubeLabelStore::new(client.clone())),
        config.clone(),
    ));

    let watcher_config = Config::default().any_semantic();
    let (intents, records, namespace_config) = match config.watch_namespace.as_deref() {
        Some(ns) => (
            Api::<NamespaceLabel>::namespaced(client.clone(), ns),
            Api::<ConfigMap>::namespaced(client.clone(), ns),
            watcher_config.clone().fields(&format!("metadata.name={ns}")),
        ),
        None => (
            Api::<NamespaceLabel>::all(client.clone()),
            Api::<ConfigMap>::all(client.clone()),
            watcher_config.clone(),
        ),
    };
    let namespaces: Api<Namespace> = Api::all(client.clone());

    info!(
        concurrency = config.concurrency,
        "Starting NamespaceLabel controller"
    );

    let controller = Controller::new(intents, watcher_config.clone());
    let reader = controller.store();

    controller
        .owns(records, watcher_config.labels(MANAGED_RECORD_SELECTOR))
        .watches(namespaces, namespace_config, move |ns| {
            intents_in_namespace(&reader, &ns.name_any())
        })
        .with_config(controller::Config::default().concurrency(config.concurrency))
        .shutdown_on_signal()
        .run(reconcile_namespace_label, error_policy, context)
        .for_each(|reconciliation_result| {
            let span = tracing::info_span!("namespace_label_reconciliation_result");
            async move {
                match reconciliation_result {
                    Ok((object_ref, _action)) => {
                        debug!(resource = %object_ref, "NamespaceLabel reconciliation successful");
                    }
                    Err(reconciliation_err) => {
                        error!(
                            error = ?reconciliation_err,
                            "NamespaceLabel reconciliation error"
                        );
                    }
                }
            }
            .instrument(span)
        })
        .await;

    info!("NamespaceLabel controller shutting down");
    Ok(())
}

/// Every `NamespaceLabel` currently cached for a namespace
fn intents_in_namespace(reader: &Store<NamespaceLabel>, namespace: &str) -> Vec<ObjectRef<NamespaceLabel>> {
    reader
        .state()
        .into_iter()
        .filter(|intent| intent.namespace().as_deref() == Some(namespace))
        .map(|intent| ObjectRef::from_obj(intent.as_ref()))
        .collect()
}

/// Error policy: retry store failures, wait for a spec change otherwise
#[instrument(skip(ctx, intent), fields(namespace_label = %intent.name_any()))]
fn error_policy(intent: Arc<NamespaceLabel>, err: &Error, ctx: Arc<Context>) -> Action {
    let retryable = err.is_retryable();
    error!(
        error = ?err,
        namespace_label = %intent.name_any(),
        retryable,
        "NamespaceLabel reconciliation failed"
    );

    if retryable {
        Action::requeue(ctx.config.error_requeue())
    } else {
        Action::await_change()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::NamespaceLabelSpec;
    use crate::tasks::store::MockLabelStore;
    use kube::runtime::reflector::store::Writer;
    use kube::runtime::watcher;
    use std::time::Duration;

    fn intent(namespace: &str, name: &str) -> NamespaceLabel {
        let mut nl = NamespaceLabel::new(name, NamespaceLabelSpec::default());
        nl.metadata.namespace = Some(namespace.to_string());
        nl
    }

    fn context() -> Arc<Context> {
        Arc::new(Context::new(
            Arc::new(MockLabelStore::new()),
            Arc::new(ControllerConfig::default()),
        ))
    }

    #[test]
    fn namespace_events_map_to_every_intent_in_it() {
        let mut writer: Writer<NamespaceLabel> = Writer::default();
        for nl in [intent("apps", "a"), intent("apps", "b"), intent("other", "c")] {
            writer.apply_watcher_event(&watcher::Event::Apply(nl));
        }
        let reader = writer.as_reader();

        let mut names: Vec<String> = intents_in_namespace(&reader, "apps")
            .into_iter()
            .map(|r| r.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
        assert!(intents_in_namespace(&reader, "missing").is_empty());
    }

    #[test]
    fn retryable_errors_requeue() {
        let action = error_policy(
            Arc::new(intent("apps", "a")),
            &Error::Conflict {
                kind: "Namespace",
                name: "apps".to_string(),
            },
            context(),
        );
        assert_eq!(action, Action::requeue(Duration::from_secs(15)));
    }

    #[test]
    fn validation_errors_wait_for_change() {
        let action = error_policy(
            Arc::new(intent("apps", "a")),
            &Error::ProtectedLabel {
                key: "k8s.io/team".to_string(),
            },
            context(),
        );
        assert_eq!(action, Action::await_change());
    }
}
