//! Control loop for a single `NamespaceLabel`.
//!
//! Every invocation re-reads the resource, its namespace and its siblings, so
//! duplicated or out-of-order events converge to the same result.

use std::sync::Arc;

use chrono::Utc;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use super::diff::reconcile_labels;
use super::lifecycle::{ensure_finalizer, finalize_deletion, LifecycleState};
use super::merge::{contributors, merge_labels};
use super::policy::ProtectedPrefixes;
use super::registry::resolve_protected_prefixes;
use crate::crds::{NamespaceLabel, NamespaceLabelCondition};
use crate::tasks::types::{Context, Error, Result};

/// What a reconcile invocation did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The resource no longer exists
    NotFound,
    /// Labels converged for an active resource
    Converged { namespace_changed: bool },
    /// Labels retracted and finalizer released for a deleting resource
    Finalized { namespace_changed: bool },
}

/// Entry point handed to the kube-runtime controller
#[instrument(skip(intent, ctx), fields(namespace_label = %intent.name_any(), namespace = ?intent.namespace()))]
pub async fn reconcile_namespace_label(
    intent: Arc<NamespaceLabel>,
    ctx: Arc<Context>,
) -> Result<Action> {
    let namespace = intent.namespace().ok_or(Error::MissingObjectKey)?;
    let name = intent.name_any();

    let timeout = ctx.config.reconcile_timeout();
    let outcome = tokio::time::timeout(timeout, converge(&ctx, &namespace, &name))
        .await
        .map_err(|_| Error::Timeout(timeout.as_secs()))??;

    debug!(?outcome, "Reconcile completed");
    Ok(match outcome {
        ReconcileOutcome::Converged { .. } if ctx.config.resync_seconds > 0 => {
            Action::requeue(ctx.config.resync())
        }
        _ => Action::await_change(),
    })
}

/// Run one convergence pass for the `NamespaceLabel` `namespace/name`.
///
/// A resource declaring a protected key is reported on its status and the
/// pass fails with [`Error::ProtectedLabel`] without touching the namespace.
#[instrument(skip(ctx))]
pub async fn converge(ctx: &Context, namespace: &str, name: &str) -> Result<ReconcileOutcome> {
    let store = ctx.store.as_ref();
    let config = &ctx.config;

    let Some(intent) = store.get_intent(namespace, name).await? else {
        debug!("NamespaceLabel not found, already removed");
        return Ok(ReconcileOutcome::NotFound);
    };

    let Some(target) = store.get_namespace(namespace).await? else {
        return Err(Error::NamespaceNotFound(namespace.to_string()));
    };

    let mut siblings = store.list_intents(namespace).await?;

    let defaults = ProtectedPrefixes::new(config.default_protected_prefixes.iter().cloned());
    let prefixes = resolve_protected_prefixes(store, &intent, &defaults).await?;

    if let Some(key) = prefixes.first_violation(intent.spec.labels.keys()) {
        let err = Error::ProtectedLabel {
            key: key.to_string(),
        };
        warn!(error = %err, "Rejecting NamespaceLabel");
        if !intent.is_deleting() {
            record_condition(ctx, &intent, NamespaceLabelCondition::rejected(err.to_string()), false)
                .await?;
        }
        return Err(err);
    }

    if intent.is_deleting() {
        let namespace_changed = finalize_deletion(
            store,
            &intent,
            &target,
            &siblings,
            &prefixes,
            &config.finalizer_name,
            &config.managed_keys_annotation,
        )
        .await?;
        return Ok(ReconcileOutcome::Finalized { namespace_changed });
    }

    if LifecycleState::of(&intent, &config.finalizer_name) == LifecycleState::Unregistered {
        ensure_finalizer(store, &intent, &config.finalizer_name).await?;
    }

    // The listed set may lag behind the resource that triggered this pass
    match siblings
        .iter_mut()
        .find(|s| s.name_any() == intent.name_any())
    {
        Some(existing) => *existing = intent.clone(),
        None => siblings.push(intent.clone()),
    }

    let desired = merge_labels(&siblings, &prefixes);
    let namespace_changed = reconcile_labels(
        store,
        &target,
        &desired,
        &prefixes,
        &config.managed_keys_annotation,
    )
    .await?;

    let message = format!(
        "{} label(s) applied from {} NamespaceLabel(s)",
        desired.len(),
        contributors(&siblings, &prefixes).len()
    );
    record_condition(ctx, &intent, NamespaceLabelCondition::ready(message), namespace_changed).await?;

    if namespace_changed {
        info!(desired = desired.len(), "Namespace converged");
    }
    Ok(ReconcileOutcome::Converged { namespace_changed })
}

/// Patch the `Ready` condition when it differs from the recorded one, or when
/// the namespace was just written and the sync timestamp should move.
async fn record_condition(
    ctx: &Context,
    intent: &NamespaceLabel,
    mut condition: NamespaceLabelCondition,
    synced: bool,
) -> Result<()> {
    let previous = intent.ready_condition();
    let unchanged = previous.is_some_and(|p| p.same_as(&condition));
    if unchanged && !synced {
        return Ok(());
    }

    let now = Utc::now().to_rfc3339();
    condition.last_transition_time = if unchanged {
        previous.and_then(|p| p.last_transition_time.clone())
    } else {
        Some(now.clone())
    };

    let mut status = intent.status.clone().unwrap_or_default();
    if condition.status == "True" {
        status.last_synced_timestamp = Some(now);
    }
    status
        .conditions
        .retain(|c| c.condition_type != condition.condition_type);
    status.conditions.push(condition);

    let namespace = intent.namespace().ok_or(Error::MissingObjectKey)?;
    ctx.store
        .patch_intent_status(&namespace, &intent.name_any(), &status)
        .await
}
