use std::sync::Arc;

use thiserror::Error;

use crate::tasks::config::ControllerConfig;
use crate::tasks::store::LabelStore;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Conflict updating {kind} {name}: object changed since it was read")]
    Conflict { kind: &'static str, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("Namespace {0} not found")]
    NamespaceNotFound(String),

    #[error("Invalid label: reserved label cannot be modified: {key}")]
    ProtectedLabel { key: String },

    #[error("Protected prefix record {name} unavailable: {reason}")]
    PrefixRegistry { name: String, reason: String },

    #[error("Object is missing a name or namespace")]
    MissingObjectKey,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Reconcile timed out after {0}s")]
    Timeout(u64),
}

impl Error {
    /// Whether the controller should requeue after this error.
    ///
    /// Validation failures and malformed objects only clear on a spec change.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::ProtectedLabel { .. }
                | Error::MissingObjectKey
                | Error::ConfigError(_)
        )
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}

/// Shared state handed to every reconcile invocation
#[derive(Clone)]
pub struct Context {
    pub store: Arc<dyn LabelStore>,
    pub config: Arc<ControllerConfig>,
}

impl Context {
    #[must_use]
    pub fn new(store: Arc<dyn LabelStore>, config: Arc<ControllerConfig>) -> Self {
        Self { store, config }
    }
}
