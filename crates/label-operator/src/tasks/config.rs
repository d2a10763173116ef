//! Label Controller Configuration
//!
//! Loaded from a YAML file mounted into the operator pod. Every field has a
//! default so a missing file still yields a working controller.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Prefixes no `NamespaceLabel` may set or clear when no record overrides them
pub const DEFAULT_PROTECTED_PREFIXES: [&str; 3] = ["k8s.io/", "kubernetes.io/", "openshift.io/"];

/// Main controller configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerConfig {
    /// Finalizer recorded on every `NamespaceLabel` the operator manages
    pub finalizer_name: String,

    /// Namespace annotation listing the label keys the operator applied
    pub managed_keys_annotation: String,

    /// Content written to a freshly created protected prefix record
    pub default_protected_prefixes: Vec<String>,

    /// Restrict the watch to a single namespace (all namespaces when unset)
    pub watch_namespace: Option<String>,

    /// Maximum number of concurrent reconciles
    pub concurrency: u16,

    /// Upper bound for a single reconcile invocation
    pub reconcile_timeout_seconds: u64,

    /// Requeue delay after a retryable failure
    pub error_requeue_seconds: u64,

    /// Periodic resync after a successful reconcile
    pub resync_seconds: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            finalizer_name: "finalizer.namespacelabel.dana.io".to_string(),
            managed_keys_annotation: "namespacelabel.dana.io/managed-keys".to_string(),
            default_protected_prefixes: DEFAULT_PROTECTED_PREFIXES
                .iter()
                .map(ToString::to_string)
                .collect(),
            watch_namespace: None,
            concurrency: 4,
            reconcile_timeout_seconds: 30,
            error_requeue_seconds: 15,
            resync_seconds: 300,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from a mounted YAML file
    pub fn from_mounted_file(config_path: &str) -> Result<Self, anyhow::Error> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {config_path}: {e}"))?;

        let config: ControllerConfig = serde_yaml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {e}"))?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        let finalizer = self.finalizer_name.trim();
        if finalizer.is_empty() {
            return Err(anyhow::anyhow!("finalizerName must not be empty"));
        }
        if !finalizer.contains('/') && !finalizer.contains('.') {
            return Err(anyhow::anyhow!(
                "finalizerName '{finalizer}' must be domain-qualified (e.g. finalizer.example.io)"
            ));
        }
        if self.managed_keys_annotation.trim().is_empty() {
            return Err(anyhow::anyhow!("managedKeysAnnotation must not be empty"));
        }
        if let Some(prefix) = self
            .default_protected_prefixes
            .iter()
            .find(|p| p.trim().is_empty())
        {
            return Err(anyhow::anyhow!(
                "defaultProtectedPrefixes contains an empty prefix ({prefix:?}), which would protect every label"
            ));
        }
        if self.concurrency == 0 {
            return Err(anyhow::anyhow!("concurrency must be at least 1"));
        }
        if self.reconcile_timeout_seconds == 0 || self.error_requeue_seconds == 0 {
            return Err(anyhow::anyhow!(
                "reconcileTimeoutSeconds and errorRequeueSeconds must be positive"
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_seconds)
    }

    #[must_use]
    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_seconds)
    }

    #[must_use]
    pub fn resync(&self) -> Duration {
        Duration::from_secs(self.resync_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = ControllerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.default_protected_prefixes,
            vec!["k8s.io/", "kubernetes.io/", "openshift.io/"]
        );
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "concurrency: 8\nwatchNamespace: team-a").unwrap();

        let config = ControllerConfig::from_mounted_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.watch_namespace.as_deref(), Some("team-a"));
        assert_eq!(config.finalizer_name, "finalizer.namespacelabel.dana.io");
        assert_eq!(config.reconcile_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(ControllerConfig::from_mounted_file("/nonexistent/config.yaml").is_err());
    }

    #[test]
    fn validate_rejects_empty_prefix() {
        let config = ControllerConfig {
            default_protected_prefixes: vec!["k8s.io/".to_string(), String::new()],
            ..ControllerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_unqualified_finalizer() {
        let config = ControllerConfig {
            finalizer_name: "cleanup".to_string(),
            ..ControllerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let config = ControllerConfig {
            concurrency: 0,
            ..ControllerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
