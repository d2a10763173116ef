//! # Namespace Label Convergence
//!
//! Everything needed to turn a set of `NamespaceLabel` resources into the label
//! set of their namespace:
//!
//! - **`policy`**: protected prefix checks
//! - **`registry`**: per-resource protected prefix records
//! - **`merge`**: deterministic merge of sibling resources into desired labels
//! - **`diff`**: minimal label mutation and the single namespace update
//! - **`lifecycle`**: finalizer-guarded deletion state machine
//! - **`reconcile`**: the control loop tying the pieces together

pub mod diff;
pub mod lifecycle;
pub mod merge;
pub mod policy;
pub mod reconcile;
pub mod registry;

pub use diff::{plan_labels, reconcile_labels, LabelPlan};
pub use lifecycle::LifecycleState;
pub use merge::{contributors, merge_labels};
pub use policy::{is_protected, ProtectedPrefixes};
pub use reconcile::{reconcile_namespace_label, ReconcileOutcome};
pub use registry::{record_name, resolve_protected_prefixes};
