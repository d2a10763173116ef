//! Merge of sibling `NamespaceLabel` resources into one desired label map.
//!
//! Siblings are processed in ascending name order and a later sibling
//! overrides an earlier one on the same key, so the result never depends on
//! the order the store returned them in.

use std::collections::BTreeMap;

use kube::ResourceExt;
use tracing::{debug, warn};

use super::policy::ProtectedPrefixes;
use crate::crds::NamespaceLabel;

/// Siblings that take part in a merge, in merge order.
///
/// Resources marked for deletion are left out. So is any resource declaring a
/// protected key: it is rejected as a whole, and none of its other labels are
/// applied either.
#[must_use]
pub fn contributors<'a>(
    siblings: &'a [NamespaceLabel],
    prefixes: &ProtectedPrefixes,
) -> Vec<&'a NamespaceLabel> {
    let mut ordered: Vec<&NamespaceLabel> = siblings
        .iter()
        .filter(|s| !s.is_deleting())
        .filter(|s| {
            let rejected = prefixes.first_violation(s.spec.labels.keys()).is_some();
            if rejected {
                debug!(namespace_label = %s.name_any(), "Excluding rejected NamespaceLabel from merge");
            }
            !rejected
        })
        .collect();
    ordered.sort_by(|a, b| {
        a.name_any()
            .cmp(&b.name_any())
            .then_with(|| a.namespace().cmp(&b.namespace()))
    });
    ordered
}

/// Desired namespace labels for a sibling set.
///
/// Only [`contributors`] are merged, so the result never holds a protected
/// key. A rejected sibling drops out entirely instead of having just its
/// protected keys skipped.
#[must_use]
pub fn merge_labels(
    siblings: &[NamespaceLabel],
    prefixes: &ProtectedPrefixes,
) -> BTreeMap<String, String> {
    let mut desired: BTreeMap<String, String> = BTreeMap::new();
    for sibling in contributors(siblings, prefixes) {
        for (key, value) in &sibling.spec.labels {
            if let Some(previous) = desired.insert(key.clone(), value.clone()) {
                if previous != *value {
                    warn!(
                        namespace_label = %sibling.name_any(),
                        %key,
                        overridden = %previous,
                        value = %value,
                        "Label declared with different values, later resource wins"
                    );
                }
            }
        }
    }
    desired
}
