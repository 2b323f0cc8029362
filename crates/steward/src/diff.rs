//! Structural diff between desired and live state.
//!
//! Comparison is per declared field: anything the desired document does not
//! mention is owned by the platform and never counts as drift.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::resource::{DesiredResource, LiveResource, ResourceId};

/// Classification of one resource identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum ResourceState {
    /// Live matches desired on every tracked field.
    InSync,
    /// Present live but diverging on the listed field paths.
    OutOfSync { fields: Vec<String> },
    /// Declared but absent from the platform entirely.
    Missing,
    /// Present live under this application's management but no longer declared.
    Orphaned,
}

/// Result of one diff computation. Recomputed every cycle, never persisted.
#[derive(Debug, Clone, Default)]
pub struct Diff {
    pub entries: BTreeMap<ResourceId, ResourceState>,
}

impl Diff {
    pub fn get(&self, id: &ResourceId) -> Option<&ResourceState> {
        self.entries.get(id)
    }

    /// True when nothing is out of sync, missing or orphaned.
    pub fn is_synced(&self) -> bool {
        self.entries
            .values()
            .all(|state| matches!(state, ResourceState::InSync))
    }

    pub fn orphans(&self) -> impl Iterator<Item = &ResourceId> {
        self.entries
            .iter()
            .filter(|(_, s)| matches!(s, ResourceState::Orphaned))
            .map(|(id, _)| id)
    }

    pub fn summary(&self) -> DiffSummary {
        let mut summary = DiffSummary::default();
        for state in self.entries.values() {
            match state {
                ResourceState::InSync => summary.in_sync += 1,
                ResourceState::OutOfSync { .. } => summary.out_of_sync += 1,
                ResourceState::Missing => summary.missing += 1,
                ResourceState::Orphaned => summary.orphaned += 1,
            }
        }
        summary
    }
}

/// Counts per classification, for status output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub in_sync: usize,
    pub out_of_sync: usize,
    pub missing: usize,
    pub orphaned: usize,
}

/// Computes the structural diff for one application.
///
/// `live` should already be scoped to the application's destination; only
/// live resources carrying the application's managed-by label can be
/// classified as orphans.
pub fn diff(app_name: &str, desired: &[DesiredResource], live: &[LiveResource]) -> Diff {
    let live_by_id: BTreeMap<ResourceId, &LiveResource> =
        live.iter().map(|l| (l.id(), l)).collect();

    let mut entries = BTreeMap::new();

    for d in desired {
        let id = d.id();
        let state = match live_by_id.get(&id) {
            None => ResourceState::Missing,
            Some(l) => {
                let mut fields = Vec::new();
                compare_tracked(&d.spec, &l.spec, "spec", &mut fields);
                if fields.is_empty() {
                    ResourceState::InSync
                } else {
                    ResourceState::OutOfSync { fields }
                }
            }
        };
        entries.insert(id, state);
    }

    for l in live {
        let id = l.id();
        if entries.contains_key(&id) {
            continue;
        }
        if l.managed_by() == Some(app_name) {
            entries.insert(id, ResourceState::Orphaned);
        }
    }

    Diff { entries }
}

/// Recursively compares declared fields against live values.
///
/// A field declared in desired but absent live is drift (OutOfSync), per the
/// tie-break rule; fields present only live are ignored.
fn compare_tracked(desired: &Value, live: &Value, path: &str, drift: &mut Vec<String>) {
    match desired {
        Value::Mapping(desired_map) => match live {
            Value::Mapping(live_map) => {
                for (k, dv) in desired_map {
                    let key = k.as_str().map(str::to_string).unwrap_or_else(|| {
                        serde_yaml::to_string(k).unwrap_or_default().trim().to_string()
                    });
                    let child_path = format!("{}.{}", path, key);
                    match live_map.get(k) {
                        Some(lv) => compare_tracked(dv, lv, &child_path, drift),
                        None => drift.push(child_path),
                    }
                }
            }
            _ => drift.push(path.to_string()),
        },
        Value::Null => {
            // Declaring null tracks nothing beneath this path.
        }
        _ => {
            if desired != live {
                drift.push(path.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{ObjectMeta, ResourceKind, MANAGED_BY_LABEL};

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    fn desired(name: &str, spec: &str) -> DesiredResource {
        DesiredResource::new(
            ResourceKind::Deployment,
            ObjectMeta::new(name).with_namespace("web"),
            yaml(spec),
        )
    }

    fn live_of(d: &DesiredResource) -> LiveResource {
        LiveResource::from_desired(&d.managed_by("shop"))
    }

    #[test]
    fn test_exact_match_is_in_sync() {
        let d = desired("api", "replicas: 3\nimage: app:v1");
        let l = live_of(&d);
        let result = diff("shop", &[d.clone()], &[l]);
        assert_eq!(result.get(&d.id()), Some(&ResourceState::InSync));
        assert!(result.is_synced());
    }

    #[test]
    fn test_platform_injected_fields_ignored() {
        let d = desired("api", "replicas: 3");
        let mut l = live_of(&d);
        l.spec = yaml("replicas: 3\nclusterIP: 10.0.0.7\ngeneratedLabel: abc");
        let result = diff("shop", &[d.clone()], &[l]);
        assert_eq!(result.get(&d.id()), Some(&ResourceState::InSync));
    }

    #[test]
    fn test_changed_field_out_of_sync_with_path() {
        let d = desired("api", "replicas: 3\nimage: app:v2");
        let mut l = live_of(&d);
        l.spec = yaml("replicas: 3\nimage: app:v1");
        let result = diff("shop", &[d.clone()], &[l]);
        match result.get(&d.id()).unwrap() {
            ResourceState::OutOfSync { fields } => {
                assert_eq!(fields, &vec!["spec.image".to_string()]);
            }
            other => panic!("expected OutOfSync, got {:?}", other),
        }
    }

    #[test]
    fn test_declared_field_absent_live_is_out_of_sync_not_missing() {
        let d = desired("api", "replicas: 3\nstrategy:\n  type: Rolling");
        let mut l = live_of(&d);
        l.spec = yaml("replicas: 3");
        let result = diff("shop", &[d.clone()], &[l]);
        match result.get(&d.id()).unwrap() {
            ResourceState::OutOfSync { fields } => {
                assert_eq!(fields, &vec!["spec.strategy".to_string()]);
            }
            other => panic!("expected OutOfSync, got {:?}", other),
        }
    }

    #[test]
    fn test_absent_resource_is_missing() {
        let d = desired("api", "replicas: 3");
        let result = diff("shop", &[d.clone()], &[]);
        assert_eq!(result.get(&d.id()), Some(&ResourceState::Missing));
    }

    #[test]
    fn test_undeclared_managed_resource_is_orphaned() {
        let old = desired("legacy", "replicas: 1");
        let l = live_of(&old);
        let result = diff("shop", &[], &[l]);
        assert_eq!(result.get(&old.id()), Some(&ResourceState::Orphaned));
    }

    #[test]
    fn test_unmanaged_live_resource_not_orphaned() {
        let foreign = desired("foreign", "replicas: 1");
        let mut l = LiveResource::from_desired(&foreign);
        l.metadata.labels.remove(MANAGED_BY_LABEL);
        let result = diff("shop", &[], &[l]);
        assert!(result.entries.is_empty());
    }

    #[test]
    fn test_other_apps_resources_not_orphaned() {
        let other = desired("other", "replicas: 1");
        let l = LiveResource::from_desired(&other.managed_by("billing"));
        let result = diff("shop", &[], &[l]);
        assert!(result.entries.is_empty());
    }

    #[test]
    fn test_nested_drift_path() {
        let d = desired("api", "template:\n  containers:\n    port: 8080");
        let mut l = live_of(&d);
        l.spec = yaml("template:\n  containers:\n    port: 9090");
        let result = diff("shop", &[d.clone()], &[l]);
        match result.get(&d.id()).unwrap() {
            ResourceState::OutOfSync { fields } => {
                assert_eq!(fields, &vec!["spec.template.containers.port".to_string()]);
            }
            other => panic!("expected OutOfSync, got {:?}", other),
        }
    }

    #[test]
    fn test_summary_counts() {
        let in_sync = desired("a", "replicas: 1");
        let missing = desired("b", "replicas: 1");
        let orphan = desired("c", "replicas: 1");

        let live = vec![live_of(&in_sync), live_of(&orphan)];
        let result = diff("shop", &[in_sync, missing], &live);
        let summary = result.summary();
        assert_eq!(summary.in_sync, 1);
        assert_eq!(summary.missing, 1);
        assert_eq!(summary.orphaned, 1);
        assert_eq!(summary.out_of_sync, 0);
    }
}
