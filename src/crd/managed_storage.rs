use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Root object of the addon. A single instance per namespace (fixed name
/// `managed-storage`) drives the whole dependent catalogue.
#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default,
)]
#[kube(
    group = "addons.stor.io",
    version = "v1alpha1",
    kind = "ManagedStorage",
    plural = "managedstorages",
    namespaced,
    status = "ManagedStorageStatus"
)]
pub struct ManagedStorageSpec {
    /// "strict" overwrites dependent specs every pass; "none" leaves the
    /// mutable specification of externally managed dependents untouched.
    /// Anything unrecognized falls back to strict.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile_strategy: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
pub struct ManagedStorageStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile_strategy: Option<ReconcileStrategy>,
    #[serde(default)]
    pub components: ComponentsStatus,
    /// RFC 3339 time of the last completed observation pass.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refreshed: Option<String>,
}

#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq,
)]
pub enum ReconcileStrategy {
    Strict,
    None,
}

impl ReconcileStrategy {
    /// Fold the raw spec value into the effective strategy. Only an explicit
    /// (case-insensitive) "none" disables spec overwrites.
    pub fn effective(raw: Option<&str>) -> Self {
        match raw {
            Some(s) if s.eq_ignore_ascii_case("none") => {
                ReconcileStrategy::None
            }
            _ => ReconcileStrategy::Strict,
        }
    }
}

/// Coarse readiness per tracked dependent kind. Recomputed from live
/// observation on every pass, never read back as an input.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
pub struct ComponentsStatus {
    #[serde(default)]
    pub storage_cluster: ComponentStatus,
    #[serde(default)]
    pub prometheus: ComponentStatus,
    #[serde(default)]
    pub alertmanager: ComponentStatus,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
pub struct ComponentStatus {
    #[serde(default)]
    pub state: ComponentState,
}

#[derive(
    Deserialize,
    Serialize,
    Clone,
    Copy,
    Debug,
    JsonSchema,
    PartialEq,
    Eq,
    Default,
)]
pub enum ComponentState {
    NotFound,
    Pending,
    Ready,
    #[default]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_defaults_to_strict() {
        assert_eq!(
            ReconcileStrategy::effective(None),
            ReconcileStrategy::Strict
        );
        assert_eq!(
            ReconcileStrategy::effective(Some("strict")),
            ReconcileStrategy::Strict
        );
        // Unrecognized values fall back to strict rather than erroring
        assert_eq!(
            ReconcileStrategy::effective(Some("manage")),
            ReconcileStrategy::Strict
        );
    }

    #[test]
    fn strategy_none_is_case_insensitive() {
        for raw in ["none", "None", "NONE"] {
            assert_eq!(
                ReconcileStrategy::effective(Some(raw)),
                ReconcileStrategy::None
            );
        }
    }
}
