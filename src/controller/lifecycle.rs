use kube::{
    Api, ResourceExt,
    api::{Patch, PatchParams},
};
use serde_json::json;
use tracing::debug;

use super::ReconcileErr;
use crate::crd::ManagedStorage;

pub const FINALIZER: &str = "addons.stor.io/finalizer";

/// Coarse state the orchestrator branches on. Deletion always wins over an
/// uninstall request, so a half-finished uninstall converges to Deleting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    NoInstance,
    Active,
    PendingUninstall,
    Deleting,
}

pub fn evaluate(
    exists: bool,
    deletion_requested: bool,
    uninstall_requested: bool,
) -> LifecycleState {
    if !exists {
        return LifecycleState::NoInstance;
    }
    if deletion_requested {
        return LifecycleState::Deleting;
    }
    if uninstall_requested {
        return LifecycleState::PendingUninstall;
    }
    LifecycleState::Active
}

pub fn has_finalizer(obj: &ManagedStorage) -> bool {
    obj.finalizers().iter().any(|f| f == FINALIZER)
}

/// The finalizer list with ours added, or `None` when it is already present
/// and no write is needed.
pub fn finalizers_with(obj: &ManagedStorage) -> Option<Vec<String>> {
    if has_finalizer(obj) {
        return None;
    }
    let mut finalizers = obj.finalizers().to_vec();
    finalizers.push(FINALIZER.to_string());
    Some(finalizers)
}

pub fn finalizers_without(obj: &ManagedStorage) -> Vec<String> {
    obj.finalizers()
        .iter()
        .filter(|f| f.as_str() != FINALIZER)
        .cloned()
        .collect()
}

pub async fn ensure_finalizer(
    api: &Api<ManagedStorage>,
    obj: &ManagedStorage,
) -> Result<(), ReconcileErr> {
    let Some(finalizers) = finalizers_with(obj) else {
        return Ok(());
    };
    debug!("adding finalizer");
    let patch = json!({ "metadata": { "finalizers": finalizers } });
    api.patch(
        &obj.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

pub async fn remove_finalizer(
    api: &Api<ManagedStorage>,
    obj: &ManagedStorage,
) -> Result<(), ReconcileErr> {
    if !has_finalizer(obj) {
        return Ok(());
    }
    debug!("removing finalizer");
    let patch =
        json!({ "metadata": { "finalizers": finalizers_without(obj) } });
    api.patch(
        &obj.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ManagedStorageSpec;

    fn instance(finalizers: &[&str]) -> ManagedStorage {
        let mut obj = ManagedStorage::new(
            "managed-storage",
            ManagedStorageSpec::default(),
        );
        obj.metadata.finalizers =
            Some(finalizers.iter().map(|f| f.to_string()).collect());
        obj
    }

    #[test]
    fn deletion_wins_over_uninstall_request() {
        assert_eq!(evaluate(true, true, true), LifecycleState::Deleting);
        assert_eq!(evaluate(true, true, false), LifecycleState::Deleting);
    }

    #[test]
    fn uninstall_request_needs_a_live_instance() {
        assert_eq!(
            evaluate(true, false, true),
            LifecycleState::PendingUninstall
        );
        assert_eq!(evaluate(false, false, true), LifecycleState::NoInstance);
    }

    #[test]
    fn active_when_nothing_pending() {
        assert_eq!(evaluate(true, false, false), LifecycleState::Active);
    }

    #[test]
    fn finalizer_add_is_idempotent() {
        let fresh = instance(&[]);
        assert_eq!(
            finalizers_with(&fresh),
            Some(vec![FINALIZER.to_string()])
        );

        let protected = instance(&[FINALIZER]);
        assert_eq!(finalizers_with(&protected), None);
    }

    #[test]
    fn finalizer_removal_preserves_foreign_entries() {
        let obj = instance(&["other.io/keep", FINALIZER]);
        assert_eq!(
            finalizers_without(&obj),
            vec!["other.io/keep".to_string()]
        );
    }
}
