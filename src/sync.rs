//! Generic apply logic: fetch-or-create, mutate-if-needed, own. Every
//! dependent kind goes through [`sync`] so ownership and diffing are derived
//! once instead of per kind.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    ObjectMeta, OwnerReference,
};
use kube::api::{Api, DeleteParams, PostParams};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::controller::ReconcileErr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Live object already matched the desired specification; no write issued.
    Unchanged,
    Created,
    Updated,
}

pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// `get` that folds 404 into `None`; any other failure propagates.
pub async fn get_opt<K>(
    api: &Api<K>,
    name: &str,
) -> Result<Option<K>, kube::Error>
where
    K: Clone + DeserializeOwned + std::fmt::Debug,
{
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(e) if is_not_found(&e) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Write-on-divergence decision. Kept separate so the idempotence property
/// is directly testable.
pub fn needs_update(before: &Value, after: &Value) -> bool {
    before != after
}

/// Converge one dependent: fetch the live object (or start from `fresh` on
/// 404), run the mutate closure over it, then create or update only when the
/// serialized form diverged. A converged dependent issues zero writes.
pub async fn sync<K, F>(
    api: &Api<K>,
    name: &str,
    fresh: K,
    mutate: F,
) -> Result<SyncOutcome, ReconcileErr>
where
    K: Clone + DeserializeOwned + Serialize + std::fmt::Debug,
    F: FnOnce(&mut K) -> Result<(), ReconcileErr>,
{
    let (mut obj, live) = match api.get(name).await {
        Ok(obj) => (obj, true),
        Err(e) if is_not_found(&e) => (fresh, false),
        Err(e) => return Err(ReconcileErr::Store(e)),
    };

    let before =
        serde_json::to_value(&obj).map_err(ReconcileErr::internal)?;
    mutate(&mut obj)?;

    if !live {
        debug!(%name, "creating dependent");
        api.create(&PostParams::default(), &obj)
            .await
            .map_err(ReconcileErr::Store)?;
        return Ok(SyncOutcome::Created);
    }

    let after = serde_json::to_value(&obj).map_err(ReconcileErr::internal)?;
    if needs_update(&before, &after) {
        debug!(%name, "dependent diverged; updating");
        api.replace(name, &PostParams::default(), &obj)
            .await
            .map_err(ReconcileErr::Store)?;
        Ok(SyncOutcome::Updated)
    } else {
        Ok(SyncOutcome::Unchanged)
    }
}

/// Delete that treats 404 as success; teardown paths re-run until the store
/// reports absence.
pub async fn delete_ignore_missing<K>(
    api: &Api<K>,
    name: &str,
) -> Result<(), ReconcileErr>
where
    K: Clone + DeserializeOwned + std::fmt::Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => Err(ReconcileErr::Store(e)),
    }
}

/// Establish (or confirm) the ownership link so the store's cascade delete
/// removes the dependent with its owner. Always writes the full reference
/// list so repeated application is a no-op.
pub fn ensure_owner(meta: &mut ObjectMeta, owner: &OwnerReference) {
    meta.owner_references = Some(vec![owner.clone()]);
}

/// Merge the monitoring selection labels into existing metadata without
/// disturbing labels set by other controllers.
pub fn ensure_labels(
    meta: &mut ObjectMeta,
    labels: &std::collections::BTreeMap<String, String>,
) {
    let existing = meta.labels.get_or_insert_with(Default::default);
    for (k, v) in labels {
        existing.insert(k.clone(), v.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converged_object_needs_no_update() {
        let v = json!({"spec": {"count": 3}});
        assert!(!needs_update(&v, &v.clone()));
    }

    #[test]
    fn diverged_object_needs_update() {
        let before = json!({"spec": {"count": 3}});
        let after = json!({"spec": {"count": 5}});
        assert!(needs_update(&before, &after));
    }

    #[test]
    fn ensure_owner_is_idempotent() {
        let owner = OwnerReference {
            api_version: "addons.stor.io/v1alpha1".into(),
            kind: "ManagedStorage".into(),
            name: "managed-storage".into(),
            uid: "abc-123".into(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        };
        let mut meta = ObjectMeta::default();
        ensure_owner(&mut meta, &owner);
        let first = serde_json::to_value(&meta).unwrap();
        ensure_owner(&mut meta, &owner);
        let second = serde_json::to_value(&meta).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn ensure_labels_preserves_foreign_labels() {
        let mut meta = ObjectMeta::default();
        meta.labels
            .get_or_insert_with(Default::default)
            .insert("other".into(), "keep".into());
        let mut wanted = std::collections::BTreeMap::new();
        wanted.insert("app".to_string(), "managed-storage".to_string());
        ensure_labels(&mut meta, &wanted);
        let labels = meta.labels.unwrap();
        assert_eq!(labels.get("other").map(String::as_str), Some("keep"));
        assert_eq!(
            labels.get("app").map(String::as_str),
            Some("managed-storage")
        );
    }
}
