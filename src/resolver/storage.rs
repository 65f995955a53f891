use tracing::{info, warn};

use super::addon::AddonConfig;
use crate::controller::ReconcileErr;
use crate::crd::dependents::{ObjectStoreSpec, StorageClusterSpec};
use crate::templates;

/// Compute the desired storage cluster specification for the configured
/// deployment layout. `live` is the current cluster spec, consulted only for
/// monotonic safeguards.
pub fn desired_spec(
    deployment_type: &str,
    addon: &AddonConfig,
    live: Option<&StorageClusterSpec>,
) -> Result<StorageClusterSpec, ReconcileErr> {
    match deployment_type.to_ascii_lowercase().as_str() {
        "converged" => desired_converged(addon, live),
        other => Err(ReconcileErr::FatalConfig(format!(
            "invalid deployment type value: {other}"
        ))),
    }
}

fn desired_converged(
    addon: &AddonConfig,
    live: Option<&StorageClusterSpec>,
) -> Result<StorageClusterSpec, ReconcileErr> {
    let mut spec = templates::storage_cluster();

    let current = live_device_count(live);
    let ds = spec
        .storage_device_sets
        .iter_mut()
        .find(|d| d.name == templates::DEVICE_SET_NAME)
        .ok_or_else(|| {
            ReconcileErr::Internal(
                "default device set missing from storage cluster template"
                    .to_string(),
            )
        })?;
    ds.count = clamp_device_count(current, addon.device_set_count);

    if addon.enable_objectstore {
        info!("enabling object store subsystem");
        spec.object_store = Some(ObjectStoreSpec {
            reconcile_strategy: "manage".to_string(),
        });
    } else if live
        .and_then(|l| l.object_store.as_ref())
        .map(|o| o.reconcile_strategy == "manage")
        .unwrap_or(false)
    {
        warn!("disabling the object store is not supported; keeping it on");
        spec.object_store = Some(ObjectStoreSpec {
            reconcile_strategy: "manage".to_string(),
        });
    }

    Ok(spec)
}

fn live_device_count(live: Option<&StorageClusterSpec>) -> i32 {
    live.and_then(|spec| {
        spec.storage_device_sets
            .iter()
            .find(|d| d.name == templates::DEVICE_SET_NAME)
    })
    .map(|d| d.count)
    .unwrap_or(0)
}

/// Device set counts never shrink. A request below the live count keeps the
/// live count and records a warning.
pub fn clamp_device_count(live: i32, requested: i32) -> i32 {
    if requested < live {
        warn!(
            live, requested,
            "requested device set count would shrink the cluster; keeping current count"
        );
        live
    } else {
        requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addon(count: i32) -> AddonConfig {
        AddonConfig {
            device_set_count: count,
            enable_objectstore: false,
            notification_emails: vec![],
        }
    }

    fn live_with_count(count: i32) -> StorageClusterSpec {
        let mut spec = templates::storage_cluster();
        spec.storage_device_sets[0].count = count;
        spec
    }

    #[test]
    fn clamp_keeps_max_of_live_and_requested() {
        assert_eq!(clamp_device_count(3, 5), 5);
        assert_eq!(clamp_device_count(5, 2), 5);
        assert_eq!(clamp_device_count(4, 4), 4);
    }

    #[test]
    fn grow_then_shrink_keeps_grown_capacity() {
        // First pass: live 3, request 5 -> 5
        let live = live_with_count(3);
        let spec = desired_spec("converged", &addon(5), Some(&live)).unwrap();
        assert_eq!(spec.storage_device_sets[0].count, 5);

        // Next pass: request 2 against live 5 -> stays 5
        let spec2 = desired_spec("converged", &addon(2), Some(&spec)).unwrap();
        assert_eq!(spec2.storage_device_sets[0].count, 5);
    }

    #[test]
    fn first_creation_uses_requested_count() {
        let spec = desired_spec("converged", &addon(3), None).unwrap();
        assert_eq!(spec.storage_device_sets[0].count, 3);
    }

    #[test]
    fn unknown_deployment_type_is_fatal() {
        let err = desired_spec("external", &addon(1), None).unwrap_err();
        assert!(err.to_string().contains("external"));
    }

    #[test]
    fn objectstore_toggle_sets_manage_strategy() {
        let mut a = addon(1);
        a.enable_objectstore = true;
        let spec = desired_spec("converged", &a, None).unwrap();
        assert_eq!(spec.object_store.unwrap().reconcile_strategy, "manage");
    }

    #[test]
    fn objectstore_cannot_be_disabled_once_live() {
        let mut live = templates::storage_cluster();
        live.object_store = Some(ObjectStoreSpec {
            reconcile_strategy: "manage".to_string(),
        });
        let spec = desired_spec("converged", &addon(1), Some(&live)).unwrap();
        assert_eq!(spec.object_store.unwrap().reconcile_strategy, "manage");
    }
}
