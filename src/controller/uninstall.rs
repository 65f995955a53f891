use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::{Api, Client, api::ListParams};
use tokio::time::Duration;

use super::ReconcileErr;
use crate::crd::{ComponentState, ComponentsStatus};

/// How long to wait before re-checking the safety gate when external volume
/// claims block the uninstall.
pub const UNINSTALL_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Uninstall only proceeds from a fully converged state; a degraded stack is
/// never torn down on a stale signal.
pub fn ready_for_uninstall(components: &ComponentsStatus) -> bool {
    components.storage_cluster.state == ComponentState::Ready
        && components.prometheus.state == ComponentState::Ready
        && components.alertmanager.state == ComponentState::Ready
}

/// True when any volume claim anywhere in the cluster still consumes a
/// storage class provisioned by this installation.
pub async fn find_external_claims(
    client: &Client,
    ns: &str,
) -> Result<bool, ReconcileErr> {
    let class_api: Api<StorageClass> = Api::all(client.clone());
    let claim_api: Api<PersistentVolumeClaim> = Api::all(client.clone());

    let classes = class_api.list(&ListParams::default()).await?.items;
    let claims = claim_api.list(&ListParams::default()).await?.items;

    let prefix = format!("{ns}.");
    Ok(claims_reference_owned_classes(&classes, &claims, &prefix))
}

pub fn claims_reference_owned_classes(
    classes: &[StorageClass],
    claims: &[PersistentVolumeClaim],
    provisioner_prefix: &str,
) -> bool {
    let owned: Vec<&str> = classes
        .iter()
        .filter(|sc| sc.provisioner.starts_with(provisioner_prefix))
        .filter_map(|sc| sc.metadata.name.as_deref())
        .collect();

    claims.iter().any(|pvc| {
        pvc.spec
            .as_ref()
            .and_then(|s| s.storage_class_name.as_deref())
            .map(|class| owned.contains(&class))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ComponentStatus;
    use k8s_openapi::api::core::v1::PersistentVolumeClaimSpec;

    fn components(
        storage: ComponentState,
        prometheus: ComponentState,
        alertmanager: ComponentState,
    ) -> ComponentsStatus {
        ComponentsStatus {
            storage_cluster: ComponentStatus { state: storage },
            prometheus: ComponentStatus { state: prometheus },
            alertmanager: ComponentStatus { state: alertmanager },
        }
    }

    fn class(name: &str, provisioner: &str) -> StorageClass {
        let mut sc = StorageClass::default();
        sc.metadata.name = Some(name.to_string());
        sc.provisioner = provisioner.to_string();
        sc
    }

    fn claim(class_name: Option<&str>) -> PersistentVolumeClaim {
        let mut pvc = PersistentVolumeClaim::default();
        pvc.spec = Some(PersistentVolumeClaimSpec {
            storage_class_name: class_name.map(str::to_string),
            ..Default::default()
        });
        pvc
    }

    #[test]
    fn gate_requires_all_components_ready() {
        assert!(ready_for_uninstall(&components(
            ComponentState::Ready,
            ComponentState::Ready,
            ComponentState::Ready,
        )));
        assert!(!ready_for_uninstall(&components(
            ComponentState::Ready,
            ComponentState::Pending,
            ComponentState::Ready,
        )));
        assert!(!ready_for_uninstall(&components(
            ComponentState::NotFound,
            ComponentState::Ready,
            ComponentState::Ready,
        )));
    }

    #[test]
    fn claim_on_owned_class_blocks_uninstall() {
        let classes = vec![
            class("owned-block", "stor-ns.rbd.csi.example.com"),
            class("foreign", "kubernetes.io/aws-ebs"),
        ];
        let claims = vec![claim(Some("owned-block"))];
        assert!(claims_reference_owned_classes(
            &classes, &claims, "stor-ns."
        ));
    }

    #[test]
    fn claims_on_foreign_classes_do_not_block() {
        let classes = vec![
            class("owned-block", "stor-ns.rbd.csi.example.com"),
            class("foreign", "kubernetes.io/aws-ebs"),
        ];
        let claims = vec![claim(Some("foreign")), claim(None)];
        assert!(!claims_reference_owned_classes(
            &classes, &claims, "stor-ns."
        ));
    }
}
