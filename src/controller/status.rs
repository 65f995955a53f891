use k8s_openapi::api::apps::v1::StatefulSet;
use kube::{Api, Client};
use tracing::warn;

use super::{ALERTMANAGER_NAME, PROMETHEUS_NAME, STORAGE_CLUSTER_NAME};
use crate::crd::dependents::{Alertmanager, Prometheus, StorageCluster};
use crate::crd::{ComponentState, ComponentStatus, ComponentsStatus};
use crate::sync::get_opt;

/// Observe every tracked component. Read failures degrade the affected
/// component to Unknown instead of failing the pass.
pub async fn refresh(client: &Client, ns: &str) -> ComponentsStatus {
    ComponentsStatus {
        storage_cluster: ComponentStatus {
            state: storage_cluster_state(client, ns).await,
        },
        prometheus: ComponentStatus {
            state: prometheus_state(client, ns).await,
        },
        alertmanager: ComponentStatus {
            state: alertmanager_state(client, ns).await,
        },
    }
}

async fn storage_cluster_state(client: &Client, ns: &str) -> ComponentState {
    let api: Api<StorageCluster> = Api::namespaced(client.clone(), ns);
    match get_opt(&api, STORAGE_CLUSTER_NAME).await {
        Ok(Some(sc)) => from_phase(
            sc.status.as_ref().and_then(|s| s.phase.as_deref()),
        ),
        Ok(None) => ComponentState::NotFound,
        Err(e) => {
            warn!(error = %e, "unable to observe storage cluster");
            ComponentState::Unknown
        }
    }
}

async fn prometheus_state(client: &Client, ns: &str) -> ComponentState {
    let api: Api<Prometheus> = Api::namespaced(client.clone(), ns);
    let desired = match get_opt(&api, PROMETHEUS_NAME).await {
        Ok(Some(prom)) => prom.spec.replicas,
        Ok(None) => return ComponentState::NotFound,
        Err(e) => {
            warn!(error = %e, "unable to observe prometheus");
            return ComponentState::Unknown;
        }
    };
    workload_state(client, ns, &format!("prometheus-{PROMETHEUS_NAME}"), desired)
        .await
}

async fn alertmanager_state(client: &Client, ns: &str) -> ComponentState {
    let api: Api<Alertmanager> = Api::namespaced(client.clone(), ns);
    let desired = match get_opt(&api, ALERTMANAGER_NAME).await {
        Ok(Some(am)) => am.spec.replicas,
        Ok(None) => return ComponentState::NotFound,
        Err(e) => {
            warn!(error = %e, "unable to observe alertmanager");
            return ComponentState::Unknown;
        }
    };
    workload_state(
        client,
        ns,
        &format!("alertmanager-{ALERTMANAGER_NAME}"),
        desired,
    )
    .await
}

/// Readiness of the statefulset backing a monitoring resource. The resource
/// existing without its workload counts as Pending, not NotFound.
async fn workload_state(
    client: &Client,
    ns: &str,
    sts_name: &str,
    desired: Option<i32>,
) -> ComponentState {
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), ns);
    match get_opt(&api, sts_name).await {
        Ok(Some(sts)) => from_replicas(
            desired,
            sts.status.as_ref().and_then(|s| s.ready_replicas),
        ),
        Ok(None) => ComponentState::Pending,
        Err(e) => {
            warn!(error = %e, sts = sts_name, "unable to observe workload");
            ComponentState::Pending
        }
    }
}

pub fn from_phase(phase: Option<&str>) -> ComponentState {
    match phase {
        Some("Ready") => ComponentState::Ready,
        _ => ComponentState::Pending,
    }
}

/// Absent desired replica counts default to one, so a fresh object with no
/// ready replicas reads as Pending rather than trivially Ready.
pub fn from_replicas(desired: Option<i32>, ready: Option<i32>) -> ComponentState {
    if ready.unwrap_or(0) == desired.unwrap_or(1) {
        ComponentState::Ready
    } else {
        ComponentState::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_maps_to_state() {
        assert_eq!(from_phase(Some("Ready")), ComponentState::Ready);
        assert_eq!(from_phase(Some("Progressing")), ComponentState::Pending);
        assert_eq!(from_phase(Some("Error")), ComponentState::Pending);
        assert_eq!(from_phase(None), ComponentState::Pending);
    }

    #[test]
    fn replica_count_decides_readiness() {
        assert_eq!(from_replicas(Some(3), Some(3)), ComponentState::Ready);
        assert_eq!(from_replicas(Some(3), Some(2)), ComponentState::Pending);
        assert_eq!(from_replicas(Some(3), None), ComponentState::Pending);
    }

    #[test]
    fn missing_desired_count_defaults_to_one() {
        assert_eq!(from_replicas(None, Some(1)), ComponentState::Ready);
        assert_eq!(from_replicas(None, None), ComponentState::Pending);
        assert_eq!(from_replicas(None, Some(0)), ComponentState::Pending);
    }
}
