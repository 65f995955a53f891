pub mod lifecycle;
pub mod reconcile;
pub mod status;
pub mod uninstall;

use std::sync::Arc;

use futures_util::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::runtime::reflector::ObjectRef;
use kube::{
    Api, Client, ResourceExt,
    runtime::{Controller, controller::Action, watcher::Config},
};
use tokio::time::Duration;
use tracing::{error, info};

use crate::config::OperatorConfig;
use crate::crd::ManagedStorage;
use crate::crd::dependents::{
    Alertmanager, AlertmanagerConfig, EgressNetworkPolicy, Prometheus,
    PrometheusRule, StorageCluster,
};

/// Fixed identities of the managed instance and its dependent catalogue.
pub const INSTANCE_NAME: &str = "managed-storage";
pub const STORAGE_CLUSTER_NAME: &str = "storage-cluster";
pub const PROMETHEUS_NAME: &str = "managed-storage-prometheus";
pub const ALERTMANAGER_NAME: &str = "managed-storage-alertmanager";
pub const ALERTMANAGER_CONFIG_NAME: &str =
    "managed-storage-alertmanager-config";
pub const HEARTBEAT_RULE_NAME: &str = "heartbeat-rule";
pub const EGRESS_POLICY_NAME: &str = "egress-rule";
pub const INGRESS_POLICY_NAME: &str = "ingress-rule";
pub const STORAGE_INGRESS_POLICY_NAME: &str = "storage-ingress-rule";
pub const ALERT_RELABEL_SECRET_NAME: &str = "alert-relabel-config-secret";
pub const ALERT_RELABEL_SECRET_KEY: &str = "alertrelabelconfig.yaml";
pub const CSI_CONFIGMAP_NAME: &str = "csi-operator-config";

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    /// A required configuration field is absent or empty; always names the
    /// specific secret and key so operators can diagnose quickly.
    #[error("{secret} secret does not contain a {key} entry")]
    MissingSecretKey { secret: String, key: String },
    #[error("invalid value for {field}: {value}")]
    InvalidConfig { field: String, value: String },
    /// An input object the pass cannot proceed without could not be read.
    #[error("failed to get required input {name}: {source}")]
    RequiredInput {
        name: String,
        #[source]
        source: kube::Error,
    },
    /// Unrecognized deployment mode; aborts immediately.
    #[error("{0}")]
    FatalConfig(String),
    #[error("store error: {0}")]
    Store(#[from] kube::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ReconcileErr {
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        ReconcileErr::Internal(e.to_string())
    }
}

#[derive(Clone)]
pub struct ControllerContext {
    pub client: Client,
    pub cfg: OperatorConfig,
}

/// Run the controller loop. All triggers — the instance itself, owned
/// dependents, and the auxiliary input objects — collapse onto the single
/// instance key, so at most one reconciliation runs at a time.
pub async fn run_controller(
    client: Client,
    cfg: OperatorConfig,
) -> anyhow::Result<()> {
    let ns = cfg.namespace.clone();
    let api: Api<ManagedStorage> = Api::namespaced(client.clone(), &ns);

    let input_secret_names = vec![
        cfg.addon_param_secret_name.clone(),
        cfg.pagerduty_secret_name.clone(),
        cfg.heartbeat_secret_name.clone(),
        cfg.smtp_secret_name.clone(),
    ];
    let watched_configmaps = vec![
        cfg.addon_configmap_name.clone(),
        CSI_CONFIGMAP_NAME.to_string(),
    ];
    let monitored_statefulsets = vec![
        format!("prometheus-{PROMETHEUS_NAME}"),
        format!("alertmanager-{ALERTMANAGER_NAME}"),
    ];

    let ctx = Arc::new(ControllerContext {
        client: client.clone(),
        cfg,
    });

    let instance_key = move |obj_ns: Option<String>| {
        ObjectRef::<ManagedStorage>::new(INSTANCE_NAME)
            .within(&obj_ns.unwrap_or_default())
    };

    let key_for_secrets = instance_key.clone();
    let key_for_cms = instance_key.clone();
    let key_for_sts = instance_key;

    Controller::new(api, Config::default())
        .owns(
            Api::<StorageCluster>::namespaced(client.clone(), &ns),
            Config::default(),
        )
        .owns(
            Api::<Prometheus>::namespaced(client.clone(), &ns),
            Config::default(),
        )
        .owns(
            Api::<Alertmanager>::namespaced(client.clone(), &ns),
            Config::default(),
        )
        .owns(
            Api::<AlertmanagerConfig>::namespaced(client.clone(), &ns),
            Config::default(),
        )
        .owns(
            Api::<PrometheusRule>::namespaced(client.clone(), &ns),
            Config::default(),
        )
        .owns(
            Api::<EgressNetworkPolicy>::namespaced(client.clone(), &ns),
            Config::default(),
        )
        .owns(
            Api::<NetworkPolicy>::namespaced(client.clone(), &ns),
            Config::default(),
        )
        .owns(
            Api::<Secret>::namespaced(client.clone(), &ns),
            Config::default(),
        )
        .watches(
            Api::<Secret>::namespaced(client.clone(), &ns),
            Config::default(),
            move |secret| {
                input_secret_names
                    .contains(&secret.name_any())
                    .then(|| key_for_secrets(secret.namespace()))
            },
        )
        .watches(
            Api::<ConfigMap>::namespaced(client.clone(), &ns),
            Config::default(),
            move |cm| {
                watched_configmaps
                    .contains(&cm.name_any())
                    .then(|| key_for_cms(cm.namespace()))
            },
        )
        .watches(
            Api::<StatefulSet>::namespaced(client.clone(), &ns),
            Config::default(),
            move |sts| {
                monitored_statefulsets
                    .contains(&sts.name_any())
                    .then(|| key_for_sts(sts.namespace()))
            },
        )
        .run(reconcile::reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((_obj_ref, action)) => {
                    info!("reconciled: requeue={:?}", action)
                }
                Err(e) => error!(error = ?e, "reconcile error"),
            }
        })
        .await;

    Ok(())
}

fn error_policy(
    _obj: Arc<ManagedStorage>,
    _error: &ReconcileErr,
    _ctx: Arc<ControllerContext>,
) -> Action {
    Action::requeue(Duration::from_secs(60))
}
