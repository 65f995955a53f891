//! The reconciliation pass: observe, branch on lifecycle, converge the
//! dependent catalogue in fixed order, then persist status exactly once.

use std::sync::Arc;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{
    Api, Client, Resource, ResourceExt,
    api::{Patch, PatchParams, PostParams},
    runtime::controller::Action,
};
use serde_json::json;
use tracing::{info, instrument, warn};

use super::lifecycle::{self, LifecycleState};
use super::status;
use super::uninstall::{self, UNINSTALL_RETRY_DELAY};
use super::{
    ALERT_RELABEL_SECRET_KEY, ALERT_RELABEL_SECRET_NAME,
    ALERTMANAGER_CONFIG_NAME, ALERTMANAGER_NAME, CSI_CONFIGMAP_NAME,
    ControllerContext, EGRESS_POLICY_NAME, HEARTBEAT_RULE_NAME,
    INGRESS_POLICY_NAME, PROMETHEUS_NAME, ReconcileErr, STORAGE_CLUSTER_NAME,
    STORAGE_INGRESS_POLICY_NAME,
};
use crate::crd::dependents::{
    Alertmanager, AlertmanagerConfig, EgressNetworkPolicy, LabelSelector,
    Prometheus, PrometheusRule, SecretKeySelector, StorageCluster,
};
use crate::crd::{
    ComponentState, ComponentsStatus, ManagedStorage, ManagedStorageStatus,
    ReconcileStrategy,
};
use crate::resolver::{
    self, SecretData, addon::AddonConfig, alerting, network, storage,
};
use crate::sync::{
    self, delete_ignore_missing, ensure_labels, ensure_owner, is_not_found,
};
use crate::templates;

const CSI_PROVISIONER_RESOURCE_KEY: &str = "CSI_PROVISIONER_RESOURCE";
const CSI_PLUGIN_RESOURCE_KEY: &str = "CSI_PLUGIN_RESOURCE";

const PROVISIONER_CONTAINERS: &[&str] =
    &["csi-provisioner", "csi-resizer", "csi-attacher", "csi-snapshotter"];
const PLUGIN_CONTAINERS: &[&str] =
    &["driver-registrar", "csi-rbdplugin", "liveness-exporter"];

#[instrument(skip_all, fields(name = %obj.name_any()))]
pub async fn reconcile(
    obj: Arc<ManagedStorage>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, ReconcileErr> {
    let ns = obj
        .namespace()
        .unwrap_or_else(|| ctx.cfg.namespace.clone());
    let api: Api<ManagedStorage> = Api::namespaced(ctx.client.clone(), &ns);

    // The uninstall signal and component states are sampled up front so all
    // later decisions work off one consistent observation.
    let uninstall_requested = check_uninstall_condition(&ctx, &ns).await;
    let components = status::refresh(&ctx.client, &ns).await;

    let mut new_status = ManagedStorageStatus {
        reconcile_strategy: obj
            .status
            .as_ref()
            .and_then(|s| s.reconcile_strategy),
        components: components.clone(),
        last_refreshed: Some(chrono::Utc::now().to_rfc3339()),
    };

    let outcome = run_phases(
        &ctx,
        &api,
        &obj,
        &ns,
        uninstall_requested,
        &components,
        &mut new_status,
    )
    .await;

    // Status is persisted exactly once per pass, whatever the phases did.
    // A reconcile error keeps priority over a status write failure.
    let patch = json!({ "status": new_status });
    match api
        .patch_status(
            &obj.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await
    {
        Ok(_) => {}
        // The instance may have been deleted during this very pass.
        Err(e) if is_not_found(&e) => {}
        Err(e) => {
            if outcome.is_ok() {
                return Err(ReconcileErr::Store(e));
            }
            warn!(error = %e, "status update failed after reconcile error");
        }
    }

    outcome
}

#[allow(clippy::too_many_arguments)]
async fn run_phases(
    ctx: &ControllerContext,
    api: &Api<ManagedStorage>,
    obj: &ManagedStorage,
    ns: &str,
    uninstall_requested: bool,
    components: &ComponentsStatus,
    new_status: &mut ManagedStorageStatus,
) -> Result<Action, ReconcileErr> {
    let state = lifecycle::evaluate(
        obj.meta().uid.is_some(),
        obj.meta().deletion_timestamp.is_some(),
        uninstall_requested,
    );

    match state {
        LifecycleState::NoInstance => Ok(Action::await_change()),
        LifecycleState::Deleting => {
            if components.storage_cluster.state == ComponentState::NotFound {
                info!("storage cluster is gone; releasing the instance");
                lifecycle::remove_finalizer(api, obj).await?;
            } else {
                // The engine must be torn down synchronously; the store's
                // cascade delete alone would drop data-bearing state without
                // ordering.
                info!("deleting the storage cluster");
                let sc_api: Api<StorageCluster> =
                    Api::namespaced(ctx.client.clone(), ns);
                delete_ignore_missing(&sc_api, STORAGE_CLUSTER_NAME).await?;
            }
            Ok(Action::await_change())
        }
        LifecycleState::Active | LifecycleState::PendingUninstall => {
            lifecycle::ensure_finalizer(api, obj).await?;

            let strategy =
                ReconcileStrategy::effective(obj.spec.reconcile_strategy.as_deref());
            let pass = PassContext::gather(ctx, obj, ns, strategy).await?;
            converge_all(&pass).await?;
            new_status.reconcile_strategy = Some(strategy);

            if state == LifecycleState::PendingUninstall {
                if !uninstall::ready_for_uninstall(components) {
                    info!(
                        "uninstall requested but components are not ready; deferring"
                    );
                    return Ok(Action::await_change());
                }
                if uninstall::find_external_claims(&ctx.client, ns).await? {
                    info!(
                        "volume claims still consume owned storage classes; retrying"
                    );
                    return Ok(Action::requeue(UNINSTALL_RETRY_DELAY));
                }
                info!("uninstall gate passed; deleting the managed instance");
                delete_ignore_missing(api, &obj.name_any()).await?;
            }
            Ok(Action::await_change())
        }
    }
}

/// Everything a convergence pass needs, gathered before any write so a
/// missing input fails the pass without leaving it half applied.
struct PassContext<'a> {
    client: Client,
    ns: String,
    cfg: &'a crate::config::OperatorConfig,
    strategy: ReconcileStrategy,
    owner: OwnerReference,
    addon: AddonConfig,
    pager: SecretData,
    heartbeat: SecretData,
    smtp: SecretData,
}

impl<'a> PassContext<'a> {
    async fn gather(
        ctx: &'a ControllerContext,
        obj: &ManagedStorage,
        ns: &str,
        strategy: ReconcileStrategy,
    ) -> Result<PassContext<'a>, ReconcileErr> {
        let owner = obj.controller_owner_ref(&()).ok_or_else(|| {
            ReconcileErr::Internal(
                "managed instance carries no uid; cannot own dependents"
                    .to_string(),
            )
        })?;

        let addon_data =
            required_secret(&ctx.client, ns, &ctx.cfg.addon_param_secret_name)
                .await?;
        let addon = resolver::addon::parse(&addon_data)?;
        let pager =
            required_secret(&ctx.client, ns, &ctx.cfg.pagerduty_secret_name)
                .await?;
        let heartbeat =
            required_secret(&ctx.client, ns, &ctx.cfg.heartbeat_secret_name)
                .await?;
        let smtp =
            required_secret(&ctx.client, ns, &ctx.cfg.smtp_secret_name)
                .await?;

        Ok(PassContext {
            client: ctx.client.clone(),
            ns: ns.to_string(),
            cfg: &ctx.cfg,
            strategy,
            owner,
            addon,
            pager,
            heartbeat,
            smtp,
        })
    }
}

async fn required_secret(
    client: &Client,
    ns: &str,
    name: &str,
) -> Result<SecretData, ReconcileErr> {
    let api: Api<Secret> = Api::namespaced(client.clone(), ns);
    match api.get(name).await {
        Ok(secret) => Ok(secret.data.unwrap_or_default()),
        Err(source) => Err(ReconcileErr::RequiredInput {
            name: name.to_string(),
            source,
        }),
    }
}

/// Converge the full catalogue in its fixed order: storage engine, alerting
/// stack, network policies, then operator-version tuning. The first failure
/// aborts the pass; earlier writes stay applied and the next pass resumes.
async fn converge_all(pass: &PassContext<'_>) -> Result<(), ReconcileErr> {
    sync_storage_cluster(pass).await?;
    sync_alert_relabel_secret(pass).await?;
    sync_prometheus(pass).await?;
    sync_alertmanager(pass).await?;
    sync_alertmanager_config(pass).await?;
    sync_heartbeat_rule(pass).await?;
    sync_egress_policy(pass).await?;
    sync_ingress_policies(pass).await?;
    sync_operator_config(pass).await?;
    Ok(())
}

async fn sync_storage_cluster(
    pass: &PassContext<'_>,
) -> Result<(), ReconcileErr> {
    let api: Api<StorageCluster> =
        Api::namespaced(pass.client.clone(), &pass.ns);
    let fresh = StorageCluster::new(STORAGE_CLUSTER_NAME, Default::default());
    sync::sync(&api, STORAGE_CLUSTER_NAME, fresh, |sc| {
        ensure_owner(&mut sc.metadata, &pass.owner);
        // Strategy "none" leaves the live spec to its external owner;
        // ownership is still enforced so teardown keeps working.
        if pass.strategy == ReconcileStrategy::Strict {
            let desired = storage::desired_spec(
                &pass.cfg.deployment_type,
                &pass.addon,
                Some(&sc.spec),
            )?;
            sc.spec = desired;
        }
        Ok(())
    })
    .await?;
    Ok(())
}

async fn sync_alert_relabel_secret(
    pass: &PassContext<'_>,
) -> Result<(), ReconcileErr> {
    let api: Api<Secret> = Api::namespaced(pass.client.clone(), &pass.ns);
    // Alert sources in other namespaces are relabelled onto this install's
    // namespace so routing matches regardless of origin.
    let relabel = serde_json::to_string(&json!([{
        "source_labels": ["namespace"],
        "target_label": "alertnamespace",
    }, {
        "target_label": "namespace",
        "replacement": pass.ns,
    }]))
    .map_err(ReconcileErr::internal)?;

    let mut fresh = Secret::default();
    fresh.metadata.name = Some(ALERT_RELABEL_SECRET_NAME.to_string());
    sync::sync(&api, ALERT_RELABEL_SECRET_NAME, fresh, |secret| {
        ensure_owner(&mut secret.metadata, &pass.owner);
        let data = secret.data.get_or_insert_with(Default::default);
        data.insert(
            ALERT_RELABEL_SECRET_KEY.to_string(),
            k8s_openapi::ByteString(relabel.into_bytes()),
        );
        Ok(())
    })
    .await?;
    Ok(())
}

async fn sync_prometheus(pass: &PassContext<'_>) -> Result<(), ReconcileErr> {
    let api: Api<Prometheus> = Api::namespaced(pass.client.clone(), &pass.ns);

    let mut desired = templates::prometheus(ALERTMANAGER_NAME);
    if let Some(alerting) = desired.alerting.as_mut() {
        for endpoint in &mut alerting.alertmanagers {
            endpoint.namespace = pass.ns.clone();
        }
    }
    desired.additional_alert_relabel_configs = Some(SecretKeySelector {
        name: ALERT_RELABEL_SECRET_NAME.to_string(),
        key: ALERT_RELABEL_SECRET_KEY.to_string(),
    });

    let fresh = Prometheus::new(PROMETHEUS_NAME, Default::default());
    sync::sync(&api, PROMETHEUS_NAME, fresh, |prom| {
        ensure_owner(&mut prom.metadata, &pass.owner);
        ensure_labels(&mut prom.metadata, &templates::mon_labels());
        prom.spec = desired;
        Ok(())
    })
    .await?;
    Ok(())
}

async fn sync_alertmanager(
    pass: &PassContext<'_>,
) -> Result<(), ReconcileErr> {
    let api: Api<Alertmanager> =
        Api::namespaced(pass.client.clone(), &pass.ns);

    let mut desired = templates::alertmanager();
    desired.alertmanager_config_selector = Some(LabelSelector {
        match_labels: Some(templates::mon_labels()),
        ..Default::default()
    });

    let fresh = Alertmanager::new(ALERTMANAGER_NAME, Default::default());
    sync::sync(&api, ALERTMANAGER_NAME, fresh, |am| {
        ensure_owner(&mut am.metadata, &pass.owner);
        ensure_labels(&mut am.metadata, &templates::mon_labels());
        am.spec = desired;
        Ok(())
    })
    .await?;
    Ok(())
}

async fn sync_alertmanager_config(
    pass: &PassContext<'_>,
) -> Result<(), ReconcileErr> {
    let api: Api<AlertmanagerConfig> =
        Api::namespaced(pass.client.clone(), &pass.ns);

    let desired = alerting::resolve(
        &alerting::AlertingSecrets {
            pager: &pass.pager,
            heartbeat: &pass.heartbeat,
            smtp: &pass.smtp,
        },
        &alerting::AlertingWiring {
            pagerduty_secret_name: &pass.cfg.pagerduty_secret_name,
            smtp_secret_name: &pass.cfg.smtp_secret_name,
            sop_endpoint: &pass.cfg.sop_endpoint,
            smtp_from: &pass.cfg.alert_smtp_from,
        },
        &pass.addon.notification_emails,
    )?;

    let fresh =
        AlertmanagerConfig::new(ALERTMANAGER_CONFIG_NAME, Default::default());
    sync::sync(&api, ALERTMANAGER_CONFIG_NAME, fresh, |cfg| {
        ensure_owner(&mut cfg.metadata, &pass.owner);
        ensure_labels(&mut cfg.metadata, &templates::mon_labels());
        cfg.spec = desired;
        Ok(())
    })
    .await?;
    Ok(())
}

async fn sync_heartbeat_rule(
    pass: &PassContext<'_>,
) -> Result<(), ReconcileErr> {
    let api: Api<PrometheusRule> =
        Api::namespaced(pass.client.clone(), &pass.ns);
    let desired = templates::heartbeat_rule(&pass.ns);

    let fresh = PrometheusRule::new(HEARTBEAT_RULE_NAME, Default::default());
    sync::sync(&api, HEARTBEAT_RULE_NAME, fresh, |rule| {
        ensure_owner(&mut rule.metadata, &pass.owner);
        ensure_labels(&mut rule.metadata, &templates::mon_labels());
        rule.spec = desired;
        Ok(())
    })
    .await?;
    Ok(())
}

async fn sync_egress_policy(
    pass: &PassContext<'_>,
) -> Result<(), ReconcileErr> {
    let api: Api<EgressNetworkPolicy> =
        Api::namespaced(pass.client.clone(), &pass.ns);

    let snitch_url = resolver::secret_str(
        "heartbeat",
        &pass.heartbeat,
        alerting::SNITCH_URL_KEY,
    )?;
    let heartbeat_host = network::heartbeat_hostname(snitch_url)?;
    let smtp_host =
        resolver::secret_str("smtp", &pass.smtp, alerting::SMTP_HOST_KEY)?;
    let desired = network::egress_spec(&heartbeat_host, smtp_host);

    let fresh = EgressNetworkPolicy::new(EGRESS_POLICY_NAME, Default::default());
    sync::sync(&api, EGRESS_POLICY_NAME, fresh, |policy| {
        ensure_owner(&mut policy.metadata, &pass.owner);
        policy.spec = desired;
        Ok(())
    })
    .await?;
    Ok(())
}

async fn sync_ingress_policies(
    pass: &PassContext<'_>,
) -> Result<(), ReconcileErr> {
    let api: Api<NetworkPolicy> =
        Api::namespaced(pass.client.clone(), &pass.ns);

    let mut fresh = NetworkPolicy::default();
    fresh.metadata.name = Some(INGRESS_POLICY_NAME.to_string());
    sync::sync(&api, INGRESS_POLICY_NAME, fresh, |policy| {
        ensure_owner(&mut policy.metadata, &pass.owner);
        policy.spec = Some(templates::ingress_policy());
        Ok(())
    })
    .await?;

    let mut fresh = NetworkPolicy::default();
    fresh.metadata.name = Some(STORAGE_INGRESS_POLICY_NAME.to_string());
    sync::sync(&api, STORAGE_INGRESS_POLICY_NAME, fresh, |policy| {
        ensure_owner(&mut policy.metadata, &pass.owner);
        policy.spec = Some(templates::storage_ingress_policy());
        Ok(())
    })
    .await?;
    Ok(())
}

/// Tune the CSI sidecar resources in the storage operator's own config map.
/// The map belongs to that operator, so it is never owned or created here;
/// its absence is a hard input error.
async fn sync_operator_config(
    pass: &PassContext<'_>,
) -> Result<(), ReconcileErr> {
    let api: Api<ConfigMap> = Api::namespaced(pass.client.clone(), &pass.ns);
    let mut cm = api.get(CSI_CONFIGMAP_NAME).await.map_err(|source| {
        ReconcileErr::RequiredInput {
            name: CSI_CONFIGMAP_NAME.to_string(),
            source,
        }
    })?;

    let desired = [
        (
            CSI_PROVISIONER_RESOURCE_KEY,
            requirements_payload(PROVISIONER_CONTAINERS)?,
        ),
        (
            CSI_PLUGIN_RESOURCE_KEY,
            requirements_payload(PLUGIN_CONTAINERS)?,
        ),
    ];

    let data = cm.data.get_or_insert_with(Default::default);
    let diverged = desired
        .iter()
        .any(|(key, value)| data.get(*key) != Some(value));
    if diverged {
        for (key, value) in desired {
            data.insert(key.to_string(), value);
        }
        info!("updating csi sidecar resource tuning");
        api.replace(CSI_CONFIGMAP_NAME, &PostParams::default(), &cm)
            .await?;
    }
    Ok(())
}

fn requirements_payload(names: &[&str]) -> Result<String, ReconcileErr> {
    let entries: Vec<_> = names
        .iter()
        .map(|name| {
            json!({
                "name": name,
                "resource": templates::resource_requirements(name),
            })
        })
        .collect();
    serde_json::to_string(&entries).map_err(ReconcileErr::internal)
}

/// The uninstall signal: the addon config map carrying the delete label.
/// Read failures other than absence are logged and treated as "not yet".
async fn check_uninstall_condition(
    ctx: &ControllerContext,
    ns: &str,
) -> bool {
    let api: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), ns);
    match api.get(&ctx.cfg.addon_configmap_name).await {
        Ok(cm) => cm
            .metadata
            .labels
            .as_ref()
            .map(|labels| {
                labels.contains_key(&ctx.cfg.addon_configmap_delete_label_key)
            })
            .unwrap_or(false),
        Err(e) => {
            if !is_not_found(&e) {
                warn!(error = %e, "unable to read the addon config map");
            }
            false
        }
    }
}
