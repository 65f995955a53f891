//! Minimal typed mirrors of the dependent custom resources the operator
//! owns. Only the fields this controller reads or writes are modelled; the
//! owning operators carry the authoritative schemas.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// --- Storage engine ---

#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default,
)]
#[kube(
    group = "storage.stor.io",
    version = "v1",
    kind = "StorageCluster",
    plural = "storageclusters",
    namespaced,
    status = "StorageClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct StorageClusterSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub storage_device_sets: Vec<StorageDeviceSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_store: Option<ObjectStoreSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
pub struct StorageDeviceSet {
    pub name: String,
    pub count: i32,
    #[serde(default)]
    pub portable: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStoreSpec {
    /// "manage" enables the optional object store subsystem; "ignore"
    /// leaves it alone.
    pub reconcile_strategy: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
pub struct StorageClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

// --- Monitoring stack (prometheus-operator API mirrors) ---

#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default,
)]
#[kube(
    group = "monitoring.coreos.com",
    version = "v1",
    kind = "Prometheus",
    plural = "prometheuses",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alerting: Option<AlertingSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_alert_relabel_configs: Option<SecretKeySelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_selector: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_monitor_selector: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_monitor_selector: Option<LabelSelector>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
pub struct AlertingSpec {
    #[serde(default)]
    pub alertmanagers: Vec<AlertmanagerEndpoints>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
pub struct AlertmanagerEndpoints {
    pub namespace: String,
    pub name: String,
    pub port: String,
}

#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default,
)]
#[kube(
    group = "monitoring.coreos.com",
    version = "v1",
    kind = "Alertmanager",
    plural = "alertmanagers",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alertmanager_config_selector: Option<LabelSelector>,
}

#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default,
)]
#[kube(
    group = "monitoring.coreos.com",
    version = "v1alpha1",
    kind = "AlertmanagerConfig",
    plural = "alertmanagerconfigs",
    namespaced
)]
pub struct AlertmanagerConfigSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub receivers: Vec<Receiver>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub receiver: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matchers: Vec<Matcher>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_interval: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
pub struct Matcher {
    pub name: String,
    pub value: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct Receiver {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pagerduty_configs: Vec<PagerdutyConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub webhook_configs: Vec<WebhookConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub email_configs: Vec<EmailConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct PagerdutyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_key: Option<SecretKeySelector>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<KeyValue>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
pub struct WebhookConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct EmailConfig {
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smarthost: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_password: Option<SecretKeySelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

/// Secret key reference as the monitoring API expects it (name required).
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
pub struct SecretKeySelector {
    pub name: String,
    pub key: String,
}

#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default,
)]
#[kube(
    group = "monitoring.coreos.com",
    version = "v1",
    kind = "PrometheusRule",
    plural = "prometheusrules",
    namespaced
)]
pub struct PrometheusRuleSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<RuleGroup>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
pub struct RuleGroup {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<Rule>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
pub struct Rule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,
    pub expr: String,
    #[serde(
        default,
        rename = "for",
        skip_serializing_if = "Option::is_none"
    )]
    pub for_: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

// --- Egress firewall (OpenShift network API mirror) ---

#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default,
)]
#[kube(
    group = "network.openshift.io",
    version = "v1",
    kind = "EgressNetworkPolicy",
    plural = "egressnetworkpolicies",
    namespaced
)]
pub struct EgressNetworkPolicySpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub egress: Vec<EgressNetworkPolicyRule>,
}

#[derive(
    Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq,
)]
pub struct EgressNetworkPolicyRule {
    #[serde(rename = "type")]
    pub type_: String,
    pub to: EgressNetworkPolicyPeer,
}

#[derive(
    Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq,
)]
#[serde(rename_all = "camelCase")]
pub struct EgressNetworkPolicyPeer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr_selector: Option<String>,
}

pub const EGRESS_RULE_ALLOW: &str = "Allow";
pub const EGRESS_RULE_DENY: &str = "Deny";

pub type LabelSelector =
    k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
