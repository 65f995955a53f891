//! Static desired-state templates for the dependent catalogue. The resolver
//! layers dynamic values (capacity, credentials, derived rules) on top of
//! these; templates themselves never depend on live state.

use k8s_openapi::api::networking::v1::{
    NetworkPolicyIngressRule, NetworkPolicyPeer, NetworkPolicySpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::BTreeMap;

use crate::crd::dependents::{
    AlertingSpec, AlertmanagerConfigSpec, AlertmanagerEndpoints,
    AlertmanagerSpec, EGRESS_RULE_DENY, EgressNetworkPolicyPeer,
    EgressNetworkPolicyRule, EgressNetworkPolicySpec, Matcher, PagerdutyConfig,
    PrometheusRuleSpec, PrometheusSpec, Receiver, Route, Rule, RuleGroup,
    StorageClusterSpec, StorageDeviceSet, WebhookConfig,
};

pub const DEVICE_SET_NAME: &str = "default";

pub const RECEIVER_PAGERDUTY: &str = "pagerduty";
pub const RECEIVER_HEARTBEAT: &str = "heartbeat";
pub const RECEIVER_EMAIL: &str = "email";

pub const HEARTBEAT_RULE_GROUP: &str = "heartbeat-alert";
pub const HEARTBEAT_ALERT_NAME: &str = "HeartbeatWatchdog";

/// Label applied to every monitoring object so the Prometheus and
/// Alertmanager instances select them.
pub const MON_LABEL_KEY: &str = "app";
pub const MON_LABEL_VALUE: &str = "managed-storage";

pub fn mon_labels() -> BTreeMap<String, String> {
    let mut m = BTreeMap::new();
    m.insert(MON_LABEL_KEY.to_string(), MON_LABEL_VALUE.to_string());
    m
}

fn mon_selector() -> LabelSelector {
    LabelSelector {
        match_labels: Some(mon_labels()),
        ..Default::default()
    }
}

pub fn storage_cluster() -> StorageClusterSpec {
    StorageClusterSpec {
        storage_device_sets: vec![StorageDeviceSet {
            name: DEVICE_SET_NAME.to_string(),
            count: 1,
            portable: true,
        }],
        object_store: Some(crate::crd::dependents::ObjectStoreSpec {
            reconcile_strategy: "ignore".to_string(),
        }),
    }
}

pub fn prometheus(alertmanager_name: &str) -> PrometheusSpec {
    PrometheusSpec {
        replicas: Some(1),
        alerting: Some(AlertingSpec {
            alertmanagers: vec![AlertmanagerEndpoints {
                // Namespace is filled in by the resolver per instance
                namespace: String::new(),
                name: alertmanager_name.to_string(),
                port: "web".to_string(),
            }],
        }),
        additional_alert_relabel_configs: None,
        rule_selector: Some(mon_selector()),
        service_monitor_selector: Some(mon_selector()),
        pod_monitor_selector: Some(mon_selector()),
    }
}

pub fn alertmanager() -> AlertmanagerSpec {
    AlertmanagerSpec {
        replicas: Some(1),
        alertmanager_config_selector: None,
    }
}

/// Receiver skeleton for the alerting configuration. The resolver fills in
/// credentials and recipients; receivers keep their declared order.
pub fn alertmanager_config() -> AlertmanagerConfigSpec {
    AlertmanagerConfigSpec {
        route: Some(Route {
            receiver: RECEIVER_PAGERDUTY.to_string(),
            matchers: vec![],
            routes: vec![
                Route {
                    receiver: RECEIVER_HEARTBEAT.to_string(),
                    matchers: vec![Matcher {
                        name: "alertname".to_string(),
                        value: HEARTBEAT_ALERT_NAME.to_string(),
                    }],
                    routes: vec![],
                    repeat_interval: Some("5m".to_string()),
                },
                Route {
                    receiver: RECEIVER_EMAIL.to_string(),
                    matchers: vec![Matcher {
                        name: "severity".to_string(),
                        value: "warning".to_string(),
                    }],
                    routes: vec![],
                    repeat_interval: None,
                },
            ],
            repeat_interval: None,
        }),
        receivers: vec![
            Receiver {
                name: RECEIVER_PAGERDUTY.to_string(),
                pagerduty_configs: vec![PagerdutyConfig::default()],
                ..Default::default()
            },
            Receiver {
                name: RECEIVER_HEARTBEAT.to_string(),
                webhook_configs: vec![WebhookConfig::default()],
                ..Default::default()
            },
            Receiver {
                name: RECEIVER_EMAIL.to_string(),
                ..Default::default()
            },
        ],
    }
}

/// Always-firing watchdog rule; absence of the alert at the heartbeat
/// endpoint pages the on-call.
pub fn heartbeat_rule(namespace: &str) -> PrometheusRuleSpec {
    let mut labels = BTreeMap::new();
    labels.insert("namespace".to_string(), namespace.to_string());
    PrometheusRuleSpec {
        groups: vec![RuleGroup {
            name: HEARTBEAT_RULE_GROUP.to_string(),
            rules: vec![Rule {
                alert: Some(HEARTBEAT_ALERT_NAME.to_string()),
                expr: "vector(1)".to_string(),
                for_: None,
                labels,
            }],
        }],
    }
}

/// Default-deny egress. Derived allow rules (heartbeat host, SMTP host) are
/// prepended by the resolver, never replacing this template.
pub fn egress_policy() -> EgressNetworkPolicySpec {
    EgressNetworkPolicySpec {
        egress: vec![EgressNetworkPolicyRule {
            type_: EGRESS_RULE_DENY.to_string(),
            to: EgressNetworkPolicyPeer {
                dns_name: None,
                cidr_selector: Some("0.0.0.0/0".to_string()),
            },
        }],
    }
}

/// Intra-namespace ingress only.
pub fn ingress_policy() -> NetworkPolicySpec {
    NetworkPolicySpec {
        pod_selector: LabelSelector::default(),
        ingress: Some(vec![NetworkPolicyIngressRule {
            from: Some(vec![NetworkPolicyPeer {
                pod_selector: Some(LabelSelector::default()),
                ..Default::default()
            }]),
            ..Default::default()
        }]),
        policy_types: Some(vec!["Ingress".to_string()]),
        ..Default::default()
    }
}

/// Ingress restricted to the storage daemons' ports from in-namespace pods.
pub fn storage_ingress_policy() -> NetworkPolicySpec {
    let mut daemon_labels = BTreeMap::new();
    daemon_labels.insert("app".to_string(), "storage-daemon".to_string());
    NetworkPolicySpec {
        pod_selector: LabelSelector {
            match_labels: Some(daemon_labels),
            ..Default::default()
        },
        ingress: Some(vec![NetworkPolicyIngressRule {
            from: Some(vec![NetworkPolicyPeer {
                namespace_selector: Some(LabelSelector::default()),
                ..Default::default()
            }]),
            ..Default::default()
        }]),
        policy_types: Some(vec!["Ingress".to_string()]),
        ..Default::default()
    }
}

/// Per-container resource requirements used for operator-version tuning of
/// the CSI sidecars.
pub fn resource_requirements(
    name: &str,
) -> BTreeMap<String, BTreeMap<String, Quantity>> {
    let (cpu, memory) = match name {
        "csi-provisioner" | "csi-resizer" | "csi-attacher"
        | "csi-snapshotter" => ("50m", "128Mi"),
        "csi-rbdplugin" | "csi-fsplugin" => ("100m", "256Mi"),
        "driver-registrar" | "liveness-exporter" => ("25m", "64Mi"),
        _ => ("50m", "128Mi"),
    };
    let mut set = BTreeMap::new();
    let mut requests = BTreeMap::new();
    requests.insert("cpu".to_string(), Quantity(cpu.to_string()));
    requests.insert("memory".to_string(), Quantity(memory.to_string()));
    set.insert("requests".to_string(), requests.clone());
    set.insert("limits".to_string(), requests);
    set
}
