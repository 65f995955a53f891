use url::Url;

use crate::controller::ReconcileErr;
use crate::crd::dependents::{
    EGRESS_RULE_ALLOW, EgressNetworkPolicyPeer, EgressNetworkPolicyRule,
    EgressNetworkPolicySpec,
};
use crate::templates;

use super::alerting::SNITCH_URL_KEY;

/// Hostname embedded in the heartbeat URL; egress to it must stay open for
/// the watchdog pings to leave the cluster.
pub fn heartbeat_hostname(snitch_url: &str) -> Result<String, ReconcileErr> {
    let parsed =
        Url::parse(snitch_url).map_err(|_| ReconcileErr::InvalidConfig {
            field: SNITCH_URL_KEY.to_string(),
            value: snitch_url.to_string(),
        })?;
    parsed
        .host_str()
        .map(str::to_string)
        .ok_or_else(|| ReconcileErr::InvalidConfig {
            field: SNITCH_URL_KEY.to_string(),
            value: snitch_url.to_string(),
        })
}

/// Egress policy: derived allow rules for the heartbeat and SMTP hosts are
/// prepended to the static template, never replacing it.
pub fn egress_spec(
    heartbeat_host: &str,
    smtp_host: &str,
) -> EgressNetworkPolicySpec {
    let mut spec = templates::egress_policy();
    let derived = vec![allow_dns(heartbeat_host), allow_dns(smtp_host)];
    spec.egress.splice(0..0, derived);
    spec
}

fn allow_dns(host: &str) -> EgressNetworkPolicyRule {
    EgressNetworkPolicyRule {
        type_: EGRESS_RULE_ALLOW.to_string(),
        to: EgressNetworkPolicyPeer {
            dns_name: Some(host.to_string()),
            cidr_selector: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::dependents::EGRESS_RULE_DENY;

    #[test]
    fn hostname_extracted_from_heartbeat_url() {
        assert_eq!(
            heartbeat_hostname("https://snitch.example.com/v1/abc").unwrap(),
            "snitch.example.com"
        );
    }

    #[test]
    fn malformed_heartbeat_url_is_invalid_config() {
        let err = heartbeat_hostname("not a url").unwrap_err();
        assert!(err.to_string().contains(SNITCH_URL_KEY));
    }

    #[test]
    fn derived_rules_are_prepended_to_template() {
        let spec = egress_spec("snitch.example.com", "smtp.example.com");
        assert_eq!(
            spec.egress[0].to.dns_name.as_deref(),
            Some("snitch.example.com")
        );
        assert_eq!(
            spec.egress[1].to.dns_name.as_deref(),
            Some("smtp.example.com")
        );
        // Static template tail survives intact
        let tail = &spec.egress[2..];
        let template = templates::egress_policy();
        assert_eq!(tail, template.egress.as_slice());
        assert_eq!(tail.last().unwrap().type_, EGRESS_RULE_DENY);
    }
}
