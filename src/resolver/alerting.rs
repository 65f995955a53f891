use tracing::info;

use super::{SecretData, secret_str};
use crate::controller::ReconcileErr;
use crate::crd::dependents::{
    AlertmanagerConfigSpec, EmailConfig, KeyValue, PagerdutyConfig,
    SecretKeySelector, WebhookConfig,
};
use crate::templates::{
    self, RECEIVER_EMAIL, RECEIVER_HEARTBEAT, RECEIVER_PAGERDUTY,
};

pub const PAGERDUTY_KEY: &str = "PAGERDUTY_KEY";
pub const SNITCH_URL_KEY: &str = "SNITCH_URL";
pub const SMTP_HOST_KEY: &str = "host";
pub const SMTP_PORT_KEY: &str = "port";
pub const SMTP_USERNAME_KEY: &str = "username";
pub const SMTP_PASSWORD_KEY: &str = "password";

/// Credential payloads the alerting configuration is assembled from. All
/// three secrets must be present with their required fields; any missing
/// field fails resolution with an error naming it.
pub struct AlertingSecrets<'a> {
    pub pager: &'a SecretData,
    pub heartbeat: &'a SecretData,
    pub smtp: &'a SecretData,
}

/// Deployment wiring that ends up referenced from the rendered receivers.
pub struct AlertingWiring<'a> {
    pub pagerduty_secret_name: &'a str,
    pub smtp_secret_name: &'a str,
    pub sop_endpoint: &'a str,
    pub smtp_from: &'a str,
}

pub fn resolve(
    secrets: &AlertingSecrets<'_>,
    wiring: &AlertingWiring<'_>,
    recipients: &[String],
) -> Result<AlertmanagerConfigSpec, ReconcileErr> {
    // Validate the pager key up front; the rendered config references it
    // through a secret selector rather than inlining the value.
    secret_str("pagerduty", secrets.pager, PAGERDUTY_KEY)?;
    let snitch_url =
        secret_str("heartbeat", secrets.heartbeat, SNITCH_URL_KEY)?;
    let smtp_host = secret_str("smtp", secrets.smtp, SMTP_HOST_KEY)?;
    let smtp_port = secret_str("smtp", secrets.smtp, SMTP_PORT_KEY)?;
    let smtp_username = secret_str("smtp", secrets.smtp, SMTP_USERNAME_KEY)?;
    secret_str("smtp", secrets.smtp, SMTP_PASSWORD_KEY)?;

    let mut spec = templates::alertmanager_config();
    for receiver in &mut spec.receivers {
        match receiver.name.as_str() {
            RECEIVER_PAGERDUTY => {
                receiver.pagerduty_configs = vec![PagerdutyConfig {
                    service_key: Some(SecretKeySelector {
                        name: wiring.pagerduty_secret_name.to_string(),
                        key: PAGERDUTY_KEY.to_string(),
                    }),
                    details: vec![KeyValue {
                        key: "SOP".to_string(),
                        value: wiring.sop_endpoint.to_string(),
                    }],
                }];
            }
            RECEIVER_HEARTBEAT => {
                receiver.webhook_configs = vec![WebhookConfig {
                    url: Some(snitch_url.to_string()),
                }];
            }
            RECEIVER_EMAIL => {
                if recipients.is_empty() {
                    info!(
                        "no notification recipients configured; disabling email receiver"
                    );
                    receiver.email_configs = vec![];
                } else {
                    // One entry per recipient, in declaration order.
                    receiver.email_configs = recipients
                        .iter()
                        .map(|to| EmailConfig {
                            to: to.clone(),
                            from: Some(wiring.smtp_from.to_string()),
                            smarthost: Some(format!(
                                "{smtp_host}:{smtp_port}"
                            )),
                            auth_username: Some(smtp_username.to_string()),
                            auth_password: Some(SecretKeySelector {
                                name: wiring.smtp_secret_name.to_string(),
                                key: SMTP_PASSWORD_KEY.to_string(),
                            }),
                            html: None,
                        })
                        .collect();
                }
            }
            _ => {}
        }
    }

    Ok(spec)
}
