use super::alerting::{
    AlertingSecrets, AlertingWiring, PAGERDUTY_KEY, SNITCH_URL_KEY, resolve,
};
use super::secret_data;
use crate::templates::{RECEIVER_EMAIL, RECEIVER_HEARTBEAT};

fn wiring<'a>() -> AlertingWiring<'a> {
    AlertingWiring {
        pagerduty_secret_name: "pagerduty-secret",
        smtp_secret_name: "smtp-secret",
        sop_endpoint: "https://sop.example.com",
        smtp_from: "noreply@managed-storage.local",
    }
}

fn full_smtp() -> Vec<(&'static str, &'static str)> {
    vec![
        ("host", "smtp.example.com"),
        ("port", "587"),
        ("username", "mailer"),
        ("password", "hunter2"),
    ]
}

#[test]
fn missing_pager_key_names_the_field() {
    let pager = secret_data(&[]);
    let heartbeat =
        secret_data(&[(SNITCH_URL_KEY, "https://snitch.example.com/abc")]);
    let smtp = secret_data(&full_smtp());
    let err = resolve(
        &AlertingSecrets {
            pager: &pager,
            heartbeat: &heartbeat,
            smtp: &smtp,
        },
        &wiring(),
        &[],
    )
    .unwrap_err();
    assert!(err.to_string().contains(PAGERDUTY_KEY));
}

#[test]
fn missing_smtp_port_names_the_field() {
    let pager = secret_data(&[(PAGERDUTY_KEY, "svc-key")]);
    let heartbeat =
        secret_data(&[(SNITCH_URL_KEY, "https://snitch.example.com/abc")]);
    let smtp = secret_data(&[
        ("host", "smtp.example.com"),
        ("username", "mailer"),
        ("password", "hunter2"),
    ]);
    let err = resolve(
        &AlertingSecrets {
            pager: &pager,
            heartbeat: &heartbeat,
            smtp: &smtp,
        },
        &wiring(),
        &[],
    )
    .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("smtp"), "unexpected message: {msg}");
    assert!(msg.contains("port"), "unexpected message: {msg}");
}

#[test]
fn one_email_entry_per_recipient_in_declared_order() {
    let pager = secret_data(&[(PAGERDUTY_KEY, "svc-key")]);
    let heartbeat =
        secret_data(&[(SNITCH_URL_KEY, "https://snitch.example.com/abc")]);
    let smtp = secret_data(&full_smtp());
    let recipients = vec![
        "ops@example.com".to_string(),
        "oncall@example.com".to_string(),
    ];
    let spec = resolve(
        &AlertingSecrets {
            pager: &pager,
            heartbeat: &heartbeat,
            smtp: &smtp,
        },
        &wiring(),
        &recipients,
    )
    .unwrap();

    let email = spec
        .receivers
        .iter()
        .find(|r| r.name == RECEIVER_EMAIL)
        .unwrap();
    let to: Vec<&str> =
        email.email_configs.iter().map(|c| c.to.as_str()).collect();
    assert_eq!(to, vec!["ops@example.com", "oncall@example.com"]);
    for cfg in &email.email_configs {
        assert_eq!(cfg.smarthost.as_deref(), Some("smtp.example.com:587"));
        assert_eq!(cfg.auth_username.as_deref(), Some("mailer"));
        assert_eq!(
            cfg.auth_password.as_ref().map(|s| s.name.as_str()),
            Some("smtp-secret")
        );
    }
}

#[test]
fn zero_recipients_disables_email_receiver() {
    let pager = secret_data(&[(PAGERDUTY_KEY, "svc-key")]);
    let heartbeat =
        secret_data(&[(SNITCH_URL_KEY, "https://snitch.example.com/abc")]);
    let smtp = secret_data(&full_smtp());
    let spec = resolve(
        &AlertingSecrets {
            pager: &pager,
            heartbeat: &heartbeat,
            smtp: &smtp,
        },
        &wiring(),
        &[],
    )
    .unwrap();
    let email = spec
        .receivers
        .iter()
        .find(|r| r.name == RECEIVER_EMAIL)
        .unwrap();
    assert!(email.email_configs.is_empty());
}

#[test]
fn heartbeat_receiver_points_at_snitch_url() {
    let pager = secret_data(&[(PAGERDUTY_KEY, "svc-key")]);
    let heartbeat =
        secret_data(&[(SNITCH_URL_KEY, "https://snitch.example.com/abc")]);
    let smtp = secret_data(&full_smtp());
    let spec = resolve(
        &AlertingSecrets {
            pager: &pager,
            heartbeat: &heartbeat,
            smtp: &smtp,
        },
        &wiring(),
        &[],
    )
    .unwrap();
    let hb = spec
        .receivers
        .iter()
        .find(|r| r.name == RECEIVER_HEARTBEAT)
        .unwrap();
    assert_eq!(
        hb.webhook_configs[0].url.as_deref(),
        Some("https://snitch.example.com/abc")
    );
}
