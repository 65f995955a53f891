use tracing::debug;

use super::{SecretData, secret_str};
use crate::controller::ReconcileErr;

pub const SIZE_KEY: &str = "size";
pub const ENABLE_OBJECTSTORE_KEY: &str = "enable-objectstore";
pub const NOTIFICATION_EMAIL_KEY_PREFIX: &str = "notification-email";

/// Parsed addon parameters. Read-only input to the resolver; absence or a
/// malformed value of a required key is a hard reconciliation error.
#[derive(Clone, Debug)]
pub struct AddonConfig {
    pub device_set_count: i32,
    pub enable_objectstore: bool,
    pub notification_emails: Vec<String>,
}

pub fn parse(data: &SecretData) -> Result<AddonConfig, ReconcileErr> {
    let size = secret_str("addon parameters", data, SIZE_KEY)?;
    let device_set_count: i32 =
        size.trim()
            .parse()
            .map_err(|_| ReconcileErr::InvalidConfig {
                field: SIZE_KEY.to_string(),
                value: size.to_string(),
            })?;

    // Recognized optional key; absence means the object store stays off.
    let enable_objectstore = match data.get(ENABLE_OBJECTSTORE_KEY) {
        None => false,
        Some(_) => {
            let raw = secret_str(
                "addon parameters",
                data,
                ENABLE_OBJECTSTORE_KEY,
            )?;
            raw.parse::<bool>().map_err(|_| {
                ReconcileErr::InvalidConfig {
                    field: ENABLE_OBJECTSTORE_KEY.to_string(),
                    value: raw.to_string(),
                }
            })?
        }
    };

    let notification_emails = notification_emails(data);
    debug!(
        device_set_count,
        enable_objectstore,
        recipients = notification_emails.len(),
        "parsed addon parameters"
    );

    Ok(AddonConfig {
        device_set_count,
        enable_objectstore,
        notification_emails,
    })
}

/// Ordered recipient scan over `notification-email-0`, `notification-email-1`,
/// … stopping at the first gap in the numbering. Empty entries are skipped
/// but do not stop the scan.
pub fn notification_emails(data: &SecretData) -> Vec<String> {
    let mut out = Vec::new();
    let mut i = 0u32;
    loop {
        let key = format!("{NOTIFICATION_EMAIL_KEY_PREFIX}-{i}");
        match data.get(&key) {
            None => break,
            Some(raw) => {
                if let Ok(value) = std::str::from_utf8(&raw.0) {
                    if !value.is_empty() {
                        out.push(value.to_string());
                    }
                }
            }
        }
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::secret_data;

    #[test]
    fn parse_reads_size_and_defaults_objectstore_off() {
        let data = secret_data(&[("size", "4")]);
        let cfg = parse(&data).unwrap();
        assert_eq!(cfg.device_set_count, 4);
        assert!(!cfg.enable_objectstore);
        assert!(cfg.notification_emails.is_empty());
    }

    #[test]
    fn parse_fails_on_missing_size() {
        let data = secret_data(&[("enable-objectstore", "true")]);
        let err = parse(&data).unwrap_err();
        assert!(err.to_string().contains("size"));
    }

    #[test]
    fn parse_fails_on_non_numeric_size() {
        let data = secret_data(&[("size", "lots")]);
        let err = parse(&data).unwrap_err();
        assert!(err.to_string().contains("lots"));
    }

    #[test]
    fn parse_fails_on_bad_toggle() {
        let data =
            secret_data(&[("size", "1"), ("enable-objectstore", "yes")]);
        assert!(parse(&data).is_err());
    }

    #[test]
    fn recipients_stop_at_first_gap() {
        let data = secret_data(&[
            ("size", "1"),
            ("notification-email-0", "a@example.com"),
            ("notification-email-1", "b@example.com"),
            // gap at index 2
            ("notification-email-3", "d@example.com"),
        ]);
        assert_eq!(
            notification_emails(&data),
            vec!["a@example.com".to_string(), "b@example.com".to_string()]
        );
    }

    #[test]
    fn recipients_skip_empty_entries_without_stopping() {
        let data = secret_data(&[
            ("notification-email-0", "a@example.com"),
            ("notification-email-1", ""),
            ("notification-email-2", "c@example.com"),
        ]);
        assert_eq!(
            notification_emails(&data),
            vec!["a@example.com".to_string(), "c@example.com".to_string()]
        );
    }
}
