//! Desired-state resolution: pure computation merging static templates with
//! addon parameters, credential payloads, and live values (for monotonic
//! safeguards). All store reads happen in the orchestrator before these
//! functions run.

pub mod addon;
pub mod alerting;
pub mod network;
pub mod storage;

#[cfg(test)]
mod alerting_tests;

use k8s_openapi::ByteString;
use std::collections::BTreeMap;

use crate::controller::ReconcileErr;

/// Raw key/value payload of an input Secret.
pub type SecretData = BTreeMap<String, ByteString>;

/// Required string field of an input secret. Absent, empty, or non-UTF-8
/// values fail with an error naming the exact field so misconfiguration is
/// diagnosable from the log alone.
pub(crate) fn secret_str<'a>(
    secret: &str,
    data: &'a SecretData,
    key: &str,
) -> Result<&'a str, ReconcileErr> {
    let missing = || ReconcileErr::MissingSecretKey {
        secret: secret.to_string(),
        key: key.to_string(),
    };
    let raw = data.get(key).ok_or_else(missing)?;
    let value = std::str::from_utf8(&raw.0).map_err(|_| {
        ReconcileErr::InvalidConfig {
            field: key.to_string(),
            value: "<non-utf8>".to_string(),
        }
    })?;
    if value.is_empty() {
        return Err(missing());
    }
    Ok(value)
}

#[cfg(test)]
pub(crate) fn secret_data(entries: &[(&str, &str)]) -> SecretData {
    entries
        .iter()
        .map(|(k, v)| {
            (k.to_string(), ByteString(v.as_bytes().to_vec()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_str_names_the_missing_key() {
        let data = secret_data(&[]);
        let err = secret_str("pagerduty", &data, "PAGERDUTY_KEY").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("pagerduty"), "unexpected message: {msg}");
        assert!(msg.contains("PAGERDUTY_KEY"), "unexpected message: {msg}");
    }

    #[test]
    fn secret_str_treats_empty_as_missing() {
        let data = secret_data(&[("host", "")]);
        assert!(secret_str("smtp", &data, "host").is_err());
    }
}
