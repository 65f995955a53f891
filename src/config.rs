use envconfig::Envconfig;

/// Deployment-time wiring for the operator. Names of the externally
/// provisioned input objects (addon parameters, credentials, uninstall
/// marker) arrive through the environment, the way the addon installer
/// injects them.
#[derive(Envconfig, Clone, Debug)]
pub struct OperatorConfig {
    #[envconfig(from = "STOR_ADDON_NAMESPACE", default = "default")]
    pub namespace: String,

    /// Secret carrying the addon parameters (size, toggles, recipients).
    #[envconfig(
        from = "STOR_ADDON_PARAM_SECRET_NAME",
        default = "addon-managed-storage-parameters"
    )]
    pub addon_param_secret_name: String,

    /// ConfigMap whose deletion label signals an uninstall request.
    #[envconfig(
        from = "STOR_ADDON_CONFIGMAP_NAME",
        default = "addon-managed-storage"
    )]
    pub addon_configmap_name: String,

    /// Label key on the addon ConfigMap that marks an uninstall request.
    #[envconfig(
        from = "STOR_ADDON_CONFIGMAP_DELETE_LABEL_KEY",
        default = "addons.stor.io/delete"
    )]
    pub addon_configmap_delete_label_key: String,

    #[envconfig(
        from = "STOR_ADDON_PAGERDUTY_SECRET_NAME",
        default = "pagerduty-secret"
    )]
    pub pagerduty_secret_name: String,

    /// Heartbeat (dead man's switch) credential with the snitch URL.
    #[envconfig(
        from = "STOR_ADDON_HEARTBEAT_SECRET_NAME",
        default = "heartbeat-secret"
    )]
    pub heartbeat_secret_name: String,

    #[envconfig(from = "STOR_ADDON_SMTP_SECRET_NAME", default = "smtp-secret")]
    pub smtp_secret_name: String,

    /// Runbook endpoint attached to pager notifications.
    #[envconfig(from = "STOR_ADDON_SOP_ENDPOINT", default = "")]
    pub sop_endpoint: String,

    /// From address used for customer alert mail.
    #[envconfig(
        from = "STOR_ADDON_ALERT_SMTP_FROM",
        default = "noreply@managed-storage.local"
    )]
    pub alert_smtp_from: String,

    /// Deployment layout of the storage engine. Only "converged" is
    /// recognized; anything else is a fatal configuration error.
    #[envconfig(from = "STOR_ADDON_DEPLOYMENT_TYPE", default = "converged")]
    pub deployment_type: String,
}
