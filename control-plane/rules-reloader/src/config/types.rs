use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use envconfig::Envconfig;
use thiserror::Error;

use crate::credentials::CredentialSettings;
use crate::loader::ManagedTenants;
use crate::sync_loop::LoopSettings;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
    #[error("OBSERVATORIUM_API_URL must not be empty")]
    EmptyApiUrl,
}

#[derive(Envconfig, Clone, Debug)]
pub struct ReloaderConfig {
    /// Namespace the rule objects and tenant secrets are read from.
    #[envconfig(from = "NAMESPACE_NAME")]
    pub namespace: String,

    /// Namespace generated PrometheusRules are written to; defaults to
    /// `NAMESPACE_NAME`.
    #[envconfig(from = "RULES_TARGET_NAMESPACE")]
    pub rules_target_namespace: Option<String>,

    #[envconfig(from = "OBSERVATORIUM_API_URL")]
    pub observatorium_api_url: String,

    /// Comma-separated tenant names.
    #[envconfig(from = "MANAGED_TENANTS", default = "")]
    pub managed_tenants: String,

    #[envconfig(from = "OIDC_AUDIENCE", default = "")]
    pub oidc_audience: String,

    #[envconfig(from = "OIDC_ISSUER_URL", default = "")]
    pub oidc_issuer_url: String,

    #[envconfig(from = "SLEEP_DURATION_SECONDS", default = "15")]
    pub sleep_duration_secs: u64,

    #[envconfig(from = "CONFIG_RELOAD_INTERVAL_SECONDS", default = "300")]
    pub config_reload_interval_secs: u64,

    #[envconfig(from = "LOG_RULES_ENABLED", default = "true")]
    pub log_rules_enabled: bool,

    #[envconfig(from = "AUTH_CONTEXT_PATH", default = "/tmp/rules-reloader/config.json")]
    pub auth_context_path: String,

    /// Register discovered tenants without a test token exchange.
    #[envconfig(from = "SKIP_CLIENT_CHECK", default = "false")]
    pub skip_client_check: bool,

    /// Timeout for every outbound HTTP request.
    #[envconfig(from = "REQUEST_TIMEOUT_SECS", default = "30")]
    pub request_timeout_secs: u64,

    /// Fail a tenant's metrics rules instead of rewriting a selector that
    /// already pins a different tenant.
    #[envconfig(from = "REJECT_TENANT_OVERRIDE", default = "false")]
    pub reject_tenant_override: bool,

    #[envconfig(from = "HTTP_PORT", default = "8081")]
    pub http_port: u16,
}

impl ReloaderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sleep_duration_secs == 0 {
            return Err(ConfigError::ZeroInterval("SLEEP_DURATION_SECONDS"));
        }
        if self.config_reload_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval("CONFIG_RELOAD_INTERVAL_SECONDS"));
        }
        if self.observatorium_api_url.trim().is_empty() {
            return Err(ConfigError::EmptyApiUrl);
        }
        Ok(())
    }

    pub fn managed_tenants(&self) -> ManagedTenants {
        ManagedTenants::parse(&self.managed_tenants)
    }

    pub fn target_namespace(&self) -> &str {
        self.rules_target_namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(self.namespace.as_str())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn http_addr(&self) -> SocketAddr {
        ([0, 0, 0, 0], self.http_port).into()
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            resync_interval: Duration::from_secs(self.sleep_duration_secs),
            config_reload_interval: Duration::from_secs(self.config_reload_interval_secs),
            log_rules_enabled: self.log_rules_enabled,
        }
    }

    pub fn credential_settings(&self) -> CredentialSettings {
        CredentialSettings {
            api_url: self.observatorium_api_url.clone(),
            context_path: PathBuf::from(&self.auth_context_path),
            skip_client_check: self.skip_client_check,
        }
    }
}
