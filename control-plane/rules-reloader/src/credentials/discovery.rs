use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use tracing::debug;

use super::context::OidcConfig;
use crate::enforce::TENANT_LABEL;
use crate::error::CredentialError;
use crate::k8s::ObjectLister;
use crate::loader::ManagedTenants;

/// Finds OIDC client credentials for managed tenants.
#[async_trait]
pub trait TenantDiscovery: Send + Sync {
    async fn discover(&self) -> Result<BTreeMap<String, OidcConfig>, CredentialError>;
}

/// Reads credentials from Secrets labelled with `tenant`.
///
/// Both `client-id`/`client-secret` and `client_id`/`client_secret` keys are
/// accepted; the dashed spelling wins when a Secret carries both.
pub struct SecretDiscovery<L> {
    lister: L,
    namespace: String,
    tenants: ManagedTenants,
    audience: String,
    issuer_url: String,
}

impl<L: ObjectLister> SecretDiscovery<L> {
    pub fn new(
        lister: L,
        namespace: impl Into<String>,
        tenants: ManagedTenants,
        audience: impl Into<String>,
        issuer_url: impl Into<String>,
    ) -> Self {
        Self {
            lister,
            namespace: namespace.into(),
            tenants,
            audience: audience.into(),
            issuer_url: issuer_url.into(),
        }
    }

    fn credentials(&self, secret: &Secret) -> Option<OidcConfig> {
        let data = secret.data.as_ref()?;
        let client_id = lookup(data, "client-id", "client_id")?;
        let client_secret = lookup(data, "client-secret", "client_secret")?;
        Some(OidcConfig {
            audience: self.audience.clone(),
            issuer_url: self.issuer_url.clone(),
            client_id,
            client_secret,
            offline_access: false,
            token: None,
        })
    }
}

fn lookup(data: &BTreeMap<String, ByteString>, dashed: &str, underscored: &str) -> Option<String> {
    data.get(dashed)
        .or_else(|| data.get(underscored))
        .map(|v| String::from_utf8_lossy(&v.0).into_owned())
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl<L: ObjectLister> TenantDiscovery for SecretDiscovery<L> {
    async fn discover(&self) -> Result<BTreeMap<String, OidcConfig>, CredentialError> {
        let secrets: Vec<Secret> = self
            .lister
            .list(&self.namespace, Some(TENANT_LABEL))
            .await
            .map_err(|e| CredentialError::Discovery(format!("{e:#}")))?;

        let mut found = BTreeMap::new();
        for secret in &secrets {
            let Some(tenant) = secret.labels().get(TENANT_LABEL) else {
                continue;
            };
            if !self.tenants.contains(tenant) {
                continue;
            }
            match self.credentials(secret) {
                Some(oidc) => {
                    found.insert(tenant.clone(), oidc);
                }
                None => {
                    debug!(secret = %secret.name_any(), tenant = %tenant, "secret lacks client credentials");
                }
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_values_count_as_missing() {
        let data = BTreeMap::from([
            ("client-id".to_string(), ByteString(Vec::new())),
            ("client_id".to_string(), ByteString(b"under".to_vec())),
        ]);
        assert_eq!(lookup(&data, "client-id", "client_id"), None);
        assert_eq!(lookup(&data, "client-secret", "client_secret"), None);
    }
}
