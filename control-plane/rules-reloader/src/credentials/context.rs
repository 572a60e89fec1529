use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::CredentialError;

/// Tokens are refreshed this long before they expire.
const EXPIRY_SLACK_SECS: i64 = 30;

/// Persisted API and tenant credential state.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct AuthContext {
    #[serde(default)]
    pub apis: BTreeMap<String, ApiConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<CurrentContext>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ApiConfig {
    pub url: String,
    #[serde(default)]
    pub contexts: BTreeMap<String, TenantConfig>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TenantConfig {
    pub tenant: String,
    pub oidc: OidcConfig,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OidcConfig {
    pub audience: String,
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub offline_access: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<CachedToken>,
}

impl OidcConfig {
    /// Compares the credential fields only; cached tokens are ignored.
    pub fn same_credentials(&self, other: &OidcConfig) -> bool {
        self.audience == other.audience
            && self.issuer_url == other.issuer_url
            && self.client_id == other.client_id
            && self.client_secret == other.client_secret
            && self.offline_access == other.offline_access
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CachedToken {
    pub access_token: String,
    /// `None` means the issuer did not say; such tokens never expire locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl CachedToken {
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry
                .checked_sub_signed(Duration::seconds(EXPIRY_SLACK_SECS))
                .is_some_and(|refresh_at| refresh_at > now),
            None => true,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CurrentContext {
    pub api: String,
    pub tenant: String,
}

impl AuthContext {
    /// Register an API. Re-registering the same URL keeps its tenants;
    /// a different URL starts over.
    pub fn add_api(&mut self, name: &str, url: &str) -> Result<(), CredentialError> {
        if url.is_empty() {
            return Err(CredentialError::Config(format!("API {name} has an empty URL")));
        }
        match self.apis.get_mut(name) {
            Some(api) if api.url == url => {}
            Some(api) => {
                api.url = url.to_string();
                api.contexts.clear();
                if self.current.as_ref().is_some_and(|c| c.api == name) {
                    self.current = None;
                }
            }
            None => {
                self.apis.insert(
                    name.to_string(),
                    ApiConfig {
                        url: url.to_string(),
                        contexts: BTreeMap::new(),
                    },
                );
            }
        }
        Ok(())
    }

    pub fn api(&self, name: &str) -> Option<&ApiConfig> {
        self.apis.get(name)
    }

    pub fn tenant(&self, api: &str, tenant: &str) -> Option<&TenantConfig> {
        self.apis.get(api)?.contexts.get(tenant)
    }

    pub fn add_tenant(
        &mut self,
        api: &str,
        tenant: &str,
        oidc: OidcConfig,
    ) -> Result<(), CredentialError> {
        let entry = self
            .apis
            .get_mut(api)
            .ok_or_else(|| CredentialError::Config(format!("API {api} is not registered")))?;
        entry.contexts.insert(
            tenant.to_string(),
            TenantConfig {
                tenant: tenant.to_string(),
                oidc,
            },
        );
        if self.current.is_none() {
            self.current = Some(CurrentContext {
                api: api.to_string(),
                tenant: tenant.to_string(),
            });
        }
        Ok(())
    }

    /// Returns whether the tenant was registered.
    pub fn remove_tenant(&mut self, api: &str, tenant: &str) -> bool {
        let removed = self
            .apis
            .get_mut(api)
            .and_then(|a| a.contexts.remove(tenant))
            .is_some();
        if removed
            && self
                .current
                .as_ref()
                .is_some_and(|c| c.api == api && c.tenant == tenant)
        {
            self.current = None;
        }
        removed
    }

    pub fn set_current(&mut self, api: &str, tenant: &str) -> Result<(), CredentialError> {
        if self.tenant(api, tenant).is_none() {
            return Err(CredentialError::UnknownTenant(tenant.to_string()));
        }
        self.current = Some(CurrentContext {
            api: api.to_string(),
            tenant: tenant.to_string(),
        });
        Ok(())
    }

    pub fn current_tenant(&self) -> Option<&TenantConfig> {
        let cur = self.current.as_ref()?;
        self.tenant(&cur.api, &cur.tenant)
    }

    pub fn current_tenant_mut(&mut self) -> Option<&mut TenantConfig> {
        let cur = self.current.as_ref()?;
        self.apis.get_mut(&cur.api)?.contexts.get_mut(&cur.tenant)
    }
}

/// Read a persisted context. A missing file is `Ok(None)`.
pub async fn load(path: &Path) -> Result<Option<AuthContext>, CredentialError> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(CredentialError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    Ok(Some(serde_json::from_str(&content)?))
}

/// Persist `ctx` readable by the owner only. The file is written next to
/// `path` and renamed over it, so readers never see a partial context.
pub async fn save(ctx: &AuthContext, path: &Path) -> Result<(), CredentialError> {
    let write_err = |source| CredentialError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).await.map_err(write_err)?;
    }
    let content = serde_json::to_string_pretty(ctx)?;

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);
    // a leftover from an interrupted save would keep its old mode
    let _ = fs::remove_file(&tmp).await;

    let mut opts = fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    opts.mode(0o600);
    let mut file = opts.open(&tmp).await.map_err(write_err)?;
    file.write_all(content.as_bytes()).await.map_err(write_err)?;
    file.sync_all().await.map_err(write_err)?;
    drop(file);

    fs::rename(&tmp, path).await.map_err(write_err)?;
    Ok(())
}
