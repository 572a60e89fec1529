//! Per-tenant OIDC credentials for the rules API.
//!
//! The store keeps an [`AuthContext`] in memory and mirrors it to disk so
//! that a restart with the same API URL can skip discovery. At most one
//! tenant is "current"; publishing of logs rules always acts as that tenant.

mod context;
mod discovery;
mod oidc;

use std::path::PathBuf;

use chrono::Utc;
use tracing::{info, warn};

pub use context::{
    ApiConfig, AuthContext, CachedToken, CurrentContext, OidcConfig, TenantConfig, load,
    save,
};
pub use discovery::{SecretDiscovery, TenantDiscovery};
pub use oidc::{OidcTokenClient, TokenSource};

use crate::error::CredentialError;

/// Name of the single API entry in the context.
pub const API_NAME: &str = "api";

#[derive(Clone, Debug)]
pub struct CredentialSettings {
    pub api_url: String,
    pub context_path: PathBuf,
    /// Register discovered tenants without a test token exchange.
    pub skip_client_check: bool,
}

pub struct CredentialStore<D, T> {
    settings: CredentialSettings,
    discovery: D,
    tokens: T,
    context: AuthContext,
}

impl<D: TenantDiscovery, T: TokenSource> CredentialStore<D, T> {
    pub fn new(settings: CredentialSettings, discovery: D, tokens: T) -> Self {
        Self {
            settings,
            discovery,
            tokens,
            context: AuthContext::default(),
        }
    }

    pub fn context(&self) -> &AuthContext {
        &self.context
    }

    pub fn current_tenant(&self) -> Option<&str> {
        self.context.current_tenant().map(|t| t.tenant.as_str())
    }

    fn persisted_is_usable(&self, ctx: &AuthContext) -> bool {
        ctx.api(API_NAME).is_some_and(|api| {
            api.url == self.settings.api_url && !api.contexts.is_empty()
        })
    }

    /// Rebuild the context from disk or from tenant discovery.
    pub async fn reload_config(&mut self) -> Result<(), CredentialError> {
        match load(&self.settings.context_path).await {
            Ok(Some(persisted)) if self.persisted_is_usable(&persisted) => {
                info!(path = %self.settings.context_path.display(), "loading auth context from disk");
                self.context = persisted;
                return Ok(());
            }
            Ok(_) => {}
            Err(CredentialError::Parse(e)) => {
                warn!(error = %e, "persisted auth context is unreadable, rebuilding");
            }
            Err(e) => return Err(e),
        }

        info!("building auth context from tenant secrets");
        let mut ctx = if self
            .context
            .api(API_NAME)
            .is_some_and(|api| api.url == self.settings.api_url)
        {
            self.context.clone()
        } else {
            AuthContext::default()
        };
        ctx.add_api(API_NAME, &self.settings.api_url)?;

        let discovered = self.discovery.discover().await?;
        for (tenant, mut oidc) in discovered {
            if !self.settings.skip_client_check {
                match self.tokens.fetch_token(&oidc).await {
                    Ok(token) => oidc.token = Some(token),
                    Err(e) => {
                        warn!(tenant = %tenant, error = %e, "tenant credentials failed validation, skipping");
                        continue;
                    }
                }
            }

            match ctx.tenant(API_NAME, &tenant) {
                Some(existing) if existing.oidc.same_credentials(&oidc) => continue,
                Some(_) => {
                    info!(tenant = %tenant, "tenant credentials changed, replacing");
                    ctx.remove_tenant(API_NAME, &tenant);
                }
                None => info!(tenant = %tenant, "adding tenant"),
            }
            ctx.add_tenant(API_NAME, &tenant, oidc)?;
        }

        self.context = ctx;
        save(&self.context, &self.settings.context_path)
            .await
            .map_err(|e| CredentialError::Config(format!("persisting auth context: {e}")))
    }

    /// Make `tenant` the current tenant.
    pub async fn switch_tenant(&mut self, tenant: &str) -> Result<(), CredentialError> {
        self.context.set_current(API_NAME, tenant)?;
        if let Err(e) = save(&self.context, &self.settings.context_path).await {
            warn!(tenant = %tenant, error = %e, "persisting current tenant");
        }
        Ok(())
    }

    /// Access token of the current tenant, refreshed when close to expiry.
    /// Returns `(tenant, token)`.
    pub async fn bearer_token(&mut self) -> Result<(String, String), CredentialError> {
        let current = self
            .context
            .current_tenant_mut()
            .ok_or(CredentialError::NoCurrentTenant)?;
        let tenant = current.tenant.clone();

        if let Some(token) = current
            .oidc
            .token
            .as_ref()
            .filter(|t| t.is_fresh_at(Utc::now()))
        {
            return Ok((tenant, token.access_token.clone()));
        }

        let token = self.tokens.fetch_token(&current.oidc).await?;
        let access = token.access_token.clone();
        current.oidc.token = Some(token);

        if let Err(e) = save(&self.context, &self.settings.context_path).await {
            warn!(tenant = %tenant, error = %e, "persisting refreshed token");
        }
        Ok((tenant, access))
    }
}
