//! Thin seams over the Kubernetes API used by the loader, credential
//! discovery and publisher.

use std::fmt::Debug;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    Client, Resource, ResourceExt,
    api::{Api, ListParams, Patch, PatchParams},
};
use serde::de::DeserializeOwned;

use crate::crd::PrometheusRule;

/// Field manager used for server-side apply.
pub const FIELD_MANAGER: &str = "rules-reloader";

#[async_trait]
pub trait ObjectLister: Send + Sync {
    /// List objects of kind `K` in `namespace`, optionally filtered by a
    /// label selector.
    async fn list<K>(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> anyhow::Result<Vec<K>>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug
            + Send
            + Sync
            + 'static;
}

#[async_trait]
pub trait RuleWriter: Send + Sync {
    /// Create or replace a generated PrometheusRule in its own namespace.
    async fn apply_prometheus_rule(&self, rule: &PrometheusRule) -> anyhow::Result<()>;
}

#[async_trait]
impl ObjectLister for Client {
    async fn list<K>(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> anyhow::Result<Vec<K>>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug
            + Send
            + Sync
            + 'static,
    {
        let api: Api<K> = Api::namespaced(self.clone(), namespace);
        let mut lp = ListParams::default();
        if let Some(selector) = label_selector {
            lp = lp.labels(selector);
        }
        let list = api.list(&lp).await?;
        Ok(list.items)
    }
}

#[async_trait]
impl RuleWriter for Client {
    async fn apply_prometheus_rule(&self, rule: &PrometheusRule) -> anyhow::Result<()> {
        let ns = rule
            .namespace()
            .ok_or_else(|| anyhow!("PrometheusRule has no namespace"))?;
        let name = rule.name_any();
        let api: Api<PrometheusRule> = Api::namespaced(self.clone(), &ns);
        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(rule),
        )
        .await
        .with_context(|| format!("apply PrometheusRule {ns}/{name}"))?;
        Ok(())
    }
}

#[async_trait]
impl<T: ObjectLister> ObjectLister for Arc<T> {
    async fn list<K>(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> anyhow::Result<Vec<K>>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug
            + Send
            + Sync
            + 'static,
    {
        (**self).list::<K>(namespace, label_selector).await
    }
}

#[async_trait]
impl<T: RuleWriter> RuleWriter for Arc<T> {
    async fn apply_prometheus_rule(&self, rule: &PrometheusRule) -> anyhow::Result<()> {
        (**self).apply_prometheus_rule(rule).await
    }
}
