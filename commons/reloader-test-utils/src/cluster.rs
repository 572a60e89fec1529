use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Mutex;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::core::{Expression, Selector, SelectorExt};
use kube::{Resource, ResourceExt};
use rules_reloader::crd::PrometheusRule;
use rules_reloader::k8s::{ObjectLister, RuleWriter};
use serde::{Serialize, de::DeserializeOwned};

fn type_key<K: Resource<DynamicType = ()>>() -> String {
    format!("{}/{}", K::api_version(&()), K::kind(&()))
}

/// Equality and existence terms, the subset of selector syntax the reloader
/// sends.
fn parse_selector(selector: &str) -> Vec<Expression> {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(|term| match term.split_once('=') {
            Some((k, v)) => Expression::Equal(k.trim().to_string(), v.trim().to_string()),
            None => Expression::Exists(term.to_string()),
        })
        .collect()
}

/// Object store keyed by `apiVersion/kind` that stands in for a cluster.
///
/// Writes made through [`RuleWriter`] are recorded and become visible to
/// subsequent list calls. Kinds marked with [`InMemoryCluster::fail_kind`]
/// make list calls return an error.
#[derive(Default)]
pub struct InMemoryCluster {
    objects: Mutex<BTreeMap<String, Vec<serde_json::Value>>>,
    failing: Mutex<Vec<String>>,
    applied: Mutex<Vec<PrometheusRule>>,
    reject_writes: Mutex<bool>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `obj`, replacing any object with the same namespace and name.
    pub fn insert<K>(&self, obj: &K) -> anyhow::Result<()>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let value = serde_json::to_value(obj)?;
        let name = obj.meta().name.clone();
        let ns = obj.meta().namespace.clone();
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        let bucket = objects.entry(type_key::<K>()).or_default();
        bucket.retain(|v| {
            v["metadata"]["name"].as_str() != name.as_deref()
                || v["metadata"]["namespace"].as_str() != ns.as_deref()
        });
        bucket.push(value);
        Ok(())
    }

    pub fn fail_kind<K: Resource<DynamicType = ()>>(&self) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(type_key::<K>());
    }

    pub fn reject_writes(&self, reject: bool) {
        *self.reject_writes.lock().unwrap_or_else(|e| e.into_inner()) = reject;
    }

    /// PrometheusRules written through [`RuleWriter`], oldest first.
    pub fn applied(&self) -> Vec<PrometheusRule> {
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ObjectLister for InMemoryCluster {
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
        let key = type_key::<K>();
        if self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&key)
        {
            return Err(anyhow!("the server could not find the requested resource ({key})"));
        }
        let values = self
            .objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned()
            .unwrap_or_default();
        let terms = label_selector.map(parse_selector).unwrap_or_default();

        let mut out = Vec::new();
        for value in values {
            let obj: K =
                serde_json::from_value(value).with_context(|| format!("decode {key}"))?;
            if obj.meta().namespace.as_deref().is_some_and(|ns| ns != namespace) {
                continue;
            }
            if !terms
                .iter()
                .all(|term| Selector::from(term.clone()).matches(obj.labels()))
            {
                continue;
            }
            out.push(obj);
        }
        Ok(out)
    }
}

#[async_trait]
impl RuleWriter for InMemoryCluster {
    async fn apply_prometheus_rule(&self, rule: &PrometheusRule) -> anyhow::Result<()> {
        if *self.reject_writes.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(anyhow!("admission webhook denied the request"));
        }
        self.insert(rule)?;
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(rule.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Secret;
    use kube::api::ObjectMeta;

    fn secret(name: &str, ns: &str, labels: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(ns.into()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn list_filters_namespace_and_selector() {
        let cluster = InMemoryCluster::new();
        cluster.insert(&secret("a", "obs", &[("tenant", "team-a")])).unwrap();
        cluster.insert(&secret("b", "obs", &[])).unwrap();
        cluster.insert(&secret("c", "other", &[("tenant", "team-c")])).unwrap();

        let all: Vec<Secret> = cluster.list("obs", None).await.unwrap();
        assert_eq!(all.len(), 2);

        let labelled: Vec<Secret> = cluster.list("obs", Some("tenant")).await.unwrap();
        assert_eq!(labelled.len(), 1);
        assert_eq!(labelled[0].name_any(), "a");

        let none: Vec<Secret> = cluster.list("obs", Some("tenant=team-b")).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn insert_replaces_same_object() {
        let cluster = InMemoryCluster::new();
        cluster.insert(&secret("a", "obs", &[])).unwrap();
        cluster.insert(&secret("a", "obs", &[("tenant", "x")])).unwrap();
        let all: Vec<Secret> = cluster.list("obs", None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].labels().contains_key("tenant"));
    }

    #[tokio::test]
    async fn failing_kind_errors() {
        let cluster = InMemoryCluster::new();
        cluster.fail_kind::<Secret>();
        let res: anyhow::Result<Vec<Secret>> = cluster.list("obs", None).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn rejected_writes_are_not_recorded() {
        let cluster = InMemoryCluster::new();
        cluster.reject_writes(true);
        let rule = PrometheusRule::new("r", Default::default());
        assert!(cluster.apply_prometheus_rule(&rule).await.is_err());
        assert!(cluster.applied().is_empty());
    }
}
