use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{
    LogsAlertingRuleSet, LogsRecordingRuleSet, ManagedTenants, MetricsRuleSet,
    RuleSource, partition,
};
use crate::crd::loki::{ConversionError, v1, v1beta1};
use crate::crd::prometheus_rule::OWNERSHIP_LABEL;
use crate::crd::{PrometheusRule, RuleKind};
use crate::error::FetchError;
use crate::k8s::ObjectLister;
use crate::metrics::LoaderMetrics;

/// [`RuleSource`] backed by the Kubernetes API of one namespace.
pub struct KubeRulesLoader<L> {
    lister: L,
    namespace: String,
    tenants: ManagedTenants,
    metrics: LoaderMetrics,
}

impl<L: ObjectLister> KubeRulesLoader<L> {
    pub fn new(
        lister: L,
        namespace: impl Into<String>,
        tenants: ManagedTenants,
        metrics: LoaderMetrics,
    ) -> Self {
        Self {
            lister,
            namespace: namespace.into(),
            tenants,
            metrics,
        }
    }

    async fn list<K>(&self, kind: &'static str) -> Result<Vec<K>, FetchError>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug
            + Send
            + Sync
            + 'static,
    {
        self.lister
            .list::<K>(&self.namespace, None)
            .await
            .map_err(|e| FetchError::List {
                kind,
                message: format!("{e:#}"),
            })
    }

    /// List both schema versions of a Loki rule kind; legacy objects are
    /// converted and appended after the current ones.
    async fn fetch_loki<New, Old>(
        &self,
        kind: RuleKind,
        kind_name: &'static str,
    ) -> Result<Vec<New>, FetchError>
    where
        New: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + TryFrom<Old, Error = ConversionError>
            + Clone
            + DeserializeOwned
            + Debug
            + Send
            + Sync
            + 'static,
        Old: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug
            + Send
            + Sync
            + 'static,
    {
        let failures = self
            .metrics
            .loki_rule_fetch_failures
            .with_label_values(&[kind.as_str()]);

        let legacy = self.list::<Old>(kind_name).await.inspect_err(|_| failures.inc())?;
        let mut items = self.list::<New>(kind_name).await.inspect_err(|_| failures.inc())?;

        for old in legacy {
            let converted = New::try_from(old).map_err(|source| {
                failures.inc();
                FetchError::Conversion {
                    kind: kind_name,
                    source,
                }
            })?;
            items.push(converted);
        }

        self.metrics
            .loki_rule_fetches
            .with_label_values(&[kind.as_str()])
            .inc();
        debug!(kind = %kind, count = items.len(), "listed Loki rules");
        Ok(items)
    }
}

fn is_generated(rule: &PrometheusRule) -> bool {
    rule.labels()
        .get(OWNERSHIP_LABEL)
        .is_some_and(|v| v == "true")
}

#[async_trait]
impl<L: ObjectLister> RuleSource for KubeRulesLoader<L> {
    async fn fetch_prometheus_rules(&self) -> Result<Vec<PrometheusRule>, FetchError> {
        let items = match self.list::<PrometheusRule>("PrometheusRule").await {
            Ok(items) => items,
            Err(e) => {
                self.metrics.prom_rule_fetch_failures.inc();
                warn!(error = %e, "listing PrometheusRules");
                return Err(e);
            }
        };
        self.metrics.prom_rule_fetches.inc();

        let (generated, sources): (Vec<_>, Vec<_>) =
            items.into_iter().partition(is_generated);
        if !generated.is_empty() {
            debug!(
                skipped = generated.len(),
                "ignoring PrometheusRules generated by the reloader"
            );
        }
        Ok(sources)
    }

    async fn fetch_loki_alerting_rules(&self) -> Result<Vec<v1::AlertingRule>, FetchError> {
        self.fetch_loki::<v1::AlertingRule, v1beta1::AlertingRule>(
            RuleKind::LogsAlerting,
            "AlertingRule",
        )
        .await
    }

    async fn fetch_loki_recording_rules(
        &self,
    ) -> Result<Vec<v1::RecordingRule>, FetchError> {
        self.fetch_loki::<v1::RecordingRule, v1beta1::RecordingRule>(
            RuleKind::LogsRecording,
            "RecordingRule",
        )
        .await
    }

    fn partition_metrics(&self, rules: &[PrometheusRule]) -> MetricsRuleSet {
        let set = partition(&self.tenants, rules);
        for (tenant, groups) in &set {
            self.metrics
                .prom_tenant_rule_groups
                .with_label_values(&[tenant.as_str()])
                .set(groups.len() as i64);
        }
        set
    }

    fn partition_logs_alerting(&self, rules: &[v1::AlertingRule]) -> LogsAlertingRuleSet {
        let set = partition(&self.tenants, rules);
        for (tenant, groups) in &set {
            self.metrics
                .loki_tenant_rule_groups
                .with_label_values(&[RuleKind::LogsAlerting.as_str(), tenant.as_str()])
                .set(groups.len() as i64);
        }
        set
    }

    fn partition_logs_recording(&self, rules: &[v1::RecordingRule]) -> LogsRecordingRuleSet {
        let set = partition(&self.tenants, rules);
        for (tenant, groups) in &set {
            self.metrics
                .loki_tenant_rule_groups
                .with_label_values(&[RuleKind::LogsRecording.as_str(), tenant.as_str()])
                .set(groups.len() as i64);
        }
        set
    }
}
