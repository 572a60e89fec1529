//! Publishing tenant rules downstream.
//!
//! Metrics rules become one generated PrometheusRule per tenant. Logs rules
//! are pushed group by group to the rules API as the current tenant of the
//! credential store.

mod rules_api;

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::Serialize;
use tracing::{debug, error, info};

pub use rules_api::{RulesApiClient, RulesApiResponse};

use crate::credentials::{CredentialStore, TenantDiscovery, TokenSource};
use crate::crd::loki::v1;
use crate::crd::prometheus_rule::OWNERSHIP_LABEL;
use crate::crd::{PrometheusRule, PrometheusRuleSpec, RuleGroup, RuleKind};
use crate::enforce::{LabelEnforcer, TENANT_LABEL};
use crate::error::{CredentialError, PublishError};
use crate::k8s::RuleWriter;
use crate::metrics::SyncerMetrics;

/// Where the sync loop sends rules, and the credential state it needs.
#[async_trait]
pub trait RulePublisher: Send {
    async fn reload_config(&mut self) -> Result<(), CredentialError>;
    async fn switch_tenant(&mut self, tenant: &str) -> Result<(), CredentialError>;
    async fn publish_metrics(
        &mut self,
        tenant: &str,
        groups: &[RuleGroup],
    ) -> Result<(), PublishError>;
    async fn publish_logs_alerting(
        &mut self,
        groups: &[v1::AlertingRuleGroup],
    ) -> Result<(), PublishError>;
    async fn publish_logs_recording(
        &mut self,
        groups: &[v1::RecordingRuleGroup],
    ) -> Result<(), PublishError>;
}

/// Name of the PrometheusRule generated for `tenant`.
pub fn tenant_rule_name(tenant: &str) -> String {
    format!("{tenant}-tenant-rules")
}

/// Build the tenant-scoped PrometheusRule: every expression carries the
/// tenant matcher and every rule the tenant label.
pub fn build_tenant_rule(
    tenant: &str,
    namespace: &str,
    groups: &[RuleGroup],
) -> Result<PrometheusRule, PublishError> {
    build_tenant_rule_with(&LabelEnforcer::new(TENANT_LABEL, tenant), tenant, namespace, groups)
}

/// Like [`build_tenant_rule`], with a caller-configured enforcer for `tenant`.
pub fn build_tenant_rule_with(
    enforcer: &LabelEnforcer,
    tenant: &str,
    namespace: &str,
    groups: &[RuleGroup],
) -> Result<PrometheusRule, PublishError> {
    let mut groups = groups.to_vec();
    for group in &mut groups {
        for rule in &mut group.rules {
            let enforced = enforcer.enforce(&rule.expression()).map_err(|source| {
                PublishError::Enforce {
                    rule: format!("{}/{}", group.name, rule.display_name()),
                    source,
                }
            })?;
            rule.expr = IntOrString::String(enforced);
            rule.labels
                .get_or_insert_with(BTreeMap::new)
                .insert(TENANT_LABEL.to_string(), tenant.to_string());
        }
    }

    let mut obj = PrometheusRule::new(&tenant_rule_name(tenant), PrometheusRuleSpec { groups });
    obj.metadata.namespace = Some(namespace.to_string());
    obj.metadata.labels = Some(BTreeMap::from([
        (TENANT_LABEL.to_string(), tenant.to_string()),
        (OWNERSHIP_LABEL.to_string(), "true".to_string()),
    ]));
    Ok(obj)
}

pub struct RulesPublisher<W, D, T> {
    writer: W,
    credentials: CredentialStore<D, T>,
    api: RulesApiClient,
    target_namespace: String,
    metrics: SyncerMetrics,
    reject_tenant_override: bool,
}

impl<W, D, T> RulesPublisher<W, D, T>
where
    W: RuleWriter,
    D: TenantDiscovery,
    T: TokenSource,
{
    pub fn new(
        writer: W,
        credentials: CredentialStore<D, T>,
        api: RulesApiClient,
        target_namespace: impl Into<String>,
        metrics: SyncerMetrics,
    ) -> Self {
        Self {
            writer,
            credentials,
            api,
            target_namespace: target_namespace.into(),
            metrics,
            reject_tenant_override: false,
        }
    }

    /// Refuse to rewrite selectors that already pin another tenant.
    pub fn reject_tenant_override(mut self, yes: bool) -> Self {
        self.reject_tenant_override = yes;
        self
    }

    /// Push every group separately; a failing group does not stop the rest.
    async fn publish_logs<G: Serialize + Sync>(
        &mut self,
        kind: RuleKind,
        groups: &[G],
        group_name: fn(&G) -> &str,
    ) -> Result<(), PublishError> {
        let (tenant, token) = self.credentials.bearer_token().await?;
        let sets = self
            .metrics
            .loki_rule_sets
            .with_label_values(&[kind.as_str(), tenant.as_str()]);
        let failures = self
            .metrics
            .loki_rule_set_failures
            .with_label_values(&[kind.as_str(), tenant.as_str()]);

        let mut failed = 0;
        for group in groups {
            let name = group_name(group);
            match self.push_group(&tenant, &token, group).await {
                Ok(()) => {
                    sets.inc();
                    debug!(tenant = %tenant, kind = %kind, group = %name, "pushed rule group");
                }
                Err(e) => {
                    failures.inc();
                    failed += 1;
                    error!(tenant = %tenant, kind = %kind, group = %name, error = %e, "pushing rule group");
                }
            }
        }

        if failed > 0 {
            return Err(PublishError::Partial {
                tenant,
                failed,
                total: groups.len(),
            });
        }
        Ok(())
    }

    async fn push_group<G: Serialize + Sync>(
        &self,
        tenant: &str,
        token: &str,
        group: &G,
    ) -> Result<(), PublishError> {
        let body = serde_yaml::to_string(group)?;
        let resp = self.api.set_logs_rules(tenant, token, body).await?;
        self.metrics
            .rules_store_ops
            .with_label_values(&[tenant, resp.status.as_str()])
            .inc();
        if !resp.status.is_success() {
            return Err(PublishError::Status {
                status: resp.status.as_u16(),
                body: resp.body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl<W, D, T> RulePublisher for RulesPublisher<W, D, T>
where
    W: RuleWriter,
    D: TenantDiscovery,
    T: TokenSource,
{
    async fn reload_config(&mut self) -> Result<(), CredentialError> {
        self.credentials.reload_config().await
    }

    async fn switch_tenant(&mut self, tenant: &str) -> Result<(), CredentialError> {
        self.credentials.switch_tenant(tenant).await
    }

    async fn publish_metrics(
        &mut self,
        tenant: &str,
        groups: &[RuleGroup],
    ) -> Result<(), PublishError> {
        self.metrics.prom_rule_sets.with_label_values(&[tenant]).inc();

        let enforcer = LabelEnforcer::new(TENANT_LABEL, tenant)
            .error_on_replace(self.reject_tenant_override);
        let result = match build_tenant_rule_with(&enforcer, tenant, &self.target_namespace, groups)
        {
            Ok(rule) => self
                .writer
                .apply_prometheus_rule(&rule)
                .await
                .map_err(|e| PublishError::Create(format!("{e:#}"))),
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => info!(
                tenant = %tenant,
                groups = groups.len(),
                name = %tenant_rule_name(tenant),
                "applied tenant PrometheusRule"
            ),
            Err(e) => {
                self.metrics
                    .prom_rule_set_failures
                    .with_label_values(&[tenant, e.reason()])
                    .inc();
            }
        }
        result
    }

    async fn publish_logs_alerting(
        &mut self,
        groups: &[v1::AlertingRuleGroup],
    ) -> Result<(), PublishError> {
        self.publish_logs(RuleKind::LogsAlerting, groups, |g| g.name.as_str())
            .await
    }

    async fn publish_logs_recording(
        &mut self,
        groups: &[v1::RecordingRuleGroup],
    ) -> Result<(), PublishError> {
        self.publish_logs(RuleKind::LogsRecording, groups, |g| g.name.as_str())
            .await
    }
}
