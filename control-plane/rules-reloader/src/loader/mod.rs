//! Listing rule objects and bucketing them by tenant.

mod kube_rules;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::debug;

use crate::crd::loki::v1;
use crate::crd::{PrometheusRule, RuleGroup};
use crate::enforce::TENANT_LABEL;
use crate::error::FetchError;

pub use kube_rules::KubeRulesLoader;

/// Rule groups per managed tenant. Every managed tenant has an entry, empty
/// when nothing matched.
pub type TenantRuleSet<G> = BTreeMap<String, Vec<G>>;

pub type MetricsRuleSet = TenantRuleSet<RuleGroup>;
pub type LogsAlertingRuleSet = TenantRuleSet<v1::AlertingRuleGroup>;
pub type LogsRecordingRuleSet = TenantRuleSet<v1::RecordingRuleGroup>;

/// Where the sync loop gets its rules from.
#[async_trait]
pub trait RuleSource: Send + Sync {
    async fn fetch_prometheus_rules(&self) -> Result<Vec<PrometheusRule>, FetchError>;
    async fn fetch_loki_alerting_rules(&self) -> Result<Vec<v1::AlertingRule>, FetchError>;
    async fn fetch_loki_recording_rules(&self)
    -> Result<Vec<v1::RecordingRule>, FetchError>;

    fn partition_metrics(&self, rules: &[PrometheusRule]) -> MetricsRuleSet;
    fn partition_logs_alerting(&self, rules: &[v1::AlertingRule]) -> LogsAlertingRuleSet;
    fn partition_logs_recording(&self, rules: &[v1::RecordingRule]) -> LogsRecordingRuleSet;
}

/// The set of tenants this instance is responsible for.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManagedTenants(BTreeSet<String>);

impl ManagedTenants {
    /// Parse a comma-separated list. Entries are trimmed; empty entries and
    /// duplicates are dropped.
    pub fn parse(list: &str) -> Self {
        Self(
            list.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn contains(&self, tenant: &str) -> bool {
        self.0.contains(tenant)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for ManagedTenants {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// A rule object owned by one tenant.
pub trait TenantScoped {
    type Group: Clone;

    fn object_name(&self) -> String;
    fn tenant(&self) -> Option<&str>;
    fn groups(&self) -> &[Self::Group];
}

impl TenantScoped for PrometheusRule {
    type Group = RuleGroup;

    fn object_name(&self) -> String {
        self.name_any()
    }

    fn tenant(&self) -> Option<&str> {
        self.labels().get(TENANT_LABEL).map(String::as_str)
    }

    fn groups(&self) -> &[RuleGroup] {
        &self.spec.groups
    }
}

impl TenantScoped for v1::AlertingRule {
    type Group = v1::AlertingRuleGroup;

    fn object_name(&self) -> String {
        self.name_any()
    }

    fn tenant(&self) -> Option<&str> {
        Some(self.spec.tenant_id.as_str()).filter(|t| !t.is_empty())
    }

    fn groups(&self) -> &[v1::AlertingRuleGroup] {
        &self.spec.groups
    }
}

impl TenantScoped for v1::RecordingRule {
    type Group = v1::RecordingRuleGroup;

    fn object_name(&self) -> String {
        self.name_any()
    }

    fn tenant(&self) -> Option<&str> {
        Some(self.spec.tenant_id.as_str()).filter(|t| !t.is_empty())
    }

    fn groups(&self) -> &[v1::RecordingRuleGroup] {
        &self.spec.groups
    }
}

/// Bucket the groups of `objects` by tenant, keeping listing order and
/// dropping objects of unmanaged or missing tenants.
pub fn partition<T: TenantScoped>(
    tenants: &ManagedTenants,
    objects: &[T],
) -> TenantRuleSet<T::Group> {
    let mut out: TenantRuleSet<T::Group> =
        tenants.iter().map(|t| (t.to_string(), Vec::new())).collect();

    for obj in objects {
        let name = obj.object_name();
        let Some(tenant) = obj.tenant() else {
            debug!(name = %name, "skipping rule object without tenant");
            continue;
        };
        match out.get_mut(tenant) {
            Some(groups) => groups.extend_from_slice(obj.groups()),
            None => {
                debug!(name = %name, tenant, "skipping rule object with unmanaged tenant");
            }
        }
    }
    out
}
