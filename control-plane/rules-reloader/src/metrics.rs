//! Prometheus metrics for the reloader.
//!
//! Collectors are registered on an injected [`Registry`]; the internal HTTP
//! server renders the same registry at `/metrics`.
//!
//! Loader:
//! - `rules_reloader_prom_rule_fetches_total`, `..._fetch_failures_total`
//! - `rules_reloader_loki_rule_fetches_total{type}`, `..._fetch_failures_total{type}`
//! - `rules_reloader_prom_tenant_rulegroups{tenant}`
//! - `rules_reloader_loki_tenant_rulegroups{type,tenant}`
//!
//! Publisher:
//! - `rules_reloader_prom_rule_sets_total{tenant}`
//! - `rules_reloader_prom_rule_set_failures_total{tenant,reason}`
//! - `rules_reloader_loki_rule_sets_total{type,tenant}`
//! - `rules_reloader_loki_rule_set_failures_total{type,tenant}`
//! - `rules_reloader_rules_store_ops_total{tenant,status_code}`

use prometheus::{IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry};

const NAMESPACE: &str = "rules_reloader";

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE)
}

#[derive(Clone)]
pub struct LoaderMetrics {
    pub prom_rule_fetches: IntCounter,
    pub prom_rule_fetch_failures: IntCounter,
    pub loki_rule_fetches: IntCounterVec,
    pub loki_rule_fetch_failures: IntCounterVec,
    pub prom_tenant_rule_groups: IntGaugeVec,
    pub loki_tenant_rule_groups: IntGaugeVec,
}

impl LoaderMetrics {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let m = Self {
            prom_rule_fetches: IntCounter::with_opts(opts(
                "prom_rule_fetches_total",
                "Number of PrometheusRule list calls.",
            ))?,
            prom_rule_fetch_failures: IntCounter::with_opts(opts(
                "prom_rule_fetch_failures_total",
                "Number of failed PrometheusRule list calls.",
            ))?,
            loki_rule_fetches: IntCounterVec::new(
                opts("loki_rule_fetches_total", "Number of Loki rule list calls."),
                &["type"],
            )?,
            loki_rule_fetch_failures: IntCounterVec::new(
                opts(
                    "loki_rule_fetch_failures_total",
                    "Number of failed Loki rule list calls.",
                ),
                &["type"],
            )?,
            prom_tenant_rule_groups: IntGaugeVec::new(
                opts(
                    "prom_tenant_rulegroups",
                    "Metrics rule groups loaded per tenant.",
                ),
                &["tenant"],
            )?,
            loki_tenant_rule_groups: IntGaugeVec::new(
                opts(
                    "loki_tenant_rulegroups",
                    "Loki rule groups loaded per tenant.",
                ),
                &["type", "tenant"],
            )?,
        };
        registry.register(Box::new(m.prom_rule_fetches.clone()))?;
        registry.register(Box::new(m.prom_rule_fetch_failures.clone()))?;
        registry.register(Box::new(m.loki_rule_fetches.clone()))?;
        registry.register(Box::new(m.loki_rule_fetch_failures.clone()))?;
        registry.register(Box::new(m.prom_tenant_rule_groups.clone()))?;
        registry.register(Box::new(m.loki_tenant_rule_groups.clone()))?;
        Ok(m)
    }
}

#[derive(Clone)]
pub struct SyncerMetrics {
    pub prom_rule_sets: IntCounterVec,
    pub prom_rule_set_failures: IntCounterVec,
    pub loki_rule_sets: IntCounterVec,
    pub loki_rule_set_failures: IntCounterVec,
    pub rules_store_ops: IntCounterVec,
}

impl SyncerMetrics {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let m = Self {
            prom_rule_sets: IntCounterVec::new(
                opts(
                    "prom_rule_sets_total",
                    "Attempted PrometheusRule writes per tenant.",
                ),
                &["tenant"],
            )?,
            prom_rule_set_failures: IntCounterVec::new(
                opts(
                    "prom_rule_set_failures_total",
                    "Failed PrometheusRule writes per tenant and reason.",
                ),
                &["tenant", "reason"],
            )?,
            loki_rule_sets: IntCounterVec::new(
                opts(
                    "loki_rule_sets_total",
                    "Loki rule groups pushed to the rules API.",
                ),
                &["type", "tenant"],
            )?,
            loki_rule_set_failures: IntCounterVec::new(
                opts(
                    "loki_rule_set_failures_total",
                    "Loki rule groups the rules API rejected or never received.",
                ),
                &["type", "tenant"],
            )?,
            rules_store_ops: IntCounterVec::new(
                opts(
                    "rules_store_ops_total",
                    "Rules API responses per tenant and status code.",
                ),
                &["tenant", "status_code"],
            )?,
        };
        registry.register(Box::new(m.prom_rule_sets.clone()))?;
        registry.register(Box::new(m.prom_rule_set_failures.clone()))?;
        registry.register(Box::new(m.loki_rule_sets.clone()))?;
        registry.register(Box::new(m.loki_rule_set_failures.clone()))?;
        registry.register(Box::new(m.rules_store_ops.clone()))?;
        Ok(m)
    }
}
