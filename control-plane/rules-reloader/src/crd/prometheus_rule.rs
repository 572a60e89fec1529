use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label marking PrometheusRules generated by the reloader so that the
/// downstream ruler picks them up.
pub const OWNERSHIP_LABEL: &str = "operator.thanos.io/prometheus-rule";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default)]
#[kube(
    group = "monitoring.coreos.com",
    version = "v1",
    kind = "PrometheusRule",
    plural = "prometheusrules",
    namespaced,
    schema = "disabled"
)]
pub struct PrometheusRuleSpec {
    #[serde(default)]
    pub groups: Vec<RuleGroup>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleGroup {
    pub name: String,
    /// Evaluation interval, e.g. "30s"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_offset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i32>,
    /// Thanos-only; ignored by plain Prometheus
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_response_strategy: Option<String>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,
    pub expr: IntOrString,
    #[serde(rename = "for", default, skip_serializing_if = "Option::is_none")]
    pub for_: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_firing_for: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Rule {
    pub fn recording(record: &str, expr: &str) -> Self {
        Self {
            record: Some(record.to_string()),
            alert: None,
            expr: IntOrString::String(expr.to_string()),
            for_: None,
            keep_firing_for: None,
            labels: None,
            annotations: None,
        }
    }

    pub fn alerting(alert: &str, expr: &str) -> Self {
        Self {
            record: None,
            alert: Some(alert.to_string()),
            ..Self::recording("", expr)
        }
    }

    /// Expression as text; integer expressions are rendered as-is.
    pub fn expression(&self) -> String {
        match &self.expr {
            IntOrString::Int(i) => i.to_string(),
            IntOrString::String(s) => s.clone(),
        }
    }

    /// The record or alert name, whichever is set.
    pub fn display_name(&self) -> &str {
        self.record
            .as_deref()
            .or(self.alert.as_deref())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_expressions_are_accepted() {
        let rule: Rule =
            serde_json::from_value(serde_json::json!({"alert": "Always", "expr": 1}))
                .unwrap();
        assert_eq!(rule.expression(), "1");
        assert_eq!(rule.display_name(), "Always");
    }

    #[test]
    fn rule_serializes_for_keyword() {
        let mut rule = Rule::alerting("HighErrorRate", "up == 0");
        rule.for_ = Some("5m".into());
        let v = serde_json::to_value(&rule).unwrap();
        assert_eq!(v["for"], "5m");
        assert!(v.get("record").is_none());
    }
}
