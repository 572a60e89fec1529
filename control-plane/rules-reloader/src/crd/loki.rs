//! Loki operator rule resources.
//!
//! Both `v1beta1` and `v1` objects may exist in a cluster at the same time.
//! Everything past the loader works on `v1` only; `v1beta1` objects are
//! converted at ingestion through the `TryFrom` impls at the bottom of this
//! module.

use thiserror::Error;

pub mod v1 {
    use kube::CustomResource;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;

    #[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default)]
    #[kube(
        group = "loki.grafana.com",
        version = "v1",
        kind = "AlertingRule",
        plural = "alertingrules",
        namespaced,
        schema = "disabled"
    )]
    pub struct AlertingRuleSpec {
        #[serde(rename = "tenantID", default)]
        pub tenant_id: String,
        #[serde(default)]
        pub groups: Vec<AlertingRuleGroup>,
    }

    #[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
    pub struct AlertingRuleGroup {
        pub name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub interval: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub limit: Option<i32>,
        #[serde(default)]
        pub rules: Vec<AlertingRuleGroupSpec>,
    }

    #[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
    pub struct AlertingRuleGroupSpec {
        pub alert: String,
        pub expr: String,
        #[serde(
            rename = "for",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        pub for_: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub annotations: Option<BTreeMap<String, String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub labels: Option<BTreeMap<String, String>>,
    }

    #[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default)]
    #[kube(
        group = "loki.grafana.com",
        version = "v1",
        kind = "RecordingRule",
        plural = "recordingrules",
        namespaced,
        schema = "disabled"
    )]
    pub struct RecordingRuleSpec {
        #[serde(rename = "tenantID", default)]
        pub tenant_id: String,
        #[serde(default)]
        pub groups: Vec<RecordingRuleGroup>,
    }

    #[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
    pub struct RecordingRuleGroup {
        pub name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub interval: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub limit: Option<i32>,
        #[serde(default)]
        pub rules: Vec<RecordingRuleGroupSpec>,
    }

    #[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
    pub struct RecordingRuleGroupSpec {
        pub record: String,
        pub expr: String,
    }
}

/// Legacy schema. Fields that `v1` requires are optional here so that a
/// malformed object surfaces as a conversion error instead of failing the
/// whole list call.
pub mod v1beta1 {
    use kube::CustomResource;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;

    #[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default)]
    #[kube(
        group = "loki.grafana.com",
        version = "v1beta1",
        kind = "AlertingRule",
        plural = "alertingrules",
        namespaced,
        schema = "disabled"
    )]
    pub struct AlertingRuleSpec {
        #[serde(rename = "tenantID", default)]
        pub tenant_id: String,
        #[serde(default)]
        pub groups: Vec<AlertingRuleGroup>,
    }

    #[derive(Deserialize, Serialize, Clone, Debug, Default)]
    pub struct AlertingRuleGroup {
        #[serde(default)]
        pub name: Option<String>,
        #[serde(default)]
        pub interval: Option<String>,
        #[serde(default)]
        pub limit: Option<i32>,
        #[serde(default)]
        pub rules: Vec<AlertingRuleGroupSpec>,
    }

    #[derive(Deserialize, Serialize, Clone, Debug, Default)]
    pub struct AlertingRuleGroupSpec {
        #[serde(default)]
        pub alert: Option<String>,
        #[serde(default)]
        pub expr: Option<String>,
        #[serde(rename = "for", default)]
        pub for_: Option<String>,
        #[serde(default)]
        pub annotations: Option<BTreeMap<String, String>>,
        #[serde(default)]
        pub labels: Option<BTreeMap<String, String>>,
    }

    #[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default)]
    #[kube(
        group = "loki.grafana.com",
        version = "v1beta1",
        kind = "RecordingRule",
        plural = "recordingrules",
        namespaced,
        schema = "disabled"
    )]
    pub struct RecordingRuleSpec {
        #[serde(rename = "tenantID", default)]
        pub tenant_id: String,
        #[serde(default)]
        pub groups: Vec<RecordingRuleGroup>,
    }

    #[derive(Deserialize, Serialize, Clone, Debug, Default)]
    pub struct RecordingRuleGroup {
        #[serde(default)]
        pub name: Option<String>,
        #[serde(default)]
        pub interval: Option<String>,
        #[serde(default)]
        pub limit: Option<i32>,
        #[serde(default)]
        pub rules: Vec<RecordingRuleGroupSpec>,
    }

    #[derive(Deserialize, Serialize, Clone, Debug, Default)]
    pub struct RecordingRuleGroupSpec {
        #[serde(default)]
        pub record: Option<String>,
        #[serde(default)]
        pub expr: Option<String>,
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("object {name}: {reason}")]
pub struct ConversionError {
    pub name: String,
    pub reason: String,
}

impl ConversionError {
    fn new(name: &Option<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.clone().unwrap_or_default(),
            reason: reason.into(),
        }
    }
}

fn required(
    value: Option<String>,
    object: &Option<String>,
    what: impl FnOnce() -> String,
) -> Result<String, ConversionError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ConversionError::new(object, format!("missing {}", what()))),
    }
}

impl TryFrom<v1beta1::AlertingRule> for v1::AlertingRule {
    type Error = ConversionError;

    fn try_from(src: v1beta1::AlertingRule) -> Result<Self, Self::Error> {
        let object = src.metadata.name.clone();
        let mut groups = Vec::with_capacity(src.spec.groups.len());
        for (gi, g) in src.spec.groups.into_iter().enumerate() {
            let name = required(g.name, &object, || format!("name of group {gi}"))?;
            let mut rules = Vec::with_capacity(g.rules.len());
            for (ri, r) in g.rules.into_iter().enumerate() {
                rules.push(v1::AlertingRuleGroupSpec {
                    alert: required(r.alert, &object, || {
                        format!("alert of rule {ri} in group {name}")
                    })?,
                    expr: required(r.expr, &object, || {
                        format!("expr of rule {ri} in group {name}")
                    })?,
                    for_: r.for_,
                    annotations: r.annotations,
                    labels: r.labels,
                });
            }
            groups.push(v1::AlertingRuleGroup {
                name,
                interval: g.interval,
                limit: g.limit,
                rules,
            });
        }
        Ok(v1::AlertingRule {
            metadata: src.metadata,
            spec: v1::AlertingRuleSpec {
                tenant_id: src.spec.tenant_id,
                groups,
            },
        })
    }
}

impl TryFrom<v1beta1::RecordingRule> for v1::RecordingRule {
    type Error = ConversionError;

    fn try_from(src: v1beta1::RecordingRule) -> Result<Self, Self::Error> {
        let object = src.metadata.name.clone();
        let mut groups = Vec::with_capacity(src.spec.groups.len());
        for (gi, g) in src.spec.groups.into_iter().enumerate() {
            let name = required(g.name, &object, || format!("name of group {gi}"))?;
            let mut rules = Vec::with_capacity(g.rules.len());
            for (ri, r) in g.rules.into_iter().enumerate() {
                rules.push(v1::RecordingRuleGroupSpec {
                    record: required(r.record, &object, || {
                        format!("record of rule {ri} in group {name}")
                    })?,
                    expr: required(r.expr, &object, || {
                        format!("expr of rule {ri} in group {name}")
                    })?,
                });
            }
            groups.push(v1::RecordingRuleGroup {
                name,
                interval: g.interval,
                limit: g.limit,
                rules,
            });
        }
        Ok(v1::RecordingRule {
            metadata: src.metadata,
            spec: v1::RecordingRuleSpec {
                tenant_id: src.spec.tenant_id,
                groups,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_alerting_rule_converts() {
        let legacy: v1beta1::AlertingRule = serde_json::from_value(json!({
            "apiVersion": "loki.grafana.com/v1beta1",
            "kind": "AlertingRule",
            "metadata": {"name": "legacy", "namespace": "obs"},
            "spec": {
                "tenantID": "team-a",
                "groups": [{
                    "name": "g1",
                    "interval": "1m",
                    "rules": [{"alert": "Errors", "expr": "sum(rate({app=\"x\"}[5m])) > 1", "for": "10m"}]
                }]
            }
        }))
        .unwrap();

        let current = v1::AlertingRule::try_from(legacy).unwrap();
        assert_eq!(current.metadata.name.as_deref(), Some("legacy"));
        assert_eq!(current.spec.tenant_id, "team-a");
        assert_eq!(current.spec.groups[0].name, "g1");
        assert_eq!(current.spec.groups[0].rules[0].alert, "Errors");
        assert_eq!(current.spec.groups[0].rules[0].for_.as_deref(), Some("10m"));
    }

    #[test]
    fn legacy_recording_rule_without_expr_is_rejected() {
        let legacy: v1beta1::RecordingRule = serde_json::from_value(json!({
            "apiVersion": "loki.grafana.com/v1beta1",
            "kind": "RecordingRule",
            "metadata": {"name": "broken"},
            "spec": {
                "tenantID": "team-a",
                "groups": [{"name": "g1", "rules": [{"record": "r:sum"}]}]
            }
        }))
        .unwrap();

        let err = v1::RecordingRule::try_from(legacy).unwrap_err();
        assert_eq!(err.name, "broken");
        assert!(err.reason.contains("expr"), "{}", err.reason);
    }

    #[test]
    fn group_serializes_to_ruler_format() {
        let group = v1::AlertingRuleGroup {
            name: "g1".into(),
            interval: Some("1m".into()),
            limit: None,
            rules: vec![v1::AlertingRuleGroupSpec {
                alert: "Errors".into(),
                expr: "vector(1)".into(),
                for_: Some("5m".into()),
                ..Default::default()
            }],
        };
        let yaml = serde_yaml::to_string(&group).unwrap();
        assert!(yaml.contains("name: g1"));
        assert!(yaml.contains("for: 5m"));
        assert!(!yaml.contains("limit"));
    }
}
