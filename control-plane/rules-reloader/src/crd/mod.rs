pub mod loki;
pub mod prometheus_rule;

pub use prometheus_rule::{PrometheusRule, PrometheusRuleSpec, Rule, RuleGroup};

/// The three rule families the reloader synchronises.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RuleKind {
    Metrics,
    LogsAlerting,
    LogsRecording,
}

impl RuleKind {
    /// Value used for the `type` metric label and the `kind` log field.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Metrics => "metrics",
            RuleKind::LogsAlerting => "alerting",
            RuleKind::LogsRecording => "recording",
        }
    }
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
