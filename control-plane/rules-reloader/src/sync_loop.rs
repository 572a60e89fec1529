use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::crd::RuleKind;
use crate::error::FetchError;
use crate::loader::RuleSource;
use crate::syncer::RulePublisher;

#[derive(Clone, Debug)]
pub struct LoopSettings {
    pub resync_interval: Duration,
    pub config_reload_interval: Duration,
    pub log_rules_enabled: bool,
}

/// Run until cancelled. Resync and credential reload tick on independent
/// cadences, the first tick of each one full period after start. A fetch
/// failure ends the loop with that error; publish failures are logged.
pub async fn sync_loop<S, P>(
    cancel: CancellationToken,
    source: &S,
    publisher: &mut P,
    settings: &LoopSettings,
) -> Result<(), FetchError>
where
    S: RuleSource + ?Sized,
    P: RulePublisher + ?Sized,
{
    let start = Instant::now();
    let mut resync = interval_at(start + settings.resync_interval, settings.resync_interval);
    resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut reload = interval_at(
        start + settings.config_reload_interval,
        settings.config_reload_interval,
    );
    reload.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        resync_secs = settings.resync_interval.as_secs(),
        reload_secs = settings.config_reload_interval.as_secs(),
        log_rules = settings.log_rules_enabled,
        "starting sync loop"
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("sync loop cancelled");
                return Ok(());
            }
            _ = reload.tick() => {
                if let Err(e) = publisher.reload_config().await {
                    error!(error = %e, "reloading credentials, keeping previous ones");
                }
            }
            _ = resync.tick() => {
                resync_once(source, publisher, settings.log_rules_enabled).await?;
                debug!(duration_secs = settings.resync_interval.as_secs(), "sleeping");
            }
        }
    }
}

/// One full synchronisation pass over every rule kind.
pub async fn resync_once<S, P>(
    source: &S,
    publisher: &mut P,
    log_rules_enabled: bool,
) -> Result<(), FetchError>
where
    S: RuleSource + ?Sized,
    P: RulePublisher + ?Sized,
{
    let rules = source
        .fetch_prometheus_rules()
        .await
        .inspect_err(|e| error!(kind = %RuleKind::Metrics, error = %e, "fetching rules"))?;
    for (tenant, groups) in source.partition_metrics(&rules) {
        if let Err(e) = publisher.publish_metrics(&tenant, &groups).await {
            error!(tenant = %tenant, kind = %RuleKind::Metrics, error = %e, "publishing rules");
        }
    }

    if !log_rules_enabled {
        return Ok(());
    }

    let rules = source
        .fetch_loki_alerting_rules()
        .await
        .inspect_err(|e| error!(kind = %RuleKind::LogsAlerting, error = %e, "fetching rules"))?;
    for (tenant, groups) in source.partition_logs_alerting(&rules) {
        if let Err(e) = publisher.switch_tenant(&tenant).await {
            error!(tenant = %tenant, kind = %RuleKind::LogsAlerting, error = %e, "switching tenant");
            continue;
        }
        if let Err(e) = publisher.publish_logs_alerting(&groups).await {
            error!(tenant = %tenant, kind = %RuleKind::LogsAlerting, error = %e, "publishing rules");
        }
    }

    let rules = source
        .fetch_loki_recording_rules()
        .await
        .inspect_err(|e| error!(kind = %RuleKind::LogsRecording, error = %e, "fetching rules"))?;
    for (tenant, groups) in source.partition_logs_recording(&rules) {
        if let Err(e) = publisher.switch_tenant(&tenant).await {
            error!(tenant = %tenant, kind = %RuleKind::LogsRecording, error = %e, "switching tenant");
            continue;
        }
        if let Err(e) = publisher.publish_logs_recording(&groups).await {
            error!(tenant = %tenant, kind = %RuleKind::LogsRecording, error = %e, "publishing rules");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::loki::v1;
    use crate::crd::{PrometheusRule, PrometheusRuleSpec, Rule, RuleGroup};
    use crate::error::{CredentialError, PublishError};
    use crate::loader::{
        LogsAlertingRuleSet, LogsRecordingRuleSet, ManagedTenants, MetricsRuleSet, partition,
    };
    use crate::syncer::build_tenant_rule;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeSource {
        tenants: ManagedTenants,
        prometheus: Vec<PrometheusRule>,
        alerting: Vec<v1::AlertingRule>,
        recording: Vec<v1::RecordingRule>,
        fail: bool,
    }

    #[async_trait]
    impl RuleSource for FakeSource {
        async fn fetch_prometheus_rules(&self) -> Result<Vec<PrometheusRule>, FetchError> {
            if self.fail {
                return Err(FetchError::List {
                    kind: "PrometheusRule",
                    message: "connection refused".into(),
                });
            }
            Ok(self.prometheus.clone())
        }
        async fn fetch_loki_alerting_rules(&self) -> Result<Vec<v1::AlertingRule>, FetchError> {
            Ok(self.alerting.clone())
        }
        async fn fetch_loki_recording_rules(
            &self,
        ) -> Result<Vec<v1::RecordingRule>, FetchError> {
            Ok(self.recording.clone())
        }
        fn partition_metrics(&self, rules: &[PrometheusRule]) -> MetricsRuleSet {
            partition(&self.tenants, rules)
        }
        fn partition_logs_alerting(&self, rules: &[v1::AlertingRule]) -> LogsAlertingRuleSet {
            partition(&self.tenants, rules)
        }
        fn partition_logs_recording(&self, rules: &[v1::RecordingRule]) -> LogsRecordingRuleSet {
            partition(&self.tenants, rules)
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Reload,
        Switch(String),
        Metrics { tenant: String, exprs: Vec<String> },
        Alerting { tenant: Option<String>, groups: usize },
        Recording { tenant: Option<String>, groups: usize },
    }

    #[derive(Default)]
    struct FakePublisher {
        calls: Arc<Mutex<Vec<Call>>>,
        known: Vec<String>,
        current: Option<String>,
        failing_metrics: Option<String>,
        failing_reload: bool,
    }

    impl FakePublisher {
        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl RulePublisher for FakePublisher {
        async fn reload_config(&mut self) -> Result<(), CredentialError> {
            self.record(Call::Reload);
            if self.failing_reload {
                return Err(CredentialError::Discovery("secrets is forbidden".into()));
            }
            Ok(())
        }
        async fn switch_tenant(&mut self, tenant: &str) -> Result<(), CredentialError> {
            if !self.known.iter().any(|t| t == tenant) {
                return Err(CredentialError::UnknownTenant(tenant.into()));
            }
            self.current = Some(tenant.into());
            self.record(Call::Switch(tenant.into()));
            Ok(())
        }
        async fn publish_metrics(
            &mut self,
            tenant: &str,
            groups: &[RuleGroup],
        ) -> Result<(), PublishError> {
            let rule = build_tenant_rule(tenant, "rules", groups)?;
            let exprs = rule
                .spec
                .groups
                .iter()
                .flat_map(|g| g.rules.iter().map(Rule::expression))
                .collect();
            self.record(Call::Metrics {
                tenant: tenant.into(),
                exprs,
            });
            if self.failing_metrics.as_deref() == Some(tenant) {
                return Err(PublishError::Create("denied".into()));
            }
            Ok(())
        }
        async fn publish_logs_alerting(
            &mut self,
            groups: &[v1::AlertingRuleGroup],
        ) -> Result<(), PublishError> {
            self.record(Call::Alerting {
                tenant: self.current.clone(),
                groups: groups.len(),
            });
            Ok(())
        }
        async fn publish_logs_recording(
            &mut self,
            groups: &[v1::RecordingRuleGroup],
        ) -> Result<(), PublishError> {
            self.record(Call::Recording {
                tenant: self.current.clone(),
                groups: groups.len(),
            });
            Ok(())
        }
    }

    fn prom_rule(name: &str, tenant: &str, rule: Rule) -> PrometheusRule {
        let mut pr = PrometheusRule::new(
            name,
            PrometheusRuleSpec {
                groups: vec![RuleGroup {
                    name: format!("{name}-group"),
                    rules: vec![rule],
                    ..Default::default()
                }],
            },
        );
        pr.metadata.labels = Some(BTreeMap::from([("tenant".to_string(), tenant.to_string())]));
        pr
    }

    fn two_tenant_source() -> FakeSource {
        FakeSource {
            tenants: ManagedTenants::parse("team-a,team-b"),
            prometheus: vec![
                prom_rule("a", "team-a", Rule::recording("job:requests:sum", "sum(http_requests_total)")),
                prom_rule("b", "team-b", Rule::alerting("HighErrors", "rate(errors_total[5m]) > 0.1")),
            ],
            ..Default::default()
        }
    }

    fn settings(resync: u64, reload: u64, logs: bool) -> LoopSettings {
        LoopSettings {
            resync_interval: Duration::from_secs(resync),
            config_reload_interval: Duration::from_secs(reload),
            log_rules_enabled: logs,
        }
    }

    /// Run the loop for `secs` of paused time, then cancel it.
    async fn run_for(
        source: FakeSource,
        publisher: FakePublisher,
        settings: LoopSettings,
        secs: u64,
    ) -> Result<(), FetchError> {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut publisher = publisher;
            sync_loop(token, &source, &mut publisher, &settings).await
        });
        tokio::time::sleep(Duration::from_secs(secs)).await;
        cancel.cancel();
        handle.await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn one_tick_publishes_each_tenant_once() {
        let publisher = FakePublisher::default();
        let calls = publisher.calls.clone();

        run_for(two_tenant_source(), publisher, settings(15, 300, false), 16)
            .await
            .unwrap();

        let calls = calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                Call::Metrics {
                    tenant: "team-a".into(),
                    exprs: vec![r#"sum(http_requests_total{tenant="team-a"})"#.into()],
                },
                Call::Metrics {
                    tenant: "team-b".into(),
                    exprs: vec![r#"rate(errors_total{tenant="team-b"}[5m]) > 0.1"#.into()],
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_stops_the_loop_without_publishing() {
        let publisher = FakePublisher::default();
        let calls = publisher.calls.clone();
        let source = FakeSource {
            fail: true,
            ..two_tenant_source()
        };
        let mut publisher = publisher;

        let res = sync_loop(
            CancellationToken::new(),
            &source,
            &mut publisher,
            &settings(15, 300, false),
        )
        .await;

        assert!(matches!(res, Err(FetchError::List { .. })));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_happens_before_the_first_period() {
        let publisher = FakePublisher::default();
        let calls = publisher.calls.clone();
        run_for(two_tenant_source(), publisher, settings(15, 20, false), 14)
            .await
            .unwrap();
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reload_runs_on_its_own_cadence() {
        let publisher = FakePublisher::default();
        let calls = publisher.calls.clone();

        run_for(two_tenant_source(), publisher, settings(10, 25, false), 55)
            .await
            .unwrap();

        let calls = calls.lock().unwrap();
        let reloads = calls.iter().filter(|c| **c == Call::Reload).count();
        let metrics = calls
            .iter()
            .filter(|c| matches!(c, Call::Metrics { .. }))
            .count();
        assert_eq!(reloads, 2);
        assert_eq!(metrics, 5 * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reload_does_not_stop_resyncs() {
        let publisher = FakePublisher {
            failing_reload: true,
            ..Default::default()
        };
        let calls = publisher.calls.clone();

        run_for(two_tenant_source(), publisher, settings(10, 5, false), 22)
            .await
            .unwrap();

        let calls = calls.lock().unwrap();
        let reloads = calls.iter().filter(|c| **c == Call::Reload).count();
        let metrics = calls
            .iter()
            .filter(|c| matches!(c, Call::Metrics { .. }))
            .count();
        assert_eq!(reloads, 4);
        assert_eq!(metrics, 2 * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_tenant_does_not_block_others() {
        let publisher = FakePublisher {
            failing_metrics: Some("team-a".into()),
            ..Default::default()
        };
        let calls = publisher.calls.clone();

        run_for(two_tenant_source(), publisher, settings(10, 300, false), 25)
            .await
            .unwrap();

        let calls = calls.lock().unwrap();
        let b = calls
            .iter()
            .filter(|c| matches!(c, Call::Metrics { tenant, .. } if tenant == "team-b"))
            .count();
        assert_eq!(b, 2, "team-b published on every tick");
    }

    #[tokio::test(start_paused = true)]
    async fn logs_rules_switch_tenant_before_publishing() {
        let mut source = two_tenant_source();
        source.alerting = vec![v1::AlertingRule::new(
            "alerts",
            v1::AlertingRuleSpec {
                tenant_id: "team-a".into(),
                groups: vec![v1::AlertingRuleGroup {
                    name: "g".into(),
                    ..Default::default()
                }],
            },
        )];
        // team-b has no credentials: its logs publish is skipped
        let publisher = FakePublisher {
            known: vec!["team-a".into()],
            ..Default::default()
        };
        let calls = publisher.calls.clone();

        run_for(source, publisher, settings(15, 300, true), 16)
            .await
            .unwrap();

        let logs: Vec<Call> = calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| !matches!(c, Call::Metrics { .. }))
            .cloned()
            .collect();
        assert_eq!(
            logs,
            vec![
                Call::Switch("team-a".into()),
                Call::Alerting {
                    tenant: Some("team-a".into()),
                    groups: 1
                },
                Call::Switch("team-a".into()),
                Call::Recording {
                    tenant: Some("team-a".into()),
                    groups: 0
                },
            ]
        );
    }
}
