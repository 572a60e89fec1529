use std::net::SocketAddr;

use anyhow::{Context, anyhow};
use kube::Client;
use prometheus::Registry;
#[cfg(target_os = "linux")]
use prometheus::process_collector::ProcessCollector;
use reloader_observability::run_internal_server;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    config::ReloaderConfig,
    credentials::{CredentialStore, OidcTokenClient, SecretDiscovery},
    loader::KubeRulesLoader,
    metrics::{LoaderMetrics, SyncerMetrics},
    sync_loop::sync_loop,
    syncer::{RulePublisher, RulesApiClient, RulesPublisher},
};

pub type KubePublisher = RulesPublisher<Client, SecretDiscovery<Client>, OidcTokenClient>;

/// Wire the loader and publisher against the cluster and the rules API.
pub fn build_components(
    client: Client,
    cfg: &ReloaderConfig,
    registry: &Registry,
) -> anyhow::Result<(KubeRulesLoader<Client>, KubePublisher)> {
    let tenants = cfg.managed_tenants();

    let loader = KubeRulesLoader::new(
        client.clone(),
        cfg.namespace.clone(),
        tenants.clone(),
        LoaderMetrics::new(registry).context("registering loader metrics")?,
    );

    let http = reqwest::Client::builder()
        .timeout(cfg.request_timeout())
        .build()
        .context("building HTTP client")?;

    let credentials = CredentialStore::new(
        cfg.credential_settings(),
        SecretDiscovery::new(
            client.clone(),
            cfg.namespace.clone(),
            tenants,
            cfg.oidc_audience.clone(),
            cfg.oidc_issuer_url.clone(),
        ),
        OidcTokenClient::with_client(http.clone()),
    );

    let publisher = RulesPublisher::new(
        client,
        credentials,
        RulesApiClient::new(http, cfg.observatorium_api_url.clone()),
        cfg.target_namespace(),
        SyncerMetrics::new(registry).context("registering publisher metrics")?,
    )
    .reject_tenant_override(cfg.reject_tenant_override);
    Ok((loader, publisher))
}

/// Spawn the `/metrics` and health endpoint server.
pub fn spawn_internal_server(
    addr: SocketAddr,
    registry: Registry,
    cancel: CancellationToken,
) -> JoinHandle<std::io::Result<()>> {
    tokio::spawn(async move { run_internal_server(addr, registry, cancel).await })
}

/// Cancel `cancel` on Ctrl-C or SIGTERM.
pub fn spawn_signal_handler(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "installing Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "installing SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("received Ctrl+C"),
            _ = terminate => info!("received SIGTERM"),
            _ = cancel.cancelled() => return,
        }
        cancel.cancel();
    })
}

/// Drive `work` until it completes or the internal server task exits. An
/// early server exit cancels `cancel` and is reported as an error.
pub async fn supervise<F>(
    work: F,
    mut server: JoinHandle<std::io::Result<()>>,
    cancel: &CancellationToken,
) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    let (result, server_done) = tokio::select! {
        res = work => (res, false),
        res = &mut server => (server_outcome(res, cancel), true),
    };
    cancel.cancel();
    if !server_done {
        if let Err(e) = server_outcome(server.await, cancel) {
            error!(error = %format!("{e:#}"), "internal HTTP server");
        }
    }
    result
}

fn server_outcome(
    res: Result<std::io::Result<()>, JoinError>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    match res {
        Ok(Ok(())) if cancel.is_cancelled() => Ok(()),
        Ok(Ok(())) => Err(anyhow!("internal HTTP server stopped unexpectedly")),
        Ok(Err(e)) => Err(e).context("internal HTTP server"),
        Err(e) => Err(e).context("internal HTTP server task"),
    }
}

#[cfg(target_os = "linux")]
fn register_process_metrics(registry: &Registry) -> anyhow::Result<()> {
    registry
        .register(Box::new(ProcessCollector::for_self()))
        .context("registering process metrics")
}

#[cfg(not(target_os = "linux"))]
fn register_process_metrics(_registry: &Registry) -> anyhow::Result<()> {
    Ok(())
}

/// Load credentials, then run the sync loop and the internal server until a
/// signal arrives, fetching rules fails or the server stops.
pub async fn run_all(client: Client, cfg: ReloaderConfig) -> anyhow::Result<()> {
    cfg.validate()?;

    let registry = Registry::new();
    register_process_metrics(&registry)?;
    let (loader, mut publisher) = build_components(client, &cfg, &registry)?;

    publisher
        .reload_config()
        .await
        .context("loading tenant credentials")?;

    let cancel = CancellationToken::new();
    let signals = spawn_signal_handler(cancel.clone());
    let server = spawn_internal_server(cfg.http_addr(), registry, cancel.clone());

    let settings = cfg.loop_settings();
    let work = async {
        sync_loop(cancel.clone(), &loader, &mut publisher, &settings)
            .await
            .context("sync loop")
    };
    let result = supervise(work, server, &cancel).await;
    let _ = signals.await;

    result?;
    info!("rules-reloader stopped");
    Ok(())
}
