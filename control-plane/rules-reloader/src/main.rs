use envconfig::Envconfig;
use kube::Client;
use reloader_observability::{TracingConfig, setup_tracing};
use rules_reloader::{config::ReloaderConfig, runtime};
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    setup_tracing(TracingConfig::from_env("rules-reloader"))?;

    let cfg = ReloaderConfig::init_from_env()?;
    info!(?cfg, "Starting rules-reloader");

    let client = Client::try_default().await?;
    runtime::run_all(client, cfg).await
}
