use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clusterload::config::Config;
use clusterload::{ScenarioRunner, ShellHosting, SshConnector};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the Prometheus metrics recorder
fn setup_prometheus_metrics() -> anyhow::Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")
}

fn write_metrics(handle: &PrometheusHandle, path: &Path) {
    match std::fs::write(path, handle.render()) {
        Ok(()) => info!("Metrics written to {:?}", path),
        Err(e) => warn!("Failed to write metrics to {:?}: {}", path, e),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Must be installed before any metric is recorded
    let prometheus_handle = setup_prometheus_metrics()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clusterload=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        "Loaded configuration: inventory={:?}, load_nodes={:?}, {} scenarios",
        config.inventory_path,
        config.ssh.load_nodes,
        config.matrix.len()
    );
    if config.ssh.load_nodes.is_empty() {
        warn!("LOAD_NODES is empty - every scenario will abort");
    }

    tokio::fs::create_dir_all(&config.artifacts_dir)
        .await
        .with_context(|| format!("Failed to create {:?}", config.artifacts_dir))?;

    let connector = Arc::new(SshConnector::new(config.ssh.connect_timeout));
    let hosting = Arc::new(ShellHosting::from_file(&config.inventory_path, connector.clone())?);

    let matrix = config.matrix.clone();
    let report_path = config.artifacts_dir.join("suite-report.json");
    let metrics_out = config.metrics_out.clone();

    let runner = ScenarioRunner::new(config, hosting, connector).await?;
    let report = runner.run_suite(&matrix).await;

    tokio::fs::write(&report_path, report.to_json())
        .await
        .with_context(|| format!("Failed to write {:?}", report_path))?;
    info!("Suite report written to {:?}", report_path);

    if let Some(path) = metrics_out {
        write_metrics(&prometheus_handle, &path);
    }

    if !report.success() {
        anyhow::bail!(
            "{} of {} scenarios failed",
            report.scenarios.len() - report.passed(),
            report.scenarios.len()
        );
    }
    Ok(())
}
