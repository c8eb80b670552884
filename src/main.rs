//! Connector Engine - identity-provider reconciliation daemon
//!
//! Usage:
//!   connector-engine [OPTIONS]
//!
//! Options:
//!   -c, --config <PATH>  Path to config file
//!   -v, --verbose        Increase log verbosity
//!   --once               Run a single reconcile pass and exit

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dex_connector_engine::config::Config;
use dex_connector_engine::connector::TenantAppConfig;
use dex_connector_engine::credentials;
use dex_connector_engine::events;
use dex_connector_engine::metrics::PrometheusMetrics;
use dex_connector_engine::provider;
use dex_connector_engine::reconcile::TenantReconciler;
use dex_connector_engine::renewal::scheduler::RenewalScheduler;
use dex_connector_engine::renewal::SelfRenewal;
use dex_connector_engine::store::{FileCredentialStore, FileGatewayConfigStore};

#[derive(Parser, Debug)]
#[command(name = "connector-engine")]
#[command(author, version, about = "Identity provider connector reconciliation daemon", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "CONNECTOR_ENGINE_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Run a single reconcile pass and exit
    #[arg(long)]
    once: bool,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "dex_connector_engine={log_level},connector_engine={log_level},warn"
        ))
    });

    if args.json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting connector-engine"
    );

    // Load configuration
    let config = Config::load(args.config.as_ref())?;

    tracing::debug!(config = ?config, "loaded configuration");

    let provider_credentials = credentials::resolve_credentials(&config).await?;
    let tenants = credentials::load_tenants(&config.tenants.path, config.engine.secret_validity_months)?;
    let providers = provider::new_providers(&provider_credentials, &config.azure)?;

    tracing::info!(
        providers = providers.len(),
        tenants = tenants.len(),
        "initialized providers"
    );

    // Initialize components
    let registry = Registry::new();
    let metrics = Arc::new(PrometheusMetrics::new(&registry).context("failed to register metrics")?);
    let recorder = events::from_config(&config.events, "connector-engine");
    let gateway_store = FileGatewayConfigStore::new(&config.gateway.output_dir);
    let reconciler = TenantReconciler::new(providers.clone(), metrics, Arc::clone(&recorder));

    let scheduler = if config.renewal.enabled && !args.once {
        let operator = TenantAppConfig::new(config.engine.operator_name.clone(), String::new())
            .with_secret_validity_months(config.engine.secret_validity_months);
        let renewal = Arc::new(SelfRenewal::new(
            providers,
            Arc::new(FileCredentialStore::new(&config.renewal.store_path)),
            recorder,
            operator,
        ));
        Some(RenewalScheduler::start(&config.renewal, renewal).await?)
    } else {
        None
    };

    let mut interval = tokio::time::interval(config.reconcile_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = interval.tick() => {}
        }

        // a pass in flight is dropped on shutdown, aborting its requests
        tokio::select! {
            reports = reconciler.sync_all(&tenants, &gateway_store) => {
                for (tenant, report) in &reports {
                    match report {
                        Ok(report) => {
                            for failure in &report.failures {
                                tracing::warn!(
                                    tenant = %tenant,
                                    provider = %failure.connector,
                                    error = %failure.error,
                                    "provider failed, retrying next pass"
                                );
                            }
                        }
                        Err(e) => {
                            tracing::error!(tenant = %tenant, error = %e, "tenant reconcile failed");
                        }
                    }
                }

                if let Some(path) = &config.engine.metrics_path {
                    if let Err(e) = write_metrics(&registry, path) {
                        tracing::warn!(error = %e, path = %path.display(), "failed to write metrics");
                    }
                }
            }
            _ = &mut shutdown => {
                tracing::info!("reconcile pass cancelled");
                break;
            }
        }

        if args.once {
            break;
        }
    }

    tracing::info!("shutting down");

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await?;
    }

    Ok(())
}

/// Write the registry in Prometheus text format for a textfile collector.
fn write_metrics(registry: &Registry, path: &Path) -> anyhow::Result<()> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, buffer)?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM");
        }
    }
}
