//! Connector Engine CLI - one-shot operations against the configured providers
//!
//! Usage:
//!   connector-cli reconcile <tenant>        Reconcile one tenant and write its config
//!   connector-cli render <tenant>           Print the assembled config without writing
//!   connector-cli delete <tenant>           Delete a tenant's applications
//!   connector-cli renew                     Run one self-renewal pass
//!   connector-cli setup <action> <provider> Manage credentials of an authenticated app

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use dex_connector_engine::config::Config;
use dex_connector_engine::connector::{TenantAppConfig, OWNER_GIANTSWARM};
use dex_connector_engine::credentials;
use dex_connector_engine::events::LogRecorder;
use dex_connector_engine::expiry::{self, TENANT_SECRET_ROTATION_WINDOW};
use dex_connector_engine::metrics::NoopMetrics;
use dex_connector_engine::provider::{self, Provider};
use dex_connector_engine::reconcile::{TenantReconciler, TenantReport};
use dex_connector_engine::renewal::SelfRenewal;
use dex_connector_engine::store::{
    FileCredentialStore, FileGatewayConfigStore, GatewayConfigStore,
};

#[derive(Parser, Debug)]
#[command(name = "connector-cli")]
#[command(author, version, about = "Connector engine CLI", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "CONNECTOR_ENGINE_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

/// Tenant selection shared by the tenant commands
#[derive(clap::Args, Debug)]
struct TenantArgs {
    /// Tenant name
    tenant: String,

    /// Redirect URI, required when the tenant is not in the tenant list
    #[arg(long)]
    redirect_uri: Option<String>,

    /// Application identifier URI
    #[arg(long)]
    identifier_uri: Option<String>,

    /// Validity of newly issued secrets in months
    #[arg(long)]
    secret_validity_months: Option<u32>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile one tenant and write its gateway configuration when changed
    Reconcile(TenantArgs),

    /// Print the assembled gateway configuration without writing it
    Render(TenantArgs),

    /// Delete a tenant's applications at every provider
    Delete {
        /// Tenant name
        tenant: String,
    },

    /// Run one self-renewal pass of the service credentials
    Renew,

    /// Manage the credentials of an app registered for the engine itself
    Setup {
        #[arg(value_enum)]
        action: SetupAction,

        /// Provider name (e.g. ad)
        provider: String,

        /// Provider owner
        #[arg(long, default_value = OWNER_GIANTSWARM)]
        owner: String,

        /// Application name, defaults to the operator name
        #[arg(long)]
        app_name: Option<String>,

        /// Redirect URI of the application
        #[arg(long, default_value = "http://localhost:8080/callback")]
        redirect_uri: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SetupAction {
    /// Create the app if needed and issue credentials
    Credentials,
    /// Revoke every credential of the app
    Clean,
    /// Delete the app
    Delete,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("dex_connector_engine={log_level},warn"))),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(args.config.as_ref())?;

    match &args.command {
        Command::Reconcile(tenant_args) => {
            let tenant = resolve_tenant(&config, tenant_args)?;
            let reconciler = reconciler(&config).await?;
            let store = FileGatewayConfigStore::new(&config.gateway.output_dir);
            let report = reconciler.sync(&tenant, &store).await?;
            print_report(&report, args.json)?;
            if !report.failures.is_empty() {
                std::process::exit(1);
            }
        }

        Command::Render(tenant_args) => {
            let tenant = resolve_tenant(&config, tenant_args)?;
            let reconciler = reconciler(&config).await?;
            let store = FileGatewayConfigStore::new(&config.gateway.output_dir);
            let previous = store.load(&tenant.name).await?.unwrap_or_default();
            let report = reconciler.reconcile(&tenant, &previous).await?;
            for failure in &report.failures {
                eprintln!("warning: {}: {}", failure.connector, failure.error);
            }
            if args.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report.assembled.configuration)?
                );
            } else {
                print!("{}", report.assembled.configuration.to_yaml()?);
            }
        }

        Command::Delete { tenant } => {
            let reconciler = reconciler(&config).await?;
            let store = FileGatewayConfigStore::new(&config.gateway.output_dir);
            let failures = reconciler.delete(tenant, &store).await?;
            if failures.is_empty() {
                println!("deleted {tenant}");
            } else {
                for failure in &failures {
                    eprintln!("error: {}: {}", failure.connector, failure.error);
                }
                std::process::exit(1);
            }
        }

        Command::Renew => {
            let provider_credentials = credentials::resolve_credentials(&config).await?;
            let providers = provider::new_providers(&provider_credentials, &config.azure)?;
            let operator =
                TenantAppConfig::new(config.engine.operator_name.clone(), String::new())
                    .with_secret_validity_months(config.engine.secret_validity_months);
            let renewal = SelfRenewal::new(
                providers,
                Arc::new(FileCredentialStore::new(&config.renewal.store_path)),
                Arc::new(LogRecorder),
                operator,
            );

            let report = renewal.run().await?;
            if args.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "rotated": report.rotated,
                        "up_to_date": report.up_to_date,
                        "skipped": report
                            .skipped
                            .iter()
                            .map(|s| serde_json::json!({"connector": s.connector, "reason": s.reason}))
                            .collect::<Vec<_>>(),
                    }))?
                );
            } else {
                for connector in &report.rotated {
                    println!("rotated     {connector}");
                }
                for connector in &report.up_to_date {
                    println!("up to date  {connector}");
                }
                for skipped in &report.skipped {
                    println!("skipped     {} ({})", skipped.connector, skipped.reason);
                }
            }
        }

        Command::Setup {
            action,
            provider: provider_name,
            owner,
            app_name,
            redirect_uri,
        } => {
            let provider_credentials = credentials::resolve_credentials(&config).await?;
            let credential = provider_credentials
                .iter()
                .find(|c| &c.name == provider_name && &c.owner == owner)
                .with_context(|| format!("no credentials for {owner}/{provider_name}"))?;
            let provider = provider::new_provider(credential, &config.azure)?;
            let app = TenantAppConfig::new(
                app_name
                    .clone()
                    .unwrap_or_else(|| config.engine.operator_name.clone()),
                redirect_uri.clone(),
            )
            .with_secret_validity_months(config.engine.secret_validity_months);

            run_setup(provider.as_ref(), *action, &app, args.json).await?;
        }
    }

    Ok(())
}

async fn reconciler(config: &Config) -> anyhow::Result<TenantReconciler> {
    let provider_credentials = credentials::resolve_credentials(config).await?;
    let providers = provider::new_providers(&provider_credentials, &config.azure)?;
    Ok(TenantReconciler::new(
        providers,
        Arc::new(NoopMetrics),
        Arc::new(LogRecorder),
    ))
}

/// Tenant from the tenant list, overridden by command line flags
fn resolve_tenant(config: &Config, args: &TenantArgs) -> anyhow::Result<TenantAppConfig> {
    let listed = if config.tenants.path.exists() {
        credentials::load_tenants(&config.tenants.path, config.engine.secret_validity_months)?
            .into_iter()
            .find(|t| t.name == args.tenant)
    } else {
        None
    };

    let mut tenant = match (listed, &args.redirect_uri) {
        (Some(mut tenant), Some(uri)) => {
            tenant.redirect_uri = uri.clone();
            tenant
        }
        (Some(tenant), None) => tenant,
        (None, Some(uri)) => TenantAppConfig::new(args.tenant.clone(), uri.clone())
            .with_secret_validity_months(config.engine.secret_validity_months),
        (None, None) => bail!(
            "tenant '{}' is not in {} and no --redirect-uri was given",
            args.tenant,
            config.tenants.path.display()
        ),
    };

    if let Some(identifier_uri) = &args.identifier_uri {
        tenant.identifier_uri = identifier_uri.clone();
    }
    if let Some(months) = args.secret_validity_months {
        tenant.secret_validity_months = months;
    }
    if !expiry::validity_outlives(tenant.secret_validity_months, TENANT_SECRET_ROTATION_WINDOW) {
        bail!(
            "secret validity of {} months ends inside the rotation window",
            tenant.secret_validity_months
        );
    }
    Ok(tenant)
}

fn print_report(report: &TenantReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "tenant": report.tenant,
                "changed": report.assembled.changed,
                "connectors": report
                    .assembled
                    .configuration
                    .connectors()
                    .map(|c| c.id.clone())
                    .collect::<Vec<_>>(),
                "failures": report
                    .failures
                    .iter()
                    .map(|f| serde_json::json!({"connector": f.connector, "error": f.error.to_string()}))
                    .collect::<Vec<_>>(),
            }))?
        );
        return Ok(());
    }

    println!(
        "{}: {}",
        report.tenant,
        if report.assembled.changed {
            "configuration written"
        } else {
            "configuration unchanged"
        }
    );
    for connector in report.assembled.configuration.connectors() {
        println!("  {:<24} {}", connector.id, connector.connector_type);
    }
    for failure in &report.failures {
        eprintln!("  failed: {} ({})", failure.connector, failure.error);
    }
    Ok(())
}

async fn run_setup(
    provider: &dyn Provider,
    action: SetupAction,
    app: &TenantAppConfig,
    json: bool,
) -> anyhow::Result<()> {
    match action {
        SetupAction::Credentials => {
            let credentials: BTreeMap<String, String> =
                provider.credentials_for_authenticated_app(app).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&credentials)?);
            } else {
                for (key, value) in &credentials {
                    println!("{key}: {value}");
                }
                println!();
                println!("save these credentials securely - the secret cannot be retrieved later");
            }
        }
        SetupAction::Clean => {
            provider.clean_credentials_for_authenticated_app(app).await?;
            println!("revoked credentials of {}", app.name);
        }
        SetupAction::Delete => {
            provider.delete_authenticated_app(app).await?;
            println!("deleted {}", app.name);
        }
    }
    Ok(())
}
