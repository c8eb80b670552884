//! Tenant reconciliation
//!
//! One pass for one tenant runs every configured provider concurrently,
//! records secret expiry, and assembles the two-tier configuration. A failing
//! provider is reported but does not stop the others.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use crate::assembler::{self, Assembled, Configuration, ProviderResult};
use crate::connector::{OwnerTier, TenantAppConfig};
use crate::events::{EventRecorder, REASON_RECONCILE_FAILED};
use crate::metrics::MetricsSink;
use crate::provider::{Provider, ProviderError};
use crate::store::GatewayConfigStore;
use crate::EngineError;

/// Provider that failed during a pass
#[derive(Debug)]
pub struct ProviderFailure {
    /// Connector ID of the provider
    pub connector: String,
    pub error: ProviderError,
}

/// Outcome of one tenant pass
#[derive(Debug)]
pub struct TenantReport {
    pub tenant: String,
    pub assembled: Assembled,
    pub failures: Vec<ProviderFailure>,
}

/// Runs the configured providers for tenants
pub struct TenantReconciler {
    providers: Vec<Arc<dyn Provider>>,
    metrics: Arc<dyn MetricsSink>,
    events: Arc<dyn EventRecorder>,
}

fn provider_tier(provider: &dyn Provider) -> Result<OwnerTier, EngineError> {
    OwnerTier::from_owner(provider.owner()).ok_or_else(|| {
        EngineError::InvalidConfig(format!(
            "{}: unknown owner '{}'",
            provider.name(),
            provider.owner()
        ))
    })
}

impl TenantReconciler {
    pub fn new(
        providers: Vec<Arc<dyn Provider>>,
        metrics: Arc<dyn MetricsSink>,
        events: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            providers,
            metrics,
            events,
        }
    }

    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    /// Reconcile every provider for `tenant` against the previous configuration.
    #[instrument(skip_all, fields(tenant = %tenant.name))]
    pub async fn reconcile(
        &self,
        tenant: &TenantAppConfig,
        previous: &Configuration,
    ) -> Result<TenantReport, EngineError> {
        let passes = self.providers.iter().map(|provider| async move {
            let result = provider
                .create_or_update_app(tenant, previous.previous_connector(provider.name()))
                .await;
            (provider, result)
        });

        let mut results = Vec::with_capacity(self.providers.len());
        let mut failures = Vec::new();

        for (provider, result) in join_all(passes).await {
            let tier = provider_tier(provider.as_ref())?;
            match result {
                Ok(app) => {
                    self.metrics.record_secret_expiry(
                        &tenant.name,
                        provider.name(),
                        app.secret_end_date_time,
                    );
                    results.push(ProviderResult::succeeded(tier, app.connector));
                }
                Err(error) => {
                    warn!(
                        provider = %provider.name(),
                        error = %error,
                        "provider reconcile failed"
                    );
                    self.metrics
                        .record_reconcile_failure(&tenant.name, provider.name());
                    self.events.warning(
                        REASON_RECONCILE_FAILED,
                        &format!("{} for {}: {error}", provider.name(), tenant.name),
                    );
                    results.push(ProviderResult::failed(provider.name(), tier));
                    failures.push(ProviderFailure {
                        connector: provider.name().to_string(),
                        error,
                    });
                }
            }
        }

        let assembled = assembler::assemble(previous, &results)?;

        Ok(TenantReport {
            tenant: tenant.name.clone(),
            assembled,
            failures,
        })
    }

    /// Reconcile a tenant and write its configuration when it changed.
    pub async fn sync(
        &self,
        tenant: &TenantAppConfig,
        store: &dyn GatewayConfigStore,
    ) -> Result<TenantReport, EngineError> {
        let previous = store.load(&tenant.name).await?.unwrap_or_default();
        let report = self.reconcile(tenant, &previous).await?;

        if report.assembled.changed {
            store
                .save(&tenant.name, &report.assembled.configuration)
                .await?;
        } else {
            debug!(tenant = %tenant.name, "gateway configuration unchanged");
        }

        Ok(report)
    }

    /// Sync every tenant concurrently.
    pub async fn sync_all(
        &self,
        tenants: &[TenantAppConfig],
        store: &dyn GatewayConfigStore,
    ) -> Vec<(String, Result<TenantReport, EngineError>)> {
        let passes = tenants.iter().map(|tenant| async move {
            (tenant.name.clone(), self.sync(tenant, store).await)
        });
        let reports = join_all(passes).await;

        let failed = reports
            .iter()
            .filter(|(_, r)| r.as_ref().map_or(true, |r| !r.failures.is_empty()))
            .count();
        info!(tenants = reports.len(), failed, "reconcile pass finished");

        reports
    }

    /// Delete a tenant's applications at every provider.
    ///
    /// The stored configuration is only removed once every provider succeeded,
    /// so a retry still finds the previous connectors.
    #[instrument(skip_all, fields(tenant = %tenant))]
    pub async fn delete(
        &self,
        tenant: &str,
        store: &dyn GatewayConfigStore,
    ) -> Result<Vec<ProviderFailure>, EngineError> {
        let deletions = self.providers.iter().map(|provider| async move {
            (provider, provider.delete_app(tenant).await)
        });

        let failures: Vec<ProviderFailure> = join_all(deletions)
            .await
            .into_iter()
            .filter_map(|(provider, result)| {
                result.err().map(|error| {
                    warn!(provider = %provider.name(), error = %error, "provider delete failed");
                    ProviderFailure {
                        connector: provider.name().to_string(),
                        error,
                    }
                })
            })
            .collect();

        if failures.is_empty() {
            store.delete(tenant).await?;
            info!("deleted tenant");
        }

        Ok(failures)
    }
}
