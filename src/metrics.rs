//! Secret expiry and reconcile failure metrics
//!
//! Metrics are recorded through an injected [`MetricsSink`]. The Prometheus
//! implementation registers its collectors on a caller-owned registry.

use chrono::{DateTime, Utc};
use prometheus::{GaugeVec, IntCounterVec, Opts, Registry};

/// Sink for engine metrics
pub trait MetricsSink: Send + Sync {
    /// Expiry of the secret behind a tenant's connector
    fn record_secret_expiry(&self, tenant: &str, connector: &str, end: DateTime<Utc>);

    /// A provider failed to reconcile a tenant
    fn record_reconcile_failure(&self, tenant: &str, connector: &str);
}

/// Sink that drops everything
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_secret_expiry(&self, _tenant: &str, _connector: &str, _end: DateTime<Utc>) {}

    fn record_reconcile_failure(&self, _tenant: &str, _connector: &str) {}
}

/// Prometheus collectors
pub struct PrometheusMetrics {
    secret_expiry: GaugeVec,
    reconcile_failures: IntCounterVec,
}

impl PrometheusMetrics {
    /// Create the collectors and register them on `registry`.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let secret_expiry = GaugeVec::new(
            Opts::new(
                "connector_engine_idp_secret_expiry_time",
                "Expiry of the identity provider secret behind a connector, unix seconds",
            ),
            &["tenant", "connector"],
        )?;
        let reconcile_failures = IntCounterVec::new(
            Opts::new(
                "connector_engine_reconcile_failures_total",
                "Failed provider reconciles per tenant",
            ),
            &["tenant", "connector"],
        )?;

        registry.register(Box::new(secret_expiry.clone()))?;
        registry.register(Box::new(reconcile_failures.clone()))?;

        Ok(Self {
            secret_expiry,
            reconcile_failures,
        })
    }
}

impl MetricsSink for PrometheusMetrics {
    fn record_secret_expiry(&self, tenant: &str, connector: &str, end: DateTime<Utc>) {
        self.secret_expiry
            .with_label_values(&[tenant, connector])
            .set(end.timestamp() as f64);
    }

    fn record_reconcile_failure(&self, tenant: &str, connector: &str) {
        self.reconcile_failures
            .with_label_values(&[tenant, connector])
            .inc();
    }
}
