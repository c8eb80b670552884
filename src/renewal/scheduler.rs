//! Renewal scheduler
//!
//! Runs the self-renewal pass on a cron schedule. One scheduler per process;
//! overlapping ticks queue on the manager's pass lock.

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};

use super::SelfRenewal;
use crate::config::RenewalConfig;

/// Manages the scheduled self-renewal job.
pub struct RenewalScheduler {
    scheduler: JobScheduler,
}

impl RenewalScheduler {
    /// Build and start the scheduler from config.
    ///
    /// Each tick runs one pass. Pass errors are logged; the next tick retries.
    pub async fn start(
        config: &RenewalConfig,
        renewal: Arc<SelfRenewal>,
    ) -> Result<Self, anyhow::Error> {
        let scheduler = JobScheduler::new().await?;

        let job = Job::new_async(config.schedule.as_str(), move |_uuid, _lock| {
            let renewal = Arc::clone(&renewal);

            Box::pin(async move {
                tracing::info!("starting service credential renewal");

                match renewal.run().await {
                    Ok(report) => {
                        tracing::info!(
                            rotated = report.rotated.len(),
                            up_to_date = report.up_to_date.len(),
                            skipped = report.skipped.len(),
                            "service credential renewal finished"
                        );
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "service credential renewal failed");
                    }
                }
            })
        })?;

        scheduler.add(job).await?;
        scheduler.start().await?;

        tracing::info!(schedule = %config.schedule, "scheduled service credential renewal");

        Ok(Self { scheduler })
    }

    /// Shut down the scheduler.
    pub async fn shutdown(mut self) -> Result<(), anyhow::Error> {
        self.scheduler.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::TenantAppConfig;
    use crate::events::LogRecorder;
    use crate::store::mock::MockCredentialStore;

    #[tokio::test]
    async fn test_invalid_schedule_is_rejected() {
        let renewal = Arc::new(SelfRenewal::new(
            Vec::new(),
            Arc::new(MockCredentialStore::new()),
            Arc::new(LogRecorder),
            TenantAppConfig::new("dex-operator", "https://dex/callback"),
        ));
        let config = RenewalConfig {
            enabled: true,
            schedule: "every full moon".into(),
            ..Default::default()
        };

        assert!(RenewalScheduler::start(&config, renewal).await.is_err());
    }
}
