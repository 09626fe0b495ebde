//! Scheduled discovery runs using tokio-cron-scheduler.
//!
//! When `[schedule].enabled` is set, `grants serve` starts one cron job that
//! runs discovery over `[discovery].default_sources`, notifying according to
//! `[schedule].send_notification`.

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::discovery::Pipeline;

pub async fn start_scheduler(pipeline: Pipeline) -> Result<JobScheduler> {
    let cron = pipeline.config.schedule.cron.clone();
    let send_notification = pipeline.config.schedule.send_notification;
    let scheduler = JobScheduler::new().await?;

    let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
        let pipeline = pipeline.clone();
        Box::pin(async move {
            let specs = pipeline.config.discovery.default_sources.clone();
            tracing::info!(sources = ?specs, "scheduled discovery run starting");
            match pipeline
                .run_discovery(&specs, send_notification)
                .await
            {
                Ok(run) => tracing::info!(
                    run_id = %run.id,
                    status = %run.status,
                    discovered = run.grants_discovered,
                    "scheduled discovery run finished"
                ),
                Err(e) => tracing::error!(error = %e, "scheduled discovery run failed"),
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    tracing::info!(cron = %cron, "discovery scheduler started");
    Ok(scheduler)
}
