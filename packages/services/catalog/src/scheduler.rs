use tokio_cron_scheduler::{Job, JobScheduler};

use crate::models::ActorContext;
use crate::statistics::{RefreshOutcome, StatisticsAggregator};

/// Registers the periodic statistics refresh. The caller starts the scheduler.
pub async fn start_statistics_scheduler(
    scheduler: &JobScheduler,
    aggregator: StatisticsAggregator,
    cron: &str,
) -> anyhow::Result<()> {
    let job = Job::new_async(cron, move |_uuid, _l| {
        let aggregator = aggregator.clone();
        Box::pin(async move {
            run_scheduled_refresh(&aggregator).await;
        })
    })?;
    scheduler.add(job).await?;
    tracing::info!(cron = cron, "Statistics refresh scheduled");
    Ok(())
}

pub async fn run_scheduled_refresh(aggregator: &StatisticsAggregator) {
    tracing::debug!("Running scheduled statistics refresh");
    match aggregator.refresh(&ActorContext::anonymous()).await {
        Ok(RefreshOutcome::Fresh(snapshot)) => {
            tracing::info!(
                snapshot_id = %snapshot.id.map(|id| id.to_hex()).unwrap_or_default(),
                "Scheduled statistics refresh completed"
            );
        }
        Ok(RefreshOutcome::Stale { error, .. }) => {
            tracing::warn!(error = %error, "Scheduled statistics refresh failed; last snapshot kept");
        }
        Err(e) => {
            tracing::error!(error = %e, "Scheduled statistics refresh failed with no snapshot to fall back to");
        }
    }
}
