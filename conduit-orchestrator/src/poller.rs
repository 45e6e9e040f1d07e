//! Status poller
//!
//! Periodically syncs every non-terminal run with its backend. Each run is
//! synced in its own task, at most `max_parallel` at a time.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};

use crate::error::ServiceResult;
use crate::service::PipelineService;

pub struct StatusPoller {
    service: Arc<PipelineService>,
    interval: Duration,
    semaphore: Arc<Semaphore>,
}

impl StatusPoller {
    pub fn new(service: Arc<PipelineService>, interval: Duration, max_parallel: usize) -> Self {
        Self {
            service,
            interval,
            semaphore: Arc::new(Semaphore::new(max_parallel.max(1))),
        }
    }

    /// Runs the polling loop on a background task
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Starts the polling loop
    pub async fn run(&self) {
        info!("Starting status poller (interval: {:?})", self.interval);

        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            match self.poll_once().await {
                Ok(synced) if synced > 0 => debug!("Synced {} run(s) this cycle", synced),
                Ok(_) => {}
                Err(e) => error!("Error during poll cycle: {}", e),
            }
        }
    }

    /// Syncs every active run once; returns how many syncs succeeded
    pub async fn poll_once(&self) -> ServiceResult<usize> {
        let runs = self.service.active_runs().await?;
        if runs.is_empty() {
            return Ok(0);
        }

        debug!("Found {} active run(s) to sync", runs.len());

        let mut tasks = JoinSet::new();
        for run in runs {
            let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
                break;
            };
            let service = Arc::clone(&self.service);
            tasks.spawn(async move {
                let _permit = permit;
                match service.sync_pipeline(run.id).await {
                    Ok(_) => true,
                    Err(e) => {
                        warn!("Failed to sync run {}: {}", run.id, e);
                        false
                    }
                }
            });
        }

        let mut synced = 0;
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(true) => synced += 1,
                Ok(false) => {}
                Err(e) => warn!("Sync task panicked: {}", e),
            }
        }
        Ok(synced)
    }
}
