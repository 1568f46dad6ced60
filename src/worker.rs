//! # Job Worker
//!
//! Drains the job queue: dequeues, dispatches by job type, and applies the
//! retry/stop policy on failure. Multiple workers share one queue; the
//! dequeue protocol guarantees each job runs on at most one of them at a
//! time. On startup a worker releases stale running rows left behind by a
//! crashed predecessor.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{StoreError, SyncError};
use crate::models::job;
use crate::queue::{JobQueue, JobType, SyncPayload};
use crate::sync::SyncService;

/// Running rows with a lease older than this are treated as orphaned.
const STALE_JOB_THRESHOLD: Duration = Duration::from_secs(600);

/// Window a resync job re-ingests.
const RESYNC_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Error)]
enum JobError {
    #[error("unknown job type: {0}")]
    UnknownType(String),

    #[error("decoding job payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

pub struct Worker {
    id: usize,
    queue: Arc<JobQueue>,
    service: Arc<SyncService>,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl Worker {
    pub fn new(
        id: usize,
        queue: Arc<JobQueue>,
        service: Arc<SyncService>,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            queue,
            service,
            poll_interval,
            shutdown,
        }
    }

    /// Runs until the shutdown token fires. An empty queue (or a queue
    /// error) backs off for one poll interval before the next attempt.
    #[instrument(skip_all, fields(worker = self.id))]
    pub async fn run(self) {
        info!("Starting job worker");

        match self.queue.release_stale(STALE_JOB_THRESHOLD).await {
            Ok(0) => {}
            Ok(released) => warn!(released, "Rescued jobs from a crashed worker"),
            Err(err) => error!(error = ?err, "Failed to release stale jobs"),
        }

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            match self.process_next().await {
                // Processed a job; immediately look for the next one.
                Ok(true) => continue,
                Ok(false) => {}
                Err(err) => error!(error = ?err, "Failed to process job"),
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sleep(self.poll_interval) => {}
            }
        }

        info!("Job worker stopped");
    }

    /// Dequeues and runs one job. Returns whether a job was dispatched.
    pub(crate) async fn process_next(&self) -> Result<bool, StoreError> {
        let Some(job) = self.queue.dequeue().await? else {
            return Ok(false);
        };

        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            retry_count = job.retry_count,
            "Processing job"
        );

        match self.execute(&job).await {
            Ok(()) => {
                self.queue.complete(job.id).await?;
                counter!("worker_jobs_completed_total").increment(1);
                info!(job_id = %job.id, job_type = %job.job_type, "Job completed");
            }
            Err(err) => {
                warn!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    retry_count = job.retry_count,
                    error = %err,
                    "Job failed"
                );
                counter!("worker_jobs_failed_total").increment(1);

                let retry_count = self.queue.fail(job.id, &err.to_string()).await?;
                if retry_count >= job.max_retries {
                    warn!(
                        job_id = %job.id,
                        max_retries = job.max_retries,
                        "Job reached maximum retries, stopping"
                    );
                    self.queue
                        .stop(job.id, &format!("max retries reached: {err}"))
                        .await?;
                    counter!("worker_jobs_stopped_total").increment(1);
                }
            }
        }

        Ok(true)
    }

    async fn execute(&self, job: &job::Model) -> Result<(), JobError> {
        let job_type = JobType::parse(&job.job_type)
            .ok_or_else(|| JobError::UnknownType(job.job_type.clone()))?;

        match job_type {
            JobType::Sync => {
                let payload = self.sync_payload(job)?;
                // Full window: no lower bound on the fetch.
                self.service
                    .sync_repository(&payload.owner, &payload.repo, None)
                    .await?;
            }
            JobType::Resync => {
                let payload = self.sync_payload(job)?;
                let since = Utc::now() - chrono::Duration::days(RESYNC_WINDOW_DAYS);
                self.service
                    .sync_repository(&payload.owner, &payload.repo, Some(since))
                    .await?;
            }
            JobType::Cleanup => {
                // Reserved job type.
                debug!(job_id = %job.id, "Cleanup job is a no-op");
            }
        }

        Ok(())
    }

    fn sync_payload(&self, job: &job::Model) -> Result<SyncPayload, JobError> {
        let payload = job.payload.clone().unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(payload)?)
    }
}
