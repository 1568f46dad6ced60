//! # Job Queue
//!
//! Durable FIFO queue over the jobs relation. Dequeue claims the oldest
//! eligible row inside a single transaction using a row lock that skips
//! already-locked rows, so concurrent workers dispatch each job at most
//! once. The queue is the only site that mutates retry bookkeeping; the
//! worker decides policy (when to stop retrying), the queue records it.

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use rand::{Rng, thread_rng};
use sea_orm::sea_query::{Expr, LockBehavior, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::job::{ActiveModel, Column, Entity, Model};

pub const DEFAULT_MAX_RETRIES: i32 = 3;
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(3600);
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
pub const DEFAULT_JITTER_FACTOR: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Sync,
    Resync,
    Cleanup,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Sync => "sync",
            JobType::Resync => "resync",
            JobType::Cleanup => "cleanup",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "sync" => Some(JobType::Sync),
            "resync" => Some(JobType::Resync),
            "cleanup" => Some(JobType::Cleanup),
            _ => None,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Stopped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
            JobStatus::Stopped => "stopped",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "complete" => Some(JobStatus::Complete),
            "failed" => Some(JobStatus::Failed),
            "stopped" => Some(JobStatus::Stopped),
            _ => None,
        }
    }

    /// Terminal rows never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Stopped)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload for sync and resync jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPayload {
    pub owner: String,
    pub repo: String,
}

/// Parameters for [`JobQueue::enqueue`]; unset retry knobs take the
/// queue-wide defaults.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: JobType,
    pub payload: Option<JsonValue>,
    pub max_retries: Option<i32>,
    pub initial_backoff: Option<Duration>,
}

impl NewJob {
    pub fn new(job_type: JobType, payload: JsonValue) -> Self {
        Self {
            job_type,
            payload: Some(payload),
            max_retries: None,
            initial_backoff: None,
        }
    }
}

/// Post-failure delay: `initial × factor^prior_failures` plus uniform jitter
/// of up to `jitter_factor` of the base, capped at the queue-wide maximum.
pub fn backoff_with_jitter<R: Rng + ?Sized>(
    initial: Duration,
    prior_failures: i32,
    rng: &mut R,
) -> Duration {
    let base = initial.as_secs_f64() * DEFAULT_BACKOFF_FACTOR.powi(prior_failures.max(0));
    let jitter = rng.gen_range(0.0..1.0) * DEFAULT_JITTER_FACTOR * base;
    let capped = (base + jitter).min(DEFAULT_MAX_BACKOFF.as_secs_f64());
    Duration::from_secs_f64(capped)
}

fn effective_initial_backoff(nanos: i64) -> Duration {
    if nanos <= 0 {
        DEFAULT_INITIAL_BACKOFF
    } else {
        Duration::from_nanos(nanos as u64)
    }
}

/// Durable queue handle; cheap to clone per worker via `Arc`.
pub struct JobQueue {
    db: DatabaseConnection,
}

impl JobQueue {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn enqueue(&self, new_job: NewJob) -> Result<Model, StoreError> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let max_retries = new_job
            .max_retries
            .filter(|&m| m > 0)
            .unwrap_or(DEFAULT_MAX_RETRIES);
        let initial_backoff = new_job
            .initial_backoff
            .filter(|b| !b.is_zero())
            .unwrap_or(DEFAULT_INITIAL_BACKOFF);

        let model = ActiveModel {
            id: Set(id),
            job_type: Set(new_job.job_type.as_str().to_string()),
            status: Set(JobStatus::Pending.as_str().to_string()),
            payload: Set(new_job.payload),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            error: Set(None),
            schedule: Set(None),
            next_run_at: Set(None),
            retry_count: Set(0),
            max_retries: Set(max_retries),
            last_retry_at: Set(None),
            next_retry_at: Set(None),
            initial_backoff: Set(initial_backoff.as_nanos() as i64),
        };

        let job = model
            .insert(&self.db)
            .await
            .map_err(|e| StoreError::from_db("enqueue_job", e))?;

        info!(job_id = %job.id, job_type = %job.job_type, "Job enqueued");
        Ok(job)
    }

    /// Claims the oldest dispatchable job: pending rows FIFO by created_at,
    /// plus failed rows whose retry backoff has elapsed. Returns `None` when
    /// no work is available.
    pub async fn dequeue(&self) -> Result<Option<Model>, StoreError> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| StoreError::from_db("dequeue_job", e))?;

        let now = Utc::now();
        let eligible = Condition::any()
            .add(Column::Status.eq(JobStatus::Pending.as_str()))
            .add(
                Condition::all()
                    .add(Column::Status.eq(JobStatus::Failed.as_str()))
                    .add(Column::NextRetryAt.lte(now)),
            );

        let candidate = Entity::find()
            .filter(eligible)
            .order_by_asc(Column::CreatedAt)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .one(&txn)
            .await
            .map_err(|e| StoreError::from_db("dequeue_job", e))?;

        let Some(job) = candidate else {
            txn.rollback()
                .await
                .map_err(|e| StoreError::from_db("dequeue_job", e))?;
            return Ok(None);
        };

        let mut active: ActiveModel = job.into();
        active.status = Set(JobStatus::Running.as_str().to_string());
        active.updated_at = Set(now.into());
        let claimed = active
            .update(&txn)
            .await
            .map_err(|e| StoreError::from_db("dequeue_job", e))?;

        txn.commit()
            .await
            .map_err(|e| StoreError::from_db("dequeue_job", e))?;

        debug!(job_id = %claimed.id, job_type = %claimed.job_type, "Job dequeued");
        Ok(Some(claimed))
    }

    /// Marks a running job complete. Terminal rows are left untouched.
    pub async fn complete(&self, id: Uuid) -> Result<(), StoreError> {
        self.transition(id, JobStatus::Complete, None, "complete_job")
            .await
    }

    /// Records a failure: increments retry_count (this is the only site that
    /// does), stamps the retry timestamps from the backoff schedule, and
    /// flips the row to failed. Returns the new retry_count so the caller
    /// can decide whether to stop the job.
    pub async fn fail(&self, id: Uuid, error: &str) -> Result<i32, StoreError> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| StoreError::from_db("fail_job", e))?;

        let job = Entity::find_by_id(id)
            .lock(LockType::Update)
            .one(&txn)
            .await
            .map_err(|e| StoreError::from_db("fail_job", e))?
            .ok_or(StoreError::NotFound { op: "fail_job" })?;

        if JobStatus::parse(&job.status).is_some_and(|s| s.is_terminal()) {
            txn.rollback()
                .await
                .map_err(|e| StoreError::from_db("fail_job", e))?;
            return Err(StoreError::NotFound { op: "fail_job" });
        }

        let now = Utc::now();
        let initial = effective_initial_backoff(job.initial_backoff);
        let delay = backoff_with_jitter(initial, job.retry_count, &mut thread_rng());
        let next_retry =
            now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::hours(1));
        let new_count = job.retry_count + 1;

        let mut active: ActiveModel = job.into();
        active.status = Set(JobStatus::Failed.as_str().to_string());
        active.error = Set(Some(error.to_string()));
        active.retry_count = Set(new_count);
        active.last_retry_at = Set(Some(now.into()));
        active.next_retry_at = Set(Some(next_retry.into()));
        active.updated_at = Set(now.into());
        if new_count == 1 {
            // Pin the backoff base after the first failure so the rest of the
            // schedule is reproducible even if the defaults change.
            active.initial_backoff = Set(initial.as_nanos() as i64);
        }

        active
            .update(&txn)
            .await
            .map_err(|e| StoreError::from_db("fail_job", e))?;

        txn.commit()
            .await
            .map_err(|e| StoreError::from_db("fail_job", e))?;

        debug!(job_id = %id, retry_count = new_count, backoff_ms = delay.as_millis() as u64, "Job failed");
        Ok(new_count)
    }

    /// Terminal transition for a job that exhausted its retries.
    pub async fn stop(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        self.transition(id, JobStatus::Stopped, Some(error), "stop_job")
            .await
    }

    pub async fn get_status(&self, id: Uuid) -> Result<Option<JobStatus>, StoreError> {
        let job = Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(|e| StoreError::from_db("get_job_status", e))?;

        Ok(job.and_then(|j| JobStatus::parse(&j.status)))
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Option<Model>, StoreError> {
        Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(|e| StoreError::from_db("get_job", e))
    }

    /// All jobs, newest first.
    pub async fn get_jobs(&self) -> Result<Vec<Model>, StoreError> {
        Entity::find()
            .order_by_desc(Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(|e| StoreError::from_db("get_jobs", e))
    }

    /// Flips running rows whose lease went stale back to pending. Rescues
    /// jobs orphaned by a crashed worker; terminal rows are never touched.
    pub async fn release_stale(&self, older_than: Duration) -> Result<u64, StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::hours(1));

        let result = Entity::update_many()
            .col_expr(
                Column::Status,
                Expr::value(JobStatus::Pending.as_str()),
            )
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Status.eq(JobStatus::Running.as_str()))
            .filter(Column::UpdatedAt.lt(cutoff))
            .exec(&self.db)
            .await
            .map_err(|e| StoreError::from_db("release_stale_jobs", e))?;

        if result.rows_affected > 0 {
            info!(released = result.rows_affected, "Released stale running jobs");
        }
        Ok(result.rows_affected)
    }

    async fn transition(
        &self,
        id: Uuid,
        to: JobStatus,
        error: Option<&str>,
        op: &'static str,
    ) -> Result<(), StoreError> {
        let mut update = Entity::update_many()
            .col_expr(Column::Status, Expr::value(to.as_str()))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(id))
            // Terminal states are immutable.
            .filter(Column::Status.is_not_in([
                JobStatus::Complete.as_str(),
                JobStatus::Stopped.as_str(),
            ]));

        if let Some(error) = error {
            update = update.col_expr(Column::Error, Expr::value(error));
        }

        let result = update
            .exec(&self.db)
            .await
            .map_err(|e| StoreError::from_db(op, e))?;

        if result.rows_affected == 0 {
            return Err(StoreError::NotFound { op });
        }

        Ok(())
    }
}
