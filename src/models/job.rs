//! Job entity model
//!
//! Durable queue rows. Status transitions are owned by the queue
//! (`crate::queue`); this entity is only the persisted shape.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// One of: sync, resync, cleanup.
    pub job_type: String,

    /// One of: pending, running, complete, failed, stopped.
    pub status: String,

    /// Opaque job payload; sync/resync carry `{"owner": .., "repo": ..}`.
    #[sea_orm(column_type = "JsonBinary")]
    pub payload: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,

    /// Display string of the most recent failure cause.
    pub error: Option<String>,

    /// Reserved cron expression for scheduled jobs.
    pub schedule: Option<String>,

    /// Reserved next-run timestamp for scheduled jobs.
    pub next_run_at: Option<DateTimeWithTimeZone>,

    /// Count of prior failures.
    pub retry_count: i32,

    pub max_retries: i32,

    pub last_retry_at: Option<DateTimeWithTimeZone>,

    /// When a failed row becomes eligible for re-dispatch.
    pub next_retry_at: Option<DateTimeWithTimeZone>,

    /// First-retry delay in nanoseconds; the backoff schedule scales from it.
    pub initial_backoff: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
