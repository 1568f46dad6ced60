//! MonitoredRepository entity model
//!
//! Rows in the set the monitor re-syncs on its own cadence. Removing a
//! repository from monitoring flips is_active; rows are never hard-deleted.

use std::time::Duration;

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "monitored_repositories")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(unique)]
    pub full_name: String,

    pub last_sync_time: DateTimeWithTimeZone,

    /// Sync cadence serialized as seconds with an `s` suffix, e.g. "3600s".
    pub sync_interval: String,

    pub is_active: bool,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Serializes a cadence for the sync_interval column; the inverse of
/// [`parse_interval`].
pub fn format_interval(interval: Duration) -> String {
    format!("{}s", interval.as_secs())
}

/// Parses a sync_interval column value. Accepts a bare second count or one
/// with the `s` suffix written by [`format_interval`].
pub fn parse_interval(raw: &str) -> Option<Duration> {
    let trimmed = raw.trim().trim_end_matches('s');
    trimmed.parse::<u64>().ok().map(Duration::from_secs)
}
