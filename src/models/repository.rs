//! Repository entity model
//!
//! One row per mirrored GitHub repository. Identity is twofold: the upstream
//! numeric github_id and the canonical `owner/name` full_name, both unique.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "repositories")]
pub struct Model {
    /// Local primary key; commits reference this, not the github_id.
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Upstream numeric identifier, globally unique on GitHub.
    #[sea_orm(unique)]
    pub github_id: i64,

    /// Short repository name (the part after the slash).
    pub name: String,

    /// Canonical `owner/name` identity.
    #[sea_orm(unique)]
    pub full_name: String,

    pub description: Option<String>,

    /// Canonical HTML URL on GitHub.
    pub url: String,

    pub language: Option<String>,

    pub forks_count: i32,
    pub stars_count: i32,
    pub open_issues_count: i32,
    pub watchers_count: i32,

    /// Upstream creation timestamp.
    pub created_at: DateTimeWithTimeZone,

    /// Upstream last-update timestamp.
    pub updated_at: DateTimeWithTimeZone,

    /// When any sync last attempted to fetch commits for this repository.
    pub last_commit_check: Option<DateTimeWithTimeZone>,

    /// Lower bound of the last successful commit fetch window.
    pub commits_since: Option<DateTimeWithTimeZone>,

    pub created_at_local: DateTimeWithTimeZone,
    pub updated_at_local: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::commit::Entity")]
    Commit,
}

impl Related<super::commit::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Commit.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
