//! Commit entity model
//!
//! Identity is (repository_id, sha); the unique index enforces it and the
//! foreign key cascades deletes from the owning repository.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "commits")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub repository_id: i64,

    pub sha: String,

    pub message: String,

    pub author_name: String,
    pub author_email: String,
    pub author_date: DateTimeWithTimeZone,

    pub committer_name: String,
    pub committer_email: String,

    /// Committer date; commit listings order by this, newest first.
    pub commit_date: DateTimeWithTimeZone,

    pub url: String,

    pub created_at_local: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::repository::Entity",
        from = "Column::RepositoryId",
        to = "super::repository::Column::Id",
        on_delete = "Cascade"
    )]
    Repository,
}

impl Related<super::repository::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Repository.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
