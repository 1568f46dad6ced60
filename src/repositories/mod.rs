//! # Store operation surfaces
//!
//! Every persisted relation is reached through one of these modules. All
//! operations are generic over [`sea_orm::ConnectionTrait`] so callers can
//! scope a group of writes to a single transaction; absent rows come back as
//! `Ok(None)`, never as errors.

pub mod commit;
pub mod monitored;
pub mod repository;

pub use commit::{AuthorStats, CommitStore, NewCommit};
pub use monitored::MonitoredStore;
pub use repository::{NewRepository, RepositoryStore};
