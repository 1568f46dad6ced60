//! SeaORM entity models for the mirrored-data schema.

pub mod commit;
pub mod job;
pub mod monitored_repository;
pub mod repository;
