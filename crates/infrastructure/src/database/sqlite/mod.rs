mod schema;
pub mod sqlite_association_repository;
pub mod sqlite_reference_repository;
pub mod sqlite_schedule_repository;

pub(crate) use schema::MIGRATIONS;
pub use sqlite_association_repository::SqliteAssociationRepository;
pub use sqlite_reference_repository::SqliteReferenceRepository;
pub use sqlite_schedule_repository::SqliteScheduleRepository;
