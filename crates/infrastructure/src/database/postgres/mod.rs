mod schema;
pub mod postgres_association_repository;
pub mod postgres_reference_repository;
pub mod postgres_schedule_repository;

pub(crate) use schema::MIGRATIONS;
pub use postgres_association_repository::PostgresAssociationRepository;
pub use postgres_reference_repository::PostgresReferenceRepository;
pub use postgres_schedule_repository::PostgresScheduleRepository;
