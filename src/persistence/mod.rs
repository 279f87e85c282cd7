//! Persistence collaborator: an opaque database handle, the generic repository
//! every module builds its service layer on, and the migrator/seeder pair modules
//! feed during registration.

pub mod database;
pub mod entity;
pub mod migrator;
pub mod repository;

pub use database::{Column, ColumnKind, Database, DatabaseError, SchemaChange, TableSchema};
pub use entity::{Entity, EntityDescriptor, Model};
pub use migrator::{MigrationError, Migrator, SchemaReport, SeedFailure, SeedReport, SeedTask, Seeder};
pub use repository::{Page, PageQuery, Repository, RepositoryError, TableRepository};
