//! Infrastructure layer
//!
//! - dependency injection container
//! - module contract and boot orchestration
//! - host service providers

pub mod container;
pub mod module;
pub mod provider;

pub use container::{
    BoxError, ContainerError, ContainerStats, ServiceContainer, ServiceKey, ServiceLifetime,
};
pub use module::{
    BootPhase, Hook, MigrationReport, Module, ModuleCatalog, ModuleError, ModuleRegistry,
    ModuleSource, ModuleStatus, Orchestrator,
};
pub use provider::ProviderFactory;
