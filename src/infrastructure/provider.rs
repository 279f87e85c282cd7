//! Host collaborators every module may rely on

use super::container::ServiceContainer;
use crate::config::AppConfig;
use crate::persistence::{Database, Migrator, Seeder};
use tracing::debug;

/// Registers the host-owned services before any module runs.
pub struct ProviderFactory {
    config: AppConfig,
}

impl ProviderFactory {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Register configuration, database, migrator and seeder as singletons.
    pub fn register_default_providers(&self, container: &ServiceContainer) {
        container.provide_instance(self.config.clone());

        let database = self.config.database.name.clone();
        container.singleton(move |_| Database::in_memory(database.clone()));
        container.singleton(|_| Migrator::new());
        container.singleton(|_| Seeder::new());

        debug!(services = container.len(), "host providers registered");
    }
}
