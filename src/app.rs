// Application assembly: host providers, module boot, HTTP surface

use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::errors::AppError;
use crate::infrastructure::{
    MigrationReport, ModuleSource, Orchestrator, ProviderFactory, ServiceContainer,
};
use crate::modules;
use crate::web::{self, RouteTable};

/// A fully booted application, ready to serve.
pub struct Application {
    config: AppConfig,
    orchestrator: Orchestrator,
    routes: Arc<RouteTable>,
    report: MigrationReport,
}

impl Application {
    /// Boot the built-in module catalog.
    pub fn boot(config: AppConfig) -> Result<Self, AppError> {
        Self::boot_with(config, &modules::catalog())
    }

    /// Boot an arbitrary module source against a fresh container.
    pub fn boot_with(config: AppConfig, source: &dyn ModuleSource) -> Result<Self, AppError> {
        let container = ServiceContainer::new();
        ProviderFactory::new(config.clone()).register_default_providers(&container);

        let mut orchestrator = Orchestrator::new(container)
            .with_disabled(config.modules.disabled.iter().cloned())
            .with_seeding(config.database.seed);
        let mut table = RouteTable::new();
        let report = orchestrator.boot(source, &mut table)?;

        info!(
            modules = orchestrator.registry().len(),
            services = orchestrator.container().len(),
            routes = table.len(),
            "application booted"
        );

        Ok(Self {
            config,
            orchestrator,
            routes: Arc::new(table),
            report,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn container(&self) -> &ServiceContainer {
        self.orchestrator.container()
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn routes(&self) -> Arc<RouteTable> {
        Arc::clone(&self.routes)
    }

    pub fn migration_report(&self) -> &MigrationReport {
        &self.report
    }

    /// Serve HTTP on the configured address until Ctrl-C.
    pub async fn serve(&self) -> Result<(), AppError> {
        web::serve(self.routes(), self.config.server.bind).await?;
        Ok(())
    }
}
