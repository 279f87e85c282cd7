//! Module abstraction and boot orchestration
//!
//! A boot walks every discovered module through the same phases in the same
//! order: discover, register (init + services), migrate, route.

use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::container::{BoxError, ContainerError, ServiceContainer};
use crate::persistence::{Database, MigrationError, Migrator, SchemaReport, SeedReport, Seeder};
use crate::web::Router;

/// Feature unit composed into the application.
///
/// Modules never reference each other; anything shared goes through the
/// container.
pub trait Module: Send + Sync {
    /// Unique module name
    fn name(&self) -> &str;

    /// Module-local setup, run before `register_services`.
    fn init(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Write this module's providers (and entities/seeds) into the container.
    fn register_services(&self, container: &ServiceContainer) -> anyhow::Result<()>;

    /// Resolve this module's controllers and bind them to `router`.
    fn routes(&self, router: &mut dyn Router, container: &ServiceContainer) -> anyhow::Result<()>;
}

/// Where modules are discovered from.
pub trait ModuleSource {
    /// Instantiate every module, in a stable order.
    fn load(&self) -> Vec<Box<dyn Module>>;
}

type ModuleFactory = Box<dyn Fn() -> Box<dyn Module> + Send + Sync>;

/// Explicit, ordered list of module factories.
#[derive(Default)]
pub struct ModuleCatalog {
    factories: Vec<ModuleFactory>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Module> + Send + Sync + 'static,
    {
        self.factories.push(Box::new(factory));
        self
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl ModuleSource for ModuleCatalog {
    fn load(&self) -> Vec<Box<dyn Module>> {
        self.factories.iter().map(|factory| factory()).collect()
    }
}

/// Boot phase of the whole application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootPhase {
    Created,
    Discovered,
    Registered,
    Migrated,
    /// All routes mounted; ready to serve
    Running,
    /// A phase failed; nothing further may run
    Failed,
}

impl fmt::Display for BootPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BootPhase::Created => "created",
            BootPhase::Discovered => "discovered",
            BootPhase::Registered => "registered",
            BootPhase::Migrated => "migrated",
            BootPhase::Running => "running",
            BootPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Per-module status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleStatus {
    Discovered,
    Initialized,
    Registered,
    Routed,
    /// Excluded by configuration
    Disabled,
    Failed,
}

/// Lifecycle hook a failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Init,
    RegisterServices,
    Routes,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hook::Init => f.write_str("init"),
            Hook::RegisterServices => f.write_str("register_services"),
            Hook::Routes => f.write_str("routes"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Duplicate module name '{0}'")]
    DuplicateModule(String),
    #[error("Module '{module}' failed in {hook}: {source}")]
    Lifecycle {
        module: String,
        hook: Hook,
        #[source]
        source: BoxError,
    },
    #[error("Cannot run {operation} while boot is {actual} (expected {expected})")]
    PhaseOrder {
        operation: &'static str,
        expected: BootPhase,
        actual: BootPhase,
    },
    #[error("Boot collaborator missing: {0}")]
    Container(#[from] ContainerError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
}

/// Discovered modules, unique by name, in discovery order.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Box<dyn Module>>,
    status: HashMap<String, ModuleStatus>,
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.modules.iter().map(|m| m.name()).collect::<Vec<_>>())
            .field("status", &self.status)
            .finish()
    }
}

impl ModuleRegistry {
    /// Build a registry, rejecting duplicate names before anything else runs.
    pub fn from_modules(modules: Vec<Box<dyn Module>>) -> Result<Self, ModuleError> {
        let mut seen = HashSet::new();
        for module in &modules {
            if !seen.insert(module.name().to_string()) {
                return Err(ModuleError::DuplicateModule(module.name().to_string()));
            }
        }
        let status = modules
            .iter()
            .map(|module| (module.name().to_string(), ModuleStatus::Discovered))
            .collect();
        Ok(Self { modules, status })
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(|module| module.name()).collect()
    }

    pub fn status(&self, name: &str) -> Option<ModuleStatus> {
        self.status.get(name).copied()
    }

    /// (name, status) in discovery order
    pub fn statuses(&self) -> Vec<(String, ModuleStatus)> {
        self.modules
            .iter()
            .map(|module| {
                let name = module.name().to_string();
                let status = self.status[&name];
                (name, status)
            })
            .collect()
    }

    fn set_status(&mut self, name: &str, status: ModuleStatus) {
        self.status.insert(name.to_string(), status);
    }

    fn is_active(&self, name: &str) -> bool {
        !matches!(
            self.status(name),
            Some(ModuleStatus::Disabled) | Some(ModuleStatus::Failed)
        )
    }
}

/// Result of the migration phase
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub schema: SchemaReport,
    /// `None` when seeding is disabled
    pub seeds: Option<SeedReport>,
}

/// Drives the boot sequence over a shared container.
///
/// `discover`, `register_all`, `migrate_all` and `route_all` must be called in
/// that order, once each; any failure leaves the orchestrator in
/// [`BootPhase::Failed`].
pub struct Orchestrator {
    container: ServiceContainer,
    registry: ModuleRegistry,
    phase: BootPhase,
    disabled: HashSet<String>,
    seed: bool,
}

impl Orchestrator {
    pub fn new(container: ServiceContainer) -> Self {
        Self {
            container,
            registry: ModuleRegistry::default(),
            phase: BootPhase::Created,
            disabled: HashSet::new(),
            seed: true,
        }
    }

    /// Modules to leave out of every phase after discovery.
    pub fn with_disabled<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_seeding(mut self, seed: bool) -> Self {
        self.seed = seed;
        self
    }

    pub fn container(&self) -> &ServiceContainer {
        &self.container
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn phase(&self) -> BootPhase {
        self.phase
    }

    fn enter(&self, operation: &'static str, expected: BootPhase) -> Result<(), ModuleError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(ModuleError::PhaseOrder {
                operation,
                expected,
                actual: self.phase,
            })
        }
    }

    fn fail(&mut self, err: ModuleError) -> ModuleError {
        error!(phase = %self.phase, error = %err, "boot aborted");
        self.phase = BootPhase::Failed;
        err
    }

    /// Instantiate every module from `source` and check names are unique.
    pub fn discover(&mut self, source: &dyn ModuleSource) -> Result<(), ModuleError> {
        self.enter("discover", BootPhase::Created)?;

        let registry = match ModuleRegistry::from_modules(source.load()) {
            Ok(registry) => registry,
            Err(err) => return Err(self.fail(err)),
        };
        self.registry = registry;

        for name in self.disabled.iter() {
            if self.registry.status(name).is_some() {
                warn!(module = %name, "module disabled by configuration");
                self.registry.set_status(name, ModuleStatus::Disabled);
            } else {
                warn!(module = %name, "disabled module was not discovered");
            }
        }

        info!(modules = ?self.registry.names(), "modules discovered");
        self.phase = BootPhase::Discovered;
        Ok(())
    }

    /// `init` then `register_services` for each module, in discovery order.
    pub fn register_all(&mut self) -> Result<(), ModuleError> {
        self.enter("register_all", BootPhase::Discovered)?;

        for index in 0..self.registry.modules.len() {
            let name = self.registry.modules[index].name().to_string();
            if !self.registry.is_active(&name) {
                continue;
            }

            if let Err(source) = self.registry.modules[index].init() {
                return Err(self.lifecycle_failure(&name, Hook::Init, source));
            }
            self.registry.set_status(&name, ModuleStatus::Initialized);
            debug!(module = %name, "module initialized");

            let before = self.container.len();
            if let Err(source) = self.registry.modules[index].register_services(&self.container) {
                return Err(self.lifecycle_failure(&name, Hook::RegisterServices, source));
            }
            self.registry.set_status(&name, ModuleStatus::Registered);
            info!(
                module = %name,
                services = self.container.len().saturating_sub(before),
                "module registered"
            );
        }

        self.phase = BootPhase::Registered;
        Ok(())
    }

    /// Synchronize every contributed schema, then run seed tasks.
    pub fn migrate_all(&mut self) -> Result<MigrationReport, ModuleError> {
        self.enter("migrate_all", BootPhase::Registered)?;

        let report = match self.run_migrations() {
            Ok(report) => report,
            Err(err) => return Err(self.fail(err)),
        };

        self.phase = BootPhase::Migrated;
        Ok(report)
    }

    fn run_migrations(&self) -> Result<MigrationReport, ModuleError> {
        let migrator = self.container.try_resolve::<Migrator>()?;
        let database = self.container.try_resolve::<Database>()?;

        let schema = migrator.migrate(&database)?;
        info!(
            created = schema.created.len(),
            altered = schema.altered.len(),
            unchanged = schema.unchanged.len(),
            "schema migration complete"
        );

        let seeds = if self.seed {
            let seeder = self.container.try_resolve::<Seeder>()?;
            let report = seeder.run_all(&self.container);
            if !report.failed.is_empty() {
                warn!(failed = report.failed.len(), "some seed tasks failed");
            }
            Some(report)
        } else {
            info!("seeding disabled");
            None
        };

        Ok(MigrationReport { schema, seeds })
    }

    /// Call `routes` for each module, in discovery order.
    pub fn route_all(&mut self, router: &mut dyn Router) -> Result<(), ModuleError> {
        self.enter("route_all", BootPhase::Migrated)?;

        for index in 0..self.registry.modules.len() {
            let name = self.registry.modules[index].name().to_string();
            if !self.registry.is_active(&name) {
                continue;
            }
            if let Err(source) = self.registry.modules[index].routes(router, &self.container) {
                return Err(self.lifecycle_failure(&name, Hook::Routes, source));
            }
            self.registry.set_status(&name, ModuleStatus::Routed);
            debug!(module = %name, "module routes mounted");
        }

        info!(modules = self.registry.len(), "application running");
        self.phase = BootPhase::Running;
        Ok(())
    }

    /// Run all four phases in order.
    pub fn boot(
        &mut self,
        source: &dyn ModuleSource,
        router: &mut dyn Router,
    ) -> Result<MigrationReport, ModuleError> {
        self.discover(source)?;
        self.register_all()?;
        let report = self.migrate_all()?;
        self.route_all(router)?;
        Ok(report)
    }

    fn lifecycle_failure(&mut self, name: &str, hook: Hook, source: anyhow::Error) -> ModuleError {
        self.registry.set_status(name, ModuleStatus::Failed);
        self.fail(ModuleError::Lifecycle {
            module: name.to_string(),
            hook,
            source: source.into(),
        })
    }
}
