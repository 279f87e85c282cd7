//! Schema migration and seed data, collected from modules during registration
//! and applied once by the host.

use anyhow::anyhow;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tracing::{info, warn};

use super::database::{Database, DatabaseError, SchemaChange};
use super::entity::{Entity, EntityDescriptor};
use crate::infrastructure::ServiceContainer;

#[derive(Debug, Error)]
#[error("Schema migration of '{table}' ({entity}, module '{module}') failed: {source}")]
pub struct MigrationError {
    pub module: String,
    pub entity: &'static str,
    pub table: String,
    #[source]
    pub source: DatabaseError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaReport {
    pub created: Vec<String>,
    pub altered: Vec<String>,
    pub unchanged: Vec<String>,
}

/// Collects entity descriptors and synchronizes them into a [`Database`].
#[derive(Default)]
pub struct Migrator {
    descriptors: Mutex<Vec<EntityDescriptor>>,
}

impl Migrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<E: Entity>(&self, module: &str) {
        self.add(EntityDescriptor::of::<E>(module));
    }

    pub fn add(&self, descriptor: EntityDescriptor) {
        self.descriptors.lock().push(descriptor);
    }

    pub fn descriptors(&self) -> Vec<EntityDescriptor> {
        self.descriptors.lock().clone()
    }

    /// Apply every collected descriptor in registration order.
    ///
    /// Stops at the first schema error; tables synchronized before it stay.
    pub fn migrate(&self, db: &Database) -> Result<SchemaReport, MigrationError> {
        let descriptors = self.descriptors();
        let mut report = SchemaReport::default();

        for descriptor in &descriptors {
            let table = descriptor.schema.table.clone();
            let change = db
                .sync_schema(&descriptor.schema)
                .map_err(|source| MigrationError {
                    module: descriptor.module.clone(),
                    entity: descriptor.entity,
                    table: table.clone(),
                    source,
                })?;
            info!(module = %descriptor.module, %table, ?change, "schema synchronized");
            match change {
                SchemaChange::Created => report.created.push(table),
                SchemaChange::Altered { .. } => report.altered.push(table),
                SchemaChange::Unchanged => report.unchanged.push(table),
            }
        }
        Ok(report)
    }
}

type SeedFn = Box<dyn Fn(&ServiceContainer) -> anyhow::Result<()> + Send + Sync>;

pub struct SeedTask {
    pub module: String,
    pub name: String,
    run: SeedFn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedFailure {
    pub module: String,
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<SeedFailure>,
}

/// Collects seed tasks; failures are non-fatal.
#[derive(Default)]
pub struct Seeder {
    tasks: Mutex<Vec<SeedTask>>,
}

impl Seeder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&self, module: &str, name: &str, task: F)
    where
        F: Fn(&ServiceContainer) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.tasks.lock().push(SeedTask {
            module: module.to_string(),
            name: name.to_string(),
            run: Box::new(task),
        });
    }

    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Run and drain every pending task in registration order.
    pub fn run_all(&self, container: &ServiceContainer) -> SeedReport {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let mut report = SeedReport::default();

        for task in tasks {
            let label = format!("{}/{}", task.module, task.name);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (task.run)(container)))
                .unwrap_or_else(|payload| Err(anyhow!("panicked: {}", panic_message(&*payload))));
            match outcome {
                Ok(()) => {
                    info!(seed = %label, "seed task completed");
                    report.succeeded.push(label);
                }
                Err(err) => {
                    warn!(seed = %label, error = %err, "seed task failed, continuing");
                    report.failed.push(SeedFailure {
                        module: task.module,
                        name: task.name,
                        error: format!("{:#}", err),
                    });
                }
            }
        }
        report
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
