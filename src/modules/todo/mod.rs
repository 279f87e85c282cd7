//! Todo list: entity, repository, service and REST controller.

pub mod controller;
pub mod model;
pub mod service;

use std::sync::Arc;

pub use controller::TodoController;
pub use model::{NewTodo, Todo, TodoPatch};
pub use service::{TodoError, TodoService, MAX_TITLE_LEN};

use crate::infrastructure::{Module, ServiceContainer, ServiceLifetime};
use crate::persistence::{Database, Migrator, Repository, Seeder, TableRepository};
use crate::web::{Router, RouterExt};

pub const MODULE_NAME: &str = "todo";
pub const WELCOME_TITLE: &str = "Welcome to modhost";

#[derive(Debug, Default)]
pub struct TodoModule;

impl TodoModule {
    pub fn new() -> Self {
        Self
    }
}

impl Module for TodoModule {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn register_services(&self, container: &ServiceContainer) -> anyhow::Result<()> {
        container.register(ServiceLifetime::Singleton, |c| {
            c.try_resolve::<Database>().map(TableRepository::<Todo>::new)
        });
        container.register(ServiceLifetime::Singleton, |c| {
            c.try_resolve::<TableRepository<Todo>>().map(|repo| {
                let repo: Arc<dyn Repository<Todo>> = repo;
                TodoService::new(repo)
            })
        });
        container.register(ServiceLifetime::Transient, |c| {
            c.try_resolve::<TodoService>().map(TodoController::new)
        });

        container.try_resolve::<Migrator>()?.register::<Todo>(MODULE_NAME);
        container
            .try_resolve::<Seeder>()?
            .add(MODULE_NAME, "welcome", seed_welcome);
        Ok(())
    }

    fn routes(&self, router: &mut dyn Router, container: &ServiceContainer) -> anyhow::Result<()> {
        let controller = container.try_resolve::<TodoController>()?;
        let mut api = router.nest("/api/todos");

        let c = Arc::clone(&controller);
        api.get("/", move |request| c.list(&request))?;
        let c = Arc::clone(&controller);
        api.post("/", move |request| c.create(&request))?;
        let c = Arc::clone(&controller);
        api.get("/:id", move |request| c.show(&request))?;
        let c = Arc::clone(&controller);
        api.put("/:id", move |request| c.update(&request))?;
        let c = Arc::clone(&controller);
        api.delete("/:id", move |request| c.destroy(&request))?;
        let c = controller;
        api.post("/:id/complete", move |request| c.complete(&request))?;
        Ok(())
    }
}

/// Insert a starter todo into an empty table.
fn seed_welcome(container: &ServiceContainer) -> anyhow::Result<()> {
    let service = container.try_resolve::<TodoService>()?;
    if service.count()? == 0 {
        service.create(NewTodo {
            title: WELCOME_TITLE.to_string(),
            notes: Some("Seeded on first boot".to_string()),
        })?;
    }
    Ok(())
}
