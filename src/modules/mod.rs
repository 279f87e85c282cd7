//! Built-in feature modules

pub mod health;
pub mod todo;

use crate::infrastructure::ModuleCatalog;

/// Modules shipped with the host, in boot order.
pub fn catalog() -> ModuleCatalog {
    ModuleCatalog::new()
        .with(|| Box::new(health::HealthModule::new()))
        .with(|| Box::new(todo::TodoModule::new()))
}
