pub mod app;
pub mod args;
pub mod config;
pub mod errors;
pub mod infrastructure;
pub mod modules;
pub mod persistence;
pub mod web;

// Re-export commonly used items for convenience
pub use app::Application;
pub use config::AppConfig;
pub use errors::AppError;
pub use infrastructure::{Module, Orchestrator, ServiceContainer, ServiceLifetime};
