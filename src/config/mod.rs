pub mod app_config;
pub mod loader;

// Re-export commonly used types
pub use app_config::{AppConfig, DatabaseConfig, LogConfig, ModulesConfig, PartialAppConfig, ServerConfig};
pub use loader::ConfigLoader;

// Re-export constants
pub use app_config::{
    CONFIG_DIR_NAME, CONFIG_FILE_NAME, ENV_BIND, ENV_DATABASE, ENV_DISABLED_MODULES, ENV_LOG,
    ENV_SEED,
};
