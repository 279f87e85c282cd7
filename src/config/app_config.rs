use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use super::loader::ConfigLoader;
use crate::errors::ConfigError;

// Configuration location
pub const CONFIG_DIR_NAME: &str = "modhost";
pub const CONFIG_FILE_NAME: &str = "config.toml";

// Environment overrides
pub const ENV_PREFIX: &str = "MODHOST_";
pub const ENV_BIND: &str = "MODHOST_BIND";
pub const ENV_LOG: &str = "MODHOST_LOG";
pub const ENV_DATABASE: &str = "MODHOST_DATABASE";
pub const ENV_SEED: &str = "MODHOST_SEED";
pub const ENV_DISABLED_MODULES: &str = "MODHOST_DISABLED_MODULES";

const DEFAULT_BIND: &str = "127.0.0.1:8080";
const DEFAULT_DATABASE: &str = "modhost";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Main Application Configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub modules: ModulesConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub name: String,
    /// Run module seed tasks after migration
    pub seed: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModulesConfig {
    pub disabled: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    pub level: String,
}

/// Partial Application Configuration for loading from files
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialAppConfig {
    server: Option<PartialServerConfig>,
    database: Option<PartialDatabaseConfig>,
    modules: Option<PartialModulesConfig>,
    log: Option<PartialLogConfig>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialServerConfig {
    bind: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialDatabaseConfig {
    name: Option<String>,
    seed: Option<bool>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialModulesConfig {
    disabled: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialLogConfig {
    level: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default location and environment
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load_config()
    }

    /// Load configuration with custom base path (for testing)
    pub fn load_with_base_path(base_path: PathBuf) -> Result<Self, ConfigError> {
        ConfigLoader::with_base_path(base_path).load_config()
    }

    /// Merge file values with environment overrides; environment wins.
    pub fn from_partial_and_env(
        partial: Option<PartialAppConfig>,
        env_map: HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let partial = partial.unwrap_or_default();
        let server = partial.server.unwrap_or_default();
        let database = partial.database.unwrap_or_default();
        let modules = partial.modules.unwrap_or_default();
        let log = partial.log.unwrap_or_default();

        let bind = env_map
            .get(ENV_BIND)
            .cloned()
            .or(server.bind)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind.parse::<SocketAddr>().map_err(|e| ConfigError::InvalidValue {
            field: "server.bind",
            value: bind.clone(),
            reason: e.to_string(),
        })?;

        let seed = match env_map.get(ENV_SEED) {
            Some(raw) => parse_bool("database.seed", raw)?,
            None => database.seed.unwrap_or(true),
        };

        let disabled = match env_map.get(ENV_DISABLED_MODULES) {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
            None => modules.disabled.unwrap_or_default(),
        };

        let config = AppConfig {
            server: ServerConfig { bind },
            database: DatabaseConfig {
                name: env_map
                    .get(ENV_DATABASE)
                    .cloned()
                    .or(database.name)
                    .unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
                seed,
            },
            modules: ModulesConfig { disabled },
            log: LogConfig {
                level: env_map
                    .get(ENV_LOG)
                    .cloned()
                    .or(log.level)
                    .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "database.name",
                value: self.database.name.clone(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            },
            database: DatabaseConfig {
                name: DEFAULT_DATABASE.to_string(),
                seed: true,
            },
            modules: ModulesConfig::default(),
            log: LogConfig {
                level: DEFAULT_LOG_LEVEL.to_string(),
            },
        }
    }
}

fn parse_bool(field: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field,
            value: raw.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_without_file_or_env() {
        let config = AppConfig::from_partial_and_env(None, HashMap::new()).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_file_values_are_used() {
        let partial: PartialAppConfig = toml::from_str(
            r#"
            [server]
            bind = "0.0.0.0:9000"

            [database]
            seed = false

            [modules]
            disabled = ["todo"]
            "#,
        )
        .unwrap();

        let config = AppConfig::from_partial_and_env(Some(partial), HashMap::new()).unwrap();
        assert_eq!(config.server.bind.port(), 9000);
        assert!(!config.database.seed);
        assert_eq!(config.database.name, "modhost");
        assert_eq!(config.modules.disabled, vec!["todo"]);
    }

    #[test]
    fn test_env_overrides_file() {
        let partial: PartialAppConfig = toml::from_str(
            r#"
            [log]
            level = "warn"
            "#,
        )
        .unwrap();
        let env_map = env(&[
            (ENV_LOG, "debug"),
            (ENV_SEED, "off"),
            (ENV_DATABASE, "staging"),
            (ENV_DISABLED_MODULES, "health, todo,"),
        ]);

        let config = AppConfig::from_partial_and_env(Some(partial), env_map).unwrap();
        assert_eq!(config.log.level, "debug");
        assert!(!config.database.seed);
        assert_eq!(config.database.name, "staging");
        assert_eq!(config.modules.disabled, vec!["health", "todo"]);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = AppConfig::from_partial_and_env(None, env(&[(ENV_BIND, "localhost")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "server.bind", .. }));

        let err = AppConfig::from_partial_and_env(None, env(&[(ENV_SEED, "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "database.seed", .. }));

        let err = AppConfig::from_partial_and_env(None, env(&[(ENV_DATABASE, " ")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "database.name", .. }));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(toml::from_str::<PartialAppConfig>("[server]\nport = 1").is_err());
    }
}
