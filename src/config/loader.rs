use std::{collections::HashMap, env, fs, path::PathBuf};

use super::app_config::{AppConfig, PartialAppConfig, CONFIG_DIR_NAME, CONFIG_FILE_NAME, ENV_PREFIX};
use crate::errors::ConfigError;

/// Configuration loader responsible for loading config from files and environment
pub struct ConfigLoader {
    base_path: Option<PathBuf>,
    file: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader with default paths
    pub fn new() -> Self {
        Self {
            base_path: None,
            file: None,
        }
    }

    /// Create a config loader with custom base path (for testing)
    pub fn with_base_path(base_path: PathBuf) -> Self {
        Self {
            base_path: Some(base_path),
            file: None,
        }
    }

    /// Load from an explicit file, which must exist
    pub fn with_file(file: PathBuf) -> Self {
        Self {
            base_path: None,
            file: Some(file),
        }
    }

    /// Load complete application configuration
    pub fn load_config(&self) -> Result<AppConfig, ConfigError> {
        let partial = match &self.file {
            Some(file) => Some(self.load_partial_config(file)?),
            None => {
                let path = self.config_path()?;
                if path.exists() {
                    Some(self.load_partial_config(&path)?)
                } else {
                    tracing::info!("No configuration file at {:?}, using defaults", path);
                    None
                }
            }
        };

        AppConfig::from_partial_and_env(partial, self.collect_env_vars())
    }

    /// Resolved default configuration file path
    pub fn config_path(&self) -> Result<PathBuf, ConfigError> {
        let base = match &self.base_path {
            Some(base_path) => base_path.clone(),
            None => dirs::config_dir().ok_or(ConfigError::NoConfigDir)?,
        };
        Ok(base.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    fn load_partial_config(&self, path: &PathBuf) -> Result<PartialAppConfig, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_string_lossy().to_string(), e))?;
        let partial = toml::from_str(&content)
            .map_err(|e| ConfigError::TomlParse(path.to_string_lossy().to_string(), e))?;
        tracing::debug!("Loaded configuration from {:?}", path);
        Ok(partial)
    }

    fn collect_env_vars(&self) -> HashMap<String, String> {
        env::vars()
            .filter(|(key, _)| key.starts_with(ENV_PREFIX))
            .collect()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
