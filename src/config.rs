use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::broker::BrokerSettings;
use crate::model::{Application, ApplicationMapping};

pub const CONFIG_FILE_STEM: &str = "application-broker";
pub const ENV_PREFIX: &str = "APP_BROKER";

/// Main configuration structure for the application broker
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BrokerConfig {
    /// Workflow settings
    pub broker: BrokerSection,
    /// Where instances and operations are kept
    pub storage: StorageConfig,
    /// Logging settings
    pub observability: ObservabilityConfig,
    /// Applications known at startup
    #[serde(default)]
    pub applications: Vec<Application>,
    /// Namespace grants known at startup
    #[serde(default)]
    pub mappings: Vec<ApplicationMapping>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BrokerSection {
    /// Plans are API packages; several instances per class are allowed
    pub api_packages_support: bool,
    /// How long provisioning waits for the application mapping
    pub mapping_max_wait_seconds: u64,
    /// How long shutdown waits for background work
    pub shutdown_timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    File,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// JSON document used by the file backend
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Default filter when RUST_LOG is not set
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker: BrokerSection {
                api_packages_support: false,
                mapping_max_wait_seconds: 60,
                shutdown_timeout_seconds: 30,
            },
            storage: StorageConfig {
                backend: StorageBackend::File,
                path: ".application-broker/state.json".to_string(),
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                log_format: LogFormat::Json,
            },
            applications: Vec::new(),
            mappings: Vec::new(),
        }
    }
}

impl BrokerConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (application-broker.toml)
    /// 3. Environment variables (APP_BROKER__SECTION__KEY)
    pub fn load() -> Result<Self> {
        let default_file = format!("{CONFIG_FILE_STEM}.toml");
        if Path::new(&default_file).exists() {
            Self::load_from(Some(Path::new(&default_file)))
        } else {
            Self::load_from(None)
        }
    }

    /// Same as [`BrokerConfig::load`] with an explicit file
    pub fn load_from(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(path) = file {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn settings(&self) -> BrokerSettings {
        BrokerSettings {
            api_packages_support: self.broker.api_packages_support,
            max_wait: Duration::from_secs(self.broker.mapping_max_wait_seconds),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.broker.shutdown_timeout_seconds)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_file() {
        let config = BrokerConfig::load_from(None).unwrap();
        assert_eq!(config.broker.mapping_max_wait_seconds, 60);
        assert_eq!(config.settings().max_wait, Duration::from_secs(60));
        assert_eq!(config.storage.backend, StorageBackend::File);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broker.toml");
        std::fs::write(
            &path,
            r#"
[broker]
api_packages_support = true
mapping_max_wait_seconds = 5
shutdown_timeout_seconds = 1

[storage]
backend = "memory"
path = "unused.json"

[observability]
log_level = "debug"
log_format = "pretty"

[[applications]]
name = "ec-prod"
description = "Commerce"

[[applications.services]]
id = "svc-1"
display_name = "Orders"
event_provider = true

[[mappings]]
application = "ec-prod"
namespace = "stage"
"#,
        )
        .unwrap();

        let config = BrokerConfig::load_from(Some(&path)).unwrap();
        assert!(config.settings().api_packages_support);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
        assert_eq!(config.applications[0].services[0].id.as_str(), "svc-1");
        assert!(!config.applications[0].services[0].api_provider);
        assert_eq!(config.mappings[0].namespace.as_str(), "stage");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("saved.toml");
        let config = BrokerConfig::default();
        config.save_to_file(&path).unwrap();

        let reloaded = BrokerConfig::load_from(Some(&path)).unwrap();
        assert_eq!(reloaded.broker, config.broker);
        assert_eq!(reloaded.storage, config.storage);
    }
}
