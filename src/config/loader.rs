//! Configuration loading
//!
//! Sources are layered with the `config` crate, later ones winning:
//!
//! 1. Built-in defaults (`#[serde(default)]` on every type)
//! 2. JSON configuration file
//! 3. Environment variables (`PROTOCOL_GATEWAY_*`, `__` between nested keys)
//!
//! Command-line overrides are applied on top by the binary.

use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use log::{debug, info};

use crate::config::defaults;
use crate::config::error::{ConfigError, Result};
use crate::config::types::GatewayConfig;
use crate::config::validator::validate_config;

impl GatewayConfig {
    /// Load configuration from an optional file plus the environment
    ///
    /// An explicitly named file must exist. Without one, `config.json` in the
    /// working directory is used if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::FileNotFound(path.to_path_buf()));
                }
                info!("Loading configuration from {}", path.display());
                builder = builder.add_source(File::from(path).format(FileFormat::Json).required(true));
            }
            None => {
                debug!("No configuration file given, trying {}", defaults::DEFAULT_CONFIG_FILE);
                builder = builder.add_source(
                    File::new(defaults::DEFAULT_CONFIG_FILE, FileFormat::Json).required(false),
                );
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(defaults::ENV_PREFIX)
                .prefix_separator("_")
                .separator(defaults::ENV_SEPARATOR)
                .try_parsing(true),
        );

        let config: GatewayConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Check the configuration for values the gateway cannot run with
    pub fn validate(&self) -> Result<()> {
        validate_config(self)
    }
}
