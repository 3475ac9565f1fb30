//! Configuration module
//!
//! This module handles gateway configuration: defaults, layered loading from
//! a JSON file and environment variables, and validation.

mod defaults;
mod error;
mod loader;
mod types;
mod validator;

pub use self::defaults::{DEFAULT_CONFIG_FILE, ENV_PREFIX, ENV_SEPARATOR, LOG_LEVEL_STR};
pub use self::error::ConfigError;
pub use self::types::{GatewayConfig, HttpConfig, UpstreamConfig};
pub use self::validator::validate_config;
