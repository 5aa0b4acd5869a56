//! Bridge configuration (kopi.toml)
//!
//! ```toml
//! local_frame_capacity = 32
//! fatal_policy = "panic"
//!
//! [callback]
//! failure_method = "onFailure"
//! success_method = "onSuccess"
//!
//! [gateway]
//! thread_name_prefix = "kopi-gateway"
//! stack_size = 2097152
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::FatalPolicy;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file
    #[error("Failed to read config: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config
    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    /// Validation error
    #[error("Invalid config: {0}")]
    ValidationError(String),
}

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Handles reserved by each scope's local frame
    pub local_frame_capacity: usize,

    /// Contract-violation behaviour
    pub fatal_policy: FatalPolicy,

    /// Async callback method names
    pub callback: CallbackConfig,

    /// Gateway worker threads
    pub gateway: GatewayConfig,
}

/// Names of the methods the gateway delivers results to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    /// Called as `<name>(Ldev/kopi/BridgeException;)V`
    pub failure_method: String,

    /// Called as `<name>(Ljava/lang/Object;)V`
    pub success_method: String,
}

/// Gateway worker settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Workers are named `<prefix>-<n>`
    pub thread_name_prefix: String,

    /// Worker stack size in bytes (platform default when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_size: Option<usize>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            local_frame_capacity: 32,
            fatal_policy: FatalPolicy::Panic,
            callback: CallbackConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            failure_method: "onFailure".to_string(),
            success_method: "onSuccess".to_string(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "kopi-gateway".to_string(),
            stack_size: None,
        }
    }
}

/// Smallest stack a gateway worker may be given
const MIN_STACK_SIZE: usize = 64 * 1024;

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

impl BridgeConfig {
    /// Parse a config from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a config from a string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Write to a file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Validate the config
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.local_frame_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "local_frame_capacity must be at least 1".to_string(),
            ));
        }

        for (key, name) in [
            ("callback.failure_method", &self.callback.failure_method),
            ("callback.success_method", &self.callback.success_method),
        ] {
            if !is_identifier(name) {
                return Err(ConfigError::ValidationError(format!(
                    "{} is not a valid method name: {:?}",
                    key, name
                )));
            }
        }

        if self.gateway.thread_name_prefix.is_empty() {
            return Err(ConfigError::ValidationError(
                "gateway.thread_name_prefix cannot be empty".to_string(),
            ));
        }

        if let Some(size) = self.gateway.stack_size {
            if size < MIN_STACK_SIZE {
                return Err(ConfigError::ValidationError(format!(
                    "gateway.stack_size must be at least {} bytes (got {})",
                    MIN_STACK_SIZE, size
                )));
            }
        }

        Ok(())
    }
}
