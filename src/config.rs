//! WolfMembership Configuration
//!
//! Configuration consumed by the membership table and the gateway
//! list provider: where the membership file lives and which cluster
//! the provider is scoped to.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::registry::DEFAULT_PROVIDER;

/// Main WolfMembership configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipConfig {
    /// Cluster scoping
    pub cluster: ClusterConfig,

    /// Backing store configuration
    pub storage: StorageConfig,

    /// Gateway discovery configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster identifier; every query is scoped to it
    pub cluster_id: String,
}

/// Backing store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Registered provider name
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Connection string used by silos (membership table)
    #[serde(default)]
    pub connection_string: String,

    /// Connection string used by clients (gateway list); defaults to `connection_string`
    #[serde(default)]
    pub client_connection_string: Option<String>,
}

/// Gateway discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// How long a fetched gateway list may be used before refreshing, in milliseconds
    #[serde(default = "default_refresh_period_ms")]
    pub refresh_period_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Connection settings handed to a single provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageOptions {
    pub connection_string: String,
}

impl StorageOptions {
    /// Validate the options for the named consumer
    pub fn validate(&self, consumer: &str) -> crate::Result<()> {
        if self.connection_string.trim().is_empty() {
            return Err(crate::Error::Config(format!(
                "invalid storage options for {}: connection_string is required",
                consumer
            )));
        }
        Ok(())
    }
}

// Default value functions
fn default_provider() -> String {
    DEFAULT_PROVIDER.to_string()
}

fn default_refresh_period_ms() -> u64 {
    60_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            refresh_period_ms: default_refresh_period_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl MembershipConfig {
    /// Build a configuration in code
    pub fn new(cluster_id: impl Into<String>, connection_string: impl Into<String>) -> Self {
        Self {
            cluster: ClusterConfig {
                cluster_id: cluster_id.into(),
            },
            storage: StorageConfig {
                provider: default_provider(),
                connection_string: connection_string.into(),
                client_connection_string: None,
            },
            gateway: GatewayConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: MembershipConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.cluster.cluster_id.trim().is_empty() {
            return Err(crate::Error::Config("cluster.cluster_id cannot be empty".into()));
        }

        if self.storage.provider.trim().is_empty() {
            return Err(crate::Error::Config("storage.provider cannot be empty".into()));
        }

        self.silo_options().validate("membership table")?;
        self.client_options().validate("gateway list provider")?;

        Ok(())
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster.cluster_id
    }

    /// Options for the silo-side membership table
    pub fn silo_options(&self) -> StorageOptions {
        StorageOptions {
            connection_string: self.storage.connection_string.clone(),
        }
    }

    /// Options for the client-side gateway list provider
    pub fn client_options(&self) -> StorageOptions {
        StorageOptions {
            connection_string: self
                .storage
                .client_connection_string
                .clone()
                .unwrap_or_else(|| self.storage.connection_string.clone()),
        }
    }

    /// Get the gateway refresh period as Duration
    pub fn gateway_refresh_period(&self) -> Duration {
        Duration::from_millis(self.gateway.refresh_period_ms)
    }
}
