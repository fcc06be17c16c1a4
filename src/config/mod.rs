//! Configuration management for the crossbar load balancer.
//!
//! The configuration is a YAML document describing the listener, the
//! selection policy, the backend origins, and the health probe settings.
//! Loading and validation are separate steps so the CLI can report every
//! problem in a file at once instead of failing on the first.

pub mod backends;
pub mod health;
pub mod logging;
pub mod server;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::info;

use crate::error::{CrossbarError, CrossbarResult};

pub use backends::BackendConfig;
pub use health::HealthCheckConfig;
pub use logging::{LogLevel, LoggingConfig};
pub use server::ServerConfig;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Listener settings (bind address, worker pool)
    pub server: ServerConfig,
    /// Backend selection policy
    #[serde(default)]
    pub algorithm: PolicyKind,
    /// Backend origins traffic is distributed across
    pub backends: Vec<BackendConfig>,
    /// Background health probe settings
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    /// Log level and optional file sink
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Selection policy names as they appear in the configuration file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    #[default]
    RoundRobin,
    LeastConnections,
    IpHash,
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyKind::RoundRobin => write!(f, "round-robin"),
            PolicyKind::LeastConnections => write!(f, "least-connections"),
            PolicyKind::IpHash => write!(f, "ip-hash"),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file without validating it
    pub async fn from_file<P: AsRef<Path>>(path: P) -> CrossbarResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            CrossbarError::config(format!("cannot read {}: {}", path.display(), e))
        })?;

        let config: Config = serde_yaml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load and validate in one step, failing with a combined message
    pub async fn load<P: AsRef<Path>>(path: P) -> CrossbarResult<Self> {
        let config = Self::from_file(path).await?;
        config
            .validate()
            .map_err(|errors| CrossbarError::config(errors.join("; ")))?;
        Ok(config)
    }

    /// Validate the whole configuration, collecting every error message
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        self.server.collect_errors(&mut errors);

        if self.backends.is_empty() {
            errors.push("At least one backend is required".to_string());
        }
        for (i, backend) in self.backends.iter().enumerate() {
            backend.collect_errors(i, &mut errors);
        }

        self.health_check.collect_errors(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
