use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::Duration;

fn default_enabled() -> bool {
    true
}

fn default_interval() -> u64 {
    10
}

fn default_timeout() -> u64 {
    2
}

fn default_path() -> String {
    "/health".to_string()
}

fn default_unhealthy_threshold() -> u32 {
    3
}

fn default_healthy_threshold() -> u32 {
    2
}

/// Health probe configuration
///
/// `interval` and `timeout` accept either a bare integer or a string with a
/// trailing `s` suffix; both denote seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_interval", deserialize_with = "seconds")]
    pub interval: u64,
    #[serde(default = "default_timeout", deserialize_with = "seconds")]
    pub timeout: u64,
    /// HTTP path probed on each backend
    #[serde(default = "default_path")]
    pub path: String,
    /// Consecutive failures before marking a backend unavailable
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
    /// Consecutive successes before marking a backend available again
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_interval(),
            timeout: default_timeout(),
            path: default_path(),
            unhealthy_threshold: default_unhealthy_threshold(),
            healthy_threshold: default_healthy_threshold(),
        }
    }
}

impl HealthCheckConfig {
    pub fn collect_errors(&self, errors: &mut Vec<String>) {
        if self.interval == 0 {
            errors.push("Health check interval must be greater than 0".to_string());
        }
        if self.timeout == 0 {
            errors.push("Health check timeout must be greater than 0".to_string());
        }
        if self.path.is_empty() {
            errors.push("Health check path is required".to_string());
        }
        if self.unhealthy_threshold == 0 {
            errors.push("Health check unhealthy_threshold must be greater than 0".to_string());
        }
        if self.healthy_threshold == 0 {
            errors.push("Health check healthy_threshold must be greater than 0".to_string());
        }
    }

    pub fn interval_duration(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Deserialize a seconds value from `10`, `"10"`, or `"10s"`
fn seconds<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    struct SecondsVisitor;

    impl<'de> Visitor<'de> for SecondsVisitor {
        type Value = u64;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a number of seconds or a string like \"10s\"")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<u64, E> {
            Ok(value)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<u64, E> {
            u64::try_from(value)
                .map_err(|_| E::custom(format!("negative duration: {}", value)))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<u64, E> {
            let digits = value.strip_suffix('s').unwrap_or(value).trim();
            digits
                .parse::<u64>()
                .map_err(|_| E::custom(format!("invalid duration: {:?}", value)))
        }
    }

    deserializer.deserialize_any(SecondsVisitor)
}
