use serde::{Deserialize, Serialize};

fn default_weight() -> u32 {
    1
}

/// Configuration for a single backend origin
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Hostname or IP address of the backend server
    pub host: String,
    /// Port the backend listens on
    pub port: u16,
    /// Weight for weighted load balancing (higher = more traffic)
    #[serde(default = "default_weight")]
    pub weight: u32,
}

impl BackendConfig {
    pub fn collect_errors(&self, index: usize, errors: &mut Vec<String>) {
        if self.host.is_empty() {
            errors.push(format!("Backend {}: host is required", index));
        }
        if self.port == 0 {
            errors.push(format!("Backend {}: port must be between 1 and 65535", index));
        }
        if self.weight < 1 {
            errors.push(format!("Backend {}: weight must be at least 1", index));
        }
    }
}
