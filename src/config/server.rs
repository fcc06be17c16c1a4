use serde::{Deserialize, Serialize};

fn default_thread_pool_size() -> usize {
    100
}

/// Listener configuration for the load balancer itself
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host address to bind to (0.0.0.0 = all interfaces)
    pub host: String,
    /// Port the load balancer listens on
    pub port: u16,
    /// Worker pool size bounding concurrent client connections
    #[serde(default = "default_thread_pool_size")]
    pub thread_pool_size: usize,
}

impl ServerConfig {
    pub fn collect_errors(&self, errors: &mut Vec<String>) {
        if self.host.is_empty() {
            errors.push("Server host is required".to_string());
        }
        if self.port == 0 {
            errors.push("Server port must be between 1 and 65535".to_string());
        }
        if self.thread_pool_size == 0 {
            errors.push("Server thread_pool_size must be greater than 0".to_string());
        }
    }

    /// Listen address in `host:port` form
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pool_size() {
        let config: ServerConfig = serde_yaml::from_str("host: 0.0.0.0\nport: 8080").unwrap();
        assert_eq!(config.thread_pool_size, 100);
    }

    #[test]
    fn test_invalid_server_config() {
        let config = ServerConfig {
            host: String::new(),
            port: 0,
            thread_pool_size: 0,
        };
        let mut errors = Vec::new();
        config.collect_errors(&mut errors);
        assert_eq!(errors.len(), 3);
    }
}
