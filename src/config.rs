use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// Port the HTTP/WebSocket listener binds to. The `PORT` environment
    /// variable takes precedence.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds allowed for in-flight teardown on shutdown.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Load config from a TOML file, falling back to defaults when no file
    /// is given or it doesn't exist. `PORT` overrides the configured port.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let content =
                    fs::read_to_string(path).context("Failed to read config file")?;
                toml::from_str(&content).context("Failed to parse config file")?
            }
            _ => Config::default(),
        };

        if let Ok(port) = env::var("PORT") {
            config.server.port = port.parse().context("Invalid PORT value")?;
        }

        Ok(config)
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.shutdown_grace_secs, 10);
        assert_eq!(config.server.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9000
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn test_load_missing_path_uses_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/vestibule.toml"))).unwrap();
        assert_eq!(config.server.bind_address(), "0.0.0.0:8080");
    }
}
