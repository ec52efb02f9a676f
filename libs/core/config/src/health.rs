use crate::{ConfigError, FromEnv, env_or_default, env_parse};
use std::net::Ipv4Addr;

/// Health/metrics server configuration for background workers
#[derive(Clone, Debug)]
pub struct HealthServerConfig {
    pub host: String,
    pub port: u16,
}

impl HealthServerConfig {
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromEnv for HealthServerConfig {
    /// Reads from environment variables with sensible defaults:
    /// - HEALTH_HOST: defaults to Ipv4Addr::UNSPECIFIED (0.0.0.0 - all interfaces)
    /// - HEALTH_PORT: defaults to 8081
    fn from_env() -> Result<Self, ConfigError> {
        let host = env_or_default("HEALTH_HOST", &Ipv4Addr::UNSPECIFIED.to_string());
        let port = env_parse("HEALTH_PORT", 8081)?;

        Ok(Self { host, port })
    }
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::UNSPECIFIED.to_string(),
            port: 8081,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_config_from_env_with_defaults() {
        temp_env::with_vars(
            [("HEALTH_HOST", None::<&str>), ("HEALTH_PORT", None::<&str>)],
            || {
                let config = HealthServerConfig::from_env().unwrap();
                assert_eq!(config.host, "0.0.0.0");
                assert_eq!(config.port, 8081);
                assert_eq!(config.address(), "0.0.0.0:8081");
            },
        );
    }

    #[test]
    fn test_health_config_from_env_with_custom_values() {
        temp_env::with_vars(
            [("HEALTH_HOST", Some("127.0.0.1")), ("HEALTH_PORT", Some("9100"))],
            || {
                let config = HealthServerConfig::from_env().unwrap();
                assert_eq!(config.address(), "127.0.0.1:9100");
            },
        );
    }

    #[test]
    fn test_health_config_from_env_port_out_of_range() {
        temp_env::with_var("HEALTH_PORT", Some("99999"), || {
            let err = HealthServerConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("HEALTH_PORT"));
        });
    }

    #[test]
    fn test_health_config_default() {
        let config = HealthServerConfig::default();
        assert_eq!(config.host, Ipv4Addr::UNSPECIFIED.to_string());
        assert_eq!(config.port, 8081);
    }
}
