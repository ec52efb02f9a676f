use crate::{ConfigError, FromEnv, env_parse, env_required};

/// Redis configuration for the stream transport
#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub url: String,
    /// Partitions (streams) per topic
    pub partitions: u32,
    /// Approximate maximum entries kept per stream
    pub max_stream_length: i64,
}

impl RedisConfig {
    pub fn new(url: String) -> Self {
        Self {
            url,
            partitions: 1,
            max_stream_length: 100_000,
        }
    }
}

impl FromEnv for RedisConfig {
    /// Requires REDIS_URL to be set (no default).
    /// REDIS_STREAM_PARTITIONS defaults to 1, REDIS_STREAM_MAX_LEN to 100000.
    fn from_env() -> Result<Self, ConfigError> {
        let partitions: u32 = env_parse("REDIS_STREAM_PARTITIONS", 1)?;
        if partitions == 0 {
            return Err(ConfigError::ParseError {
                key: "REDIS_STREAM_PARTITIONS".to_string(),
                details: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            url: env_required("REDIS_URL")?,
            partitions,
            max_stream_length: env_parse("REDIS_STREAM_MAX_LEN", 100_000)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_config_from_env_success() {
        temp_env::with_vars(
            [
                ("REDIS_URL", Some("redis://localhost:6379")),
                ("REDIS_STREAM_PARTITIONS", None),
                ("REDIS_STREAM_MAX_LEN", None),
            ],
            || {
                let config = RedisConfig::from_env().unwrap();
                assert_eq!(config.url, "redis://localhost:6379");
                assert_eq!(config.partitions, 1);
                assert_eq!(config.max_stream_length, 100_000);
            },
        );
    }

    #[test]
    fn test_redis_config_from_env_missing() {
        temp_env::with_var_unset("REDIS_URL", || {
            let err = RedisConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("REDIS_URL"));
            assert!(err.to_string().contains("required"));
        });
    }

    #[test]
    fn test_redis_config_rejects_zero_partitions() {
        temp_env::with_vars(
            [
                ("REDIS_URL", Some("redis://localhost:6379")),
                ("REDIS_STREAM_PARTITIONS", Some("0")),
            ],
            || {
                let err = RedisConfig::from_env().unwrap_err();
                assert!(err.to_string().contains("REDIS_STREAM_PARTITIONS"));
            },
        );
    }

    #[test]
    fn test_redis_config_new() {
        let config = RedisConfig::new("redis://prod-host:6379".to_string());
        assert_eq!(config.url, "redis://prod-host:6379");
        assert_eq!(config.partitions, 1);
    }
}
