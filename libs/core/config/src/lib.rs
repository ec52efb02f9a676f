//! Environment-driven configuration shared by the notification services.
//!
//! Every settings struct implements [`FromEnv`]; the helpers below keep the
//! "unset means default, malformed means error" rule in one place.

pub mod health;
pub mod redis;
pub mod tracing;

use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while reading settings from the environment
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },
}

/// Deployment environment, selected by `APP_ENV`.
///
/// Only decides how logs are rendered: JSON in production, pretty output
/// everywhere else.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// Anything other than `production` (any case) is development
    pub fn from_env() -> Self {
        match env::var("APP_ENV") {
            Ok(value) if value.trim().eq_ignore_ascii_case("production") => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        *self == Environment::Production
    }
}

/// Settings that can be loaded from environment variables
pub trait FromEnv: Sized {
    fn from_env() -> Result<Self, ConfigError>;
}

/// Read `key`, falling back to `default` when unset
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read `key`, failing when unset
pub fn env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Parse `key` into `T`, falling back to `default` when unset
pub fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::ParseError {
            key: key.to_string(),
            details: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_selection() {
        temp_env::with_var_unset("APP_ENV", || {
            assert_eq!(Environment::from_env(), Environment::Development);
        });

        for value in ["production", "PRODUCTION", " Production "] {
            temp_env::with_var("APP_ENV", Some(value), || {
                assert!(Environment::from_env().is_production());
            });
        }

        temp_env::with_var("APP_ENV", Some("staging"), || {
            assert!(!Environment::from_env().is_production());
        });
    }

    #[test]
    fn test_env_or_default() {
        temp_env::with_var("NOTIFY_TEST_VAR", Some("mailpit"), || {
            assert_eq!(env_or_default("NOTIFY_TEST_VAR", "localhost"), "mailpit");
        });
        temp_env::with_var_unset("NOTIFY_TEST_VAR", || {
            assert_eq!(env_or_default("NOTIFY_TEST_VAR", "localhost"), "localhost");
        });
    }

    #[test]
    fn test_env_required() {
        temp_env::with_var("NOTIFY_REQUIRED", Some("redis://cache:6379"), || {
            assert_eq!(env_required("NOTIFY_REQUIRED").unwrap(), "redis://cache:6379");
        });
        temp_env::with_var_unset("NOTIFY_REQUIRED", || {
            let err = env_required("NOTIFY_REQUIRED").unwrap_err();
            assert!(matches!(err, ConfigError::MissingEnvVar(ref key) if key == "NOTIFY_REQUIRED"));
            assert!(err.to_string().contains("required"));
        });
    }

    #[test]
    fn test_env_parse() {
        temp_env::with_var("PARSE_VAR", Some(" 42 "), || {
            assert_eq!(env_parse::<u32>("PARSE_VAR", 7).unwrap(), 42);
        });
        temp_env::with_var_unset("PARSE_VAR", || {
            assert_eq!(env_parse::<u32>("PARSE_VAR", 7).unwrap(), 7);
        });
        temp_env::with_var("PARSE_VAR", Some("many"), || {
            let err = env_parse::<u32>("PARSE_VAR", 7).unwrap_err();
            assert!(matches!(err, ConfigError::ParseError { ref key, .. } if key == "PARSE_VAR"));
        });
    }
}
