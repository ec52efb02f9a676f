//! Shared test utilities for the notification workspace
//!
//! This crate provides reusable test infrastructure:
//! - `TestRedis`: Redis container with automatic cleanup (feature: "redis")
//! - `TestDataBuilder`: Deterministic test data generation (always available)
//!
//! # Features
//!
//! - `redis`: Enables Redis test infrastructure
//! - `all`: Enables all container test infrastructure
//!
//! # Usage
//!
//! Add `features = ["redis"]` to your dev-dependencies:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { workspace = true, features = ["redis"] }
//! ```
//!
//! Then in your tests:
//!
//! ```rust,ignore
//! use test_utils::{TestDataBuilder, TestRedis};
//!
//! #[tokio::test]
//! #[ignore = "requires Docker"]
//! async fn my_redis_test() {
//!     let redis = TestRedis::new().await;
//!     let builder = TestDataBuilder::from_test_name("my_redis_test");
//!
//!     let topic = builder.topic("events");
//!     let transport = RedisTransport::open(redis.connection_string()).unwrap();
//! }
//! ```

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "redis")]
pub use redis::TestRedis;

/// Builder for test data with deterministic randomization
///
/// This ensures tests are reproducible by deriving every value from a seed.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    /// Create a new builder with a seed (for deterministic tests)
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (generates seed from test name hash)
    ///
    /// This is the recommended way to create a builder for consistent test data.
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_send_verification");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Recipient address unique to this builder
    pub fn email(&self, local: &str) -> String {
        format!("{}-{}@example.test", local, self.seed)
    }

    /// Username unique to this builder
    pub fn username(&self, base: &str) -> String {
        format!("{}_{}", base, self.seed % 10_000)
    }

    /// Four-digit verification code
    pub fn verification_code(&self) -> String {
        format!("{:04}", self.seed % 10_000)
    }

    /// Topic name that does not collide with other tests sharing a broker
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::new(12345);
    /// assert_eq!(builder.topic("events"), "test-events-12345");
    /// ```
    pub fn topic(&self, base: &str) -> String {
        format!("test-{}-{}", base, self.seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_builder_deterministic() {
        let builder1 = TestDataBuilder::new(42);
        let builder2 = TestDataBuilder::new(42);

        assert_eq!(builder1.email("alice"), builder2.email("alice"));
        assert_eq!(builder1.topic("events"), builder2.topic("events"));
        assert_eq!(builder1.verification_code(), "0042");
    }

    #[test]
    fn test_data_builder_from_name() {
        let builder1 = TestDataBuilder::from_test_name("my_test");
        let builder2 = TestDataBuilder::from_test_name("my_test");

        assert_eq!(builder1.username("bob"), builder2.username("bob"));
    }

    #[test]
    fn test_data_builder_different_names() {
        let builder1 = TestDataBuilder::from_test_name("test1");
        let builder2 = TestDataBuilder::from_test_name("test2");

        // Different test names should generate different data
        assert_ne!(builder1.email("a"), builder2.email("a"));
    }
}
