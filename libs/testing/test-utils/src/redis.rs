//! Redis test infrastructure
//!
//! Provides a `TestRedis` helper that starts a Redis container for stream
//! transport tests.

use redis::Client;
use redis::aio::MultiplexedConnection;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::redis::Redis;

/// Test Redis wrapper; the container is stopped and removed on drop.
///
/// # Example
///
/// ```no_run
/// use test_utils::TestRedis;
///
/// # async fn example() {
/// let redis = TestRedis::new().await;
/// let url = redis.connection_string();
/// // Build a RedisTransport from `url`
/// # }
/// ```
pub struct TestRedis {
    #[allow(dead_code)]
    container: ContainerAsync<Redis>,
    connection: MultiplexedConnection,
    pub connection_string: String,
}

impl TestRedis {
    /// Start a Redis 8 Alpine container and connect to it
    pub async fn new() -> Self {
        let container = Redis::default()
            .with_tag("8-alpine")
            .start()
            .await
            .expect("Failed to start Redis container");

        let host_port = container
            .get_host_port_ipv4(6379)
            .await
            .expect("Failed to get Redis port");

        let connection_string = format!("redis://127.0.0.1:{}", host_port);

        let client = Client::open(connection_string.clone())
            .expect("Failed to create Redis client");

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .expect("Failed to connect to Redis");

        tracing::info!(port = host_port, "Test Redis ready (Redis 8-alpine)");

        Self {
            container,
            connection,
            connection_string,
        }
    }

    /// Get a cloned connection for direct inspection
    pub fn connection(&self) -> MultiplexedConnection {
        self.connection.clone()
    }

    /// Get the connection string for transports under test
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Number of entries in a stream
    pub async fn stream_len(&self, stream: &str) -> i64 {
        let mut conn = self.connection();
        redis::cmd("XLEN")
            .arg(stream)
            .query_async(&mut conn)
            .await
            .expect("XLEN failed")
    }
}

impl Drop for TestRedis {
    fn drop(&mut self) {
        tracing::debug!("Cleaning up test Redis container");
    }
}
