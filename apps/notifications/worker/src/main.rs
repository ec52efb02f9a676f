//! Notifications Worker - Entry Point
//!
//! Consumes notification topics from Redis Streams and sends emails.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    notifications_worker::run().await
}
