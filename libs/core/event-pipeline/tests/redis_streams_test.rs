//! Integration tests for the Redis Streams transport
//!
//! These tests use real Redis via testcontainers to ensure:
//! - Consumer groups are created on first use and reused afterwards
//! - Entries are delivered in order and acknowledged
//! - Unacknowledged entries are redelivered to the same consumer name
//! - Entries left idle by a consumer that is gone are claimed by another one
//!
//! They need Docker: `cargo test -p event-pipeline -- --ignored`

use event_pipeline::transport::redis_streams::stream_key;
use event_pipeline::{
    ConsumerConfig, ConsumerManager, Envelope, HandlerRegistry, MessageHandler, PipelineError,
    Producer, RedisTransport, RetryPolicy, Transport,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use test_utils::{TestDataBuilder, TestRedis};

struct Collect {
    seen: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl MessageHandler for Collect {
    async fn handle(&self, envelope: &Envelope) -> Result<(), PipelineError> {
        let value: String = envelope.decode()?;
        self.seen.lock().unwrap().push(value);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Collect"
    }
}

fn config(consumer: &str) -> ConsumerConfig {
    ConsumerConfig::new("notifications")
        .with_consumer_id(consumer)
        .with_poll_interval(Duration::from_millis(20))
        .with_retry(RetryPolicy::new(3, Duration::from_millis(10)))
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not met within 10s");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_publish_and_consume_in_order() {
    let redis = TestRedis::new().await;
    let builder = TestDataBuilder::from_test_name("publish_and_consume");
    let topic = builder.topic("events");
    let email = builder.email("alice");

    let transport = RedisTransport::open(redis.connection_string()).unwrap();
    let producer = Producer::new(Arc::new(transport.publisher().await.unwrap()));

    // Published before the group exists: still delivered
    producer.send_json(&topic, email.as_str(), &"first").await.unwrap();

    let handler = Arc::new(Collect {
        seen: Mutex::new(Vec::new()),
    });
    let registry = HandlerRegistry::new()
        .with_handler(&topic, Arc::clone(&handler) as Arc<dyn MessageHandler>)
        .unwrap();
    let mut manager = ConsumerManager::new(Arc::new(transport.clone()), registry, config("c1"));
    manager.start().await.unwrap();

    producer.send_json(&topic, email.as_str(), &"second").await.unwrap();
    producer.send_json(&topic, email.as_str(), &"third").await.unwrap();

    wait_for(|| handler.seen.lock().unwrap().len() == 3).await;
    manager.stop().await.unwrap();

    assert_eq!(*handler.seen.lock().unwrap(), vec!["first", "second", "third"]);
    assert_eq!(redis.stream_len(&topic).await, 3);

    let mut conn = redis.connection();
    let pending: redis::streams::StreamPendingReply = redis::cmd("XPENDING")
        .arg(&topic)
        .arg("notifications")
        .query_async(&mut conn)
        .await
        .unwrap();
    assert_eq!(pending.count(), 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_unacknowledged_entry_is_redelivered() {
    let redis = TestRedis::new().await;
    let builder = TestDataBuilder::from_test_name("redelivery");
    let topic = builder.topic("email-verification");

    let transport = RedisTransport::open(redis.connection_string())
        .unwrap()
        .with_partitions(2);
    let producer = Producer::new(Arc::new(transport.publisher().await.unwrap()));
    let receipt = producer
        .send_json(&topic, "a@x.com", &"code")
        .await
        .unwrap();
    assert_eq!(
        redis
            .stream_len(&stream_key(&topic, receipt.partition, 2))
            .await,
        1
    );

    let mut reader = transport.reader(&topic, &config("c1")).await.unwrap();
    let mut first = None;
    for _ in 0..10 {
        if let Some(message) = reader.fetch().await.unwrap() {
            first = Some(message);
            break;
        }
    }
    let first = first.expect("entry not delivered");
    reader.close().await.unwrap();

    // Same consumer name: the pending entry comes back first
    let mut reader = transport.reader(&topic, &config("c1")).await.unwrap();
    let again = reader.fetch().await.unwrap().expect("pending entry not redelivered");
    assert_eq!(again.offset, first.offset);
    assert!(again.is_redelivery());

    reader.commit(&again).await.unwrap();
    reader.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_abandoned_entry_is_claimed_by_new_consumer() {
    let redis = TestRedis::new().await;
    let builder = TestDataBuilder::from_test_name("claim_abandoned");
    let topic = builder.topic("events");

    let transport = RedisTransport::open(redis.connection_string()).unwrap();
    let producer = Producer::new(Arc::new(transport.publisher().await.unwrap()));
    producer.send_json(&topic, "a@x.com", &"stranded").await.unwrap();

    // Pulled under a pod name that never comes back
    let mut gone = transport.reader(&topic, &config("pod-a")).await.unwrap();
    let mut first = None;
    for _ in 0..10 {
        if let Some(message) = gone.fetch().await.unwrap() {
            first = Some(message);
            break;
        }
    }
    let first = first.expect("entry not delivered");
    drop(gone);

    let claim_idle = Duration::from_millis(200);
    let mut reader = transport
        .reader(&topic, &config("pod-b").with_claim_idle(claim_idle))
        .await
        .unwrap();
    tokio::time::sleep(claim_idle * 2).await;

    let mut claimed = None;
    for _ in 0..10 {
        if let Some(message) = reader.fetch().await.unwrap() {
            claimed = Some(message);
            break;
        }
    }
    let claimed = claimed.expect("abandoned entry not claimed");
    assert_eq!(claimed.offset, first.offset);
    assert_eq!(claimed.delivery_count, 2);

    reader.commit(&claimed).await.unwrap();
    reader.close().await.unwrap();

    let mut conn = redis.connection();
    let pending: redis::streams::StreamPendingReply = redis::cmd("XPENDING")
        .arg(&topic)
        .arg("notifications")
        .query_async(&mut conn)
        .await
        .unwrap();
    assert_eq!(pending.count(), 0);
}
