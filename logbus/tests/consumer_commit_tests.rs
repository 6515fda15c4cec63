use std::time::Duration;

use logbus::testing::MockCluster;
use logbus::{
    ClientConfig, Consumer, ErrorCode, Event, Message, Offset, Producer, Record, TopicPartition,
};

mod common;

const POLL_STEP: Duration = Duration::from_millis(50);

fn consumer_config(cluster: &MockCluster, group: &str) -> ClientConfig {
    common::setup_tracing();
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", cluster.bootstrap_servers())
        .set("group.id", group)
        .set("auto.offset.reset", "earliest");
    config
}

async fn produce_values(cluster: &MockCluster, topic: &str, partition: i32, values: &[&str]) {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", cluster.bootstrap_servers());
    let producer: Producer = Producer::new(&config, cluster.engine(&config)).unwrap();
    for value in values {
        producer
            .produce(Record::to(topic).partition(partition).value(*value))
            .unwrap();
    }
    assert_eq!(producer.flush(Duration::from_secs(5)).await, 0);
    producer.close().await;
}

async fn next_message(consumer: &Consumer) -> Message {
    for _ in 0..100 {
        if let Some(Event::Message(message)) = consumer.poll(POLL_STEP).await.unwrap() {
            return message;
        }
    }
    panic!("no message within the polling budget");
}

#[tokio::test]
async fn commit_outside_the_assignment_never_reaches_the_engine() {
    let cluster = MockCluster::new();
    cluster.create_topic("events", 2);

    let config = consumer_config(&cluster, "readers");
    let consumer = Consumer::new(&config, cluster.engine(&config)).unwrap();
    consumer
        .assign(&[TopicPartition::new("events", 0)])
        .await
        .unwrap();

    let err = consumer
        .commit_offsets(vec![TopicPartition::with_offset("events", 1, Offset::At(5))])
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnknownPartition);
    assert_eq!(cluster.committed_offset("readers", "events", 1), None);
    consumer.close().await.unwrap();
}

#[tokio::test]
async fn commit_entry_points_share_one_primitive() {
    let cluster = MockCluster::new();
    cluster.create_topic("events", 1);
    produce_values(&cluster, "events", 0, &["a", "b", "c"]).await;

    let mut config = consumer_config(&cluster, "readers");
    config.set("enable.auto.commit", "false");
    let consumer = Consumer::new(&config, cluster.engine(&config)).unwrap();
    consumer
        .assign(&[TopicPartition::with_offset("events", 0, Offset::Beginning)])
        .await
        .unwrap();

    // Commit-by-message commits the position after the message.
    let first = next_message(&consumer).await;
    let committed = consumer.commit_message(&first).await.unwrap();
    assert_eq!(committed[0].offset, Offset::At(1));
    assert_eq!(cluster.committed_offset("readers", "events", 0), Some(1));

    // Commit-current commits the tracked consumption position.
    let _second = next_message(&consumer).await;
    let third = next_message(&consumer).await;
    assert_eq!(third.offset, 2);
    let committed = consumer.commit().await.unwrap();
    assert_eq!(committed[0].offset, Offset::At(3));

    let stored = consumer
        .committed(vec![TopicPartition::new("events", 0)], Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(stored[0].offset, Offset::At(3));
    consumer.close().await.unwrap();
}

#[tokio::test]
async fn position_reports_the_next_offset_to_read() {
    let cluster = MockCluster::new();
    cluster.create_topic("events", 2);
    produce_values(&cluster, "events", 0, &["a", "b"]).await;

    let config = consumer_config(&cluster, "readers");
    let consumer = Consumer::new(&config, cluster.engine(&config)).unwrap();
    consumer
        .assign(&[TopicPartition::with_offset("events", 0, Offset::Beginning)])
        .await
        .unwrap();

    next_message(&consumer).await;
    next_message(&consumer).await;

    let positions = consumer.position(&[
        TopicPartition::new("events", 0),
        TopicPartition::new("events", 1),
    ]);
    assert_eq!(positions[0].offset, Offset::At(2));
    // Nothing was ever read from the second partition.
    assert_eq!(positions[1].offset, Offset::Invalid);
    consumer.close().await.unwrap();
}

#[tokio::test]
async fn unsubscribe_commits_tracked_positions_first() {
    let cluster = MockCluster::new();
    cluster.create_topic("events", 1);
    produce_values(&cluster, "events", 0, &["a", "b", "c"]).await;

    let config = consumer_config(&cluster, "readers");
    let consumer = Consumer::new(&config, cluster.engine(&config)).unwrap();
    consumer
        .assign(&[TopicPartition::with_offset("events", 0, Offset::Beginning)])
        .await
        .unwrap();
    for _ in 0..3 {
        next_message(&consumer).await;
    }

    consumer.unsubscribe().await.unwrap();
    assert_eq!(cluster.committed_offset("readers", "events", 0), Some(3));
    assert!(consumer.assignment().await.is_empty());
    consumer.close().await.unwrap();
}

#[tokio::test]
async fn unsubscribe_skips_the_commit_when_autocommit_is_off() {
    let cluster = MockCluster::new();
    cluster.create_topic("events", 1);
    produce_values(&cluster, "events", 0, &["a", "b"]).await;

    let mut config = consumer_config(&cluster, "readers");
    config.set("enable.auto.commit", "false");
    let consumer = Consumer::new(&config, cluster.engine(&config)).unwrap();
    consumer
        .assign(&[TopicPartition::with_offset("events", 0, Offset::Beginning)])
        .await
        .unwrap();
    next_message(&consumer).await;

    consumer.unsubscribe().await.unwrap();
    assert_eq!(cluster.committed_offset("readers", "events", 0), None);
    consumer.close().await.unwrap();
}

#[tokio::test]
async fn close_flushes_the_final_autocommit() {
    let cluster = MockCluster::new();
    cluster.create_topic("events", 1);
    produce_values(&cluster, "events", 0, &["a", "b"]).await;

    let config = consumer_config(&cluster, "readers");
    let consumer = Consumer::new(&config, cluster.engine(&config)).unwrap();
    consumer
        .assign(&[TopicPartition::with_offset("events", 0, Offset::Beginning)])
        .await
        .unwrap();
    next_message(&consumer).await;
    next_message(&consumer).await;

    consumer.close().await.unwrap();
    assert_eq!(cluster.committed_offset("readers", "events", 0), Some(2));
}
