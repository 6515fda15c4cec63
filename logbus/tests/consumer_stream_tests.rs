use std::time::Duration;

use logbus::testing::MockCluster;
use logbus::{
    ClientConfig, Consumer, ErrorCode, Event, Message, Offset, Producer, Record, Timestamp,
    TopicPartition,
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

async fn next_event(consumer: &Consumer) -> Event {
    for _ in 0..100 {
        if let Some(event) = consumer.poll(POLL_STEP).await.unwrap() {
            return event;
        }
    }
    panic!("no event within the polling budget");
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
async fn seek_repositions_the_next_read() {
    let cluster = MockCluster::new();
    cluster.create_topic("events", 1);
    produce_values(
        &cluster,
        "events",
        0,
        &["m0", "m1", "m2", "m3", "m4", "m5", "m6", "m7", "m8", "m9"],
    )
    .await;

    let config = consumer_config(&cluster, "readers");
    let consumer = Consumer::new(&config, cluster.engine(&config)).unwrap();
    consumer
        .assign(&[TopicPartition::with_offset("events", 0, Offset::Beginning)])
        .await
        .unwrap();

    let results = consumer
        .seek_partitions(vec![TopicPartition::with_offset("events", 0, Offset::At(5))])
        .unwrap();
    assert!(results[0].error.is_none());
    assert_eq!(results[0].offset, Offset::At(5));

    let message = next_message(&consumer).await;
    assert_eq!(message.offset, 5);
    assert_eq!(message.value.as_deref(), Some(&b"m5"[..]));
    consumer.close().await.unwrap();
}

#[tokio::test]
async fn seek_past_the_log_reports_out_of_range() {
    let cluster = MockCluster::new();
    cluster.create_topic("events", 1);
    produce_values(&cluster, "events", 0, &["m0", "m1"]).await;

    let config = consumer_config(&cluster, "readers");
    let consumer = Consumer::new(&config, cluster.engine(&config)).unwrap();
    consumer
        .assign(&[TopicPartition::with_offset("events", 0, Offset::Beginning)])
        .await
        .unwrap();

    let results = consumer
        .seek_partitions(vec![TopicPartition::with_offset("events", 0, Offset::At(99))])
        .unwrap();
    assert_eq!(results[0].error, Some(ErrorCode::OffsetOutOfRange));
    consumer.close().await.unwrap();
}

#[tokio::test]
async fn headers_and_timestamps_round_trip() {
    let cluster = MockCluster::new();
    cluster.create_topic("events", 1);

    let mut producer_config = ClientConfig::new();
    producer_config.set("bootstrap.servers", cluster.bootstrap_servers());
    let producer: Producer =
        Producer::new(&producer_config, cluster.engine(&producer_config)).unwrap();
    producer
        .produce(
            Record::to("events")
                .partition(0)
                .key("k1")
                .value("v1")
                .header("trace", Some(b"abc"))
                .header("trace", Some(b"def"))
                .header("empty", None)
                .timestamp(1_700_000_000_123),
        )
        .unwrap();
    assert_eq!(producer.flush(Duration::from_secs(5)).await, 0);
    producer.close().await;

    let config = consumer_config(&cluster, "readers");
    let consumer = Consumer::new(&config, cluster.engine(&config)).unwrap();
    consumer
        .assign(&[TopicPartition::with_offset("events", 0, Offset::Beginning)])
        .await
        .unwrap();

    let message = next_message(&consumer).await;
    assert_eq!(message.key.as_deref(), Some(&b"k1"[..]));
    assert_eq!(message.value.as_deref(), Some(&b"v1"[..]));
    // Headers keep their order and repeated keys.
    assert_eq!(message.headers.len(), 3);
    assert_eq!(message.headers[0].key, "trace");
    assert_eq!(message.headers[0].value.as_deref(), Some(&b"abc"[..]));
    assert_eq!(message.headers[1].key, "trace");
    assert_eq!(message.headers[1].value.as_deref(), Some(&b"def"[..]));
    assert_eq!(message.headers[2].key, "empty");
    assert!(message.headers[2].value.is_none());
    assert_eq!(message.timestamp, Timestamp::CreateTime(1_700_000_000_123));
    consumer.close().await.unwrap();
}

#[tokio::test]
async fn partition_eof_surfaces_when_enabled() {
    let cluster = MockCluster::new();
    cluster.create_topic("events", 1);
    produce_values(&cluster, "events", 0, &["only"]).await;

    let mut config = consumer_config(&cluster, "readers");
    config.set("enable.partition.eof", "true");
    let consumer = Consumer::new(&config, cluster.engine(&config)).unwrap();
    consumer
        .assign(&[TopicPartition::with_offset("events", 0, Offset::Beginning)])
        .await
        .unwrap();

    let message = next_message(&consumer).await;
    assert_eq!(message.offset, 0);
    match next_event(&consumer).await {
        Event::PartitionEof(partition) => {
            assert_eq!(partition.partition, 0);
            assert_eq!(partition.offset, Offset::At(1));
        }
        other => panic!("expected partition EOF, got {other:?}"),
    }
    consumer.close().await.unwrap();
}

#[tokio::test]
async fn watermark_queries_track_the_log() {
    let cluster = MockCluster::new();
    cluster.create_topic("events", 1);
    produce_values(&cluster, "events", 0, &["a", "b", "c", "d"]).await;

    let config = consumer_config(&cluster, "readers");
    let consumer = Consumer::new(&config, cluster.engine(&config)).unwrap();

    let marks = consumer
        .query_watermark_offsets("events", 0, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(marks, (0, 4));
    // The broker answer is cached for the local variant.
    assert_eq!(consumer.watermark_offsets("events", 0).unwrap(), (0, 4));

    let err = consumer.watermark_offsets("events", 9).unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnknownPartition);
    consumer.close().await.unwrap();
}

#[tokio::test]
async fn offsets_for_times_finds_the_first_record_at_or_past() {
    let cluster = MockCluster::new();
    cluster.create_topic("events", 1);

    let mut producer_config = ClientConfig::new();
    producer_config.set("bootstrap.servers", cluster.bootstrap_servers());
    let producer: Producer =
        Producer::new(&producer_config, cluster.engine(&producer_config)).unwrap();
    for (value, millis) in [("a", 100), ("b", 200), ("c", 300)] {
        producer
            .produce(Record::to("events").partition(0).value(value).timestamp(millis))
            .unwrap();
    }
    assert_eq!(producer.flush(Duration::from_secs(5)).await, 0);
    producer.close().await;

    let config = consumer_config(&cluster, "readers");
    let consumer = Consumer::new(&config, cluster.engine(&config)).unwrap();

    let results = consumer
        .offsets_for_times(
            vec![TopicPartition::with_offset("events", 0, Offset::At(150))],
            Duration::from_secs(1),
        )
        .await
        .unwrap();
    assert_eq!(results[0].offset, Offset::At(1));

    let past_everything = consumer
        .offsets_for_times(
            vec![TopicPartition::with_offset("events", 0, Offset::At(999))],
            Duration::from_secs(1),
        )
        .await
        .unwrap();
    assert_eq!(past_everything[0].offset, Offset::End);
    consumer.close().await.unwrap();
}

#[tokio::test]
async fn push_mode_feeds_the_event_channel_and_rejects_poll() {
    let cluster = MockCluster::new();
    cluster.create_topic("events", 1);
    produce_values(&cluster, "events", 0, &["a", "b", "c"]).await;

    let mut config = consumer_config(&cluster, "readers");
    config
        .set("events.channel.enable", "true")
        .set("events.channel.size", "16");
    let consumer = Consumer::new(&config, cluster.engine(&config)).unwrap();
    let mut events = consumer.events().unwrap();

    // One mode per client: polling is refused, and so is a second take.
    let err = consumer.poll(POLL_STEP).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidState);
    assert_eq!(consumer.events().unwrap_err().code(), ErrorCode::InvalidState);

    consumer.subscribe(&["events"], None).unwrap();

    let mut values = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while values.len() < 3 {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .expect("event within deadline")
            .expect("channel open");
        match event {
            Event::Message(message) => values.push(message.value.unwrap()),
            Event::PartitionsAssigned(set) => assert_eq!(set.len(), 1),
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(values, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

    consumer.close().await.unwrap();
    // After close the loop drains what is buffered, then the channel ends.
    loop {
        match tokio::time::timeout(Duration::from_secs(1), events.recv()).await {
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(_) => panic!("event channel did not close"),
        }
    }
}

#[tokio::test]
async fn pull_mode_has_no_event_channel() {
    let cluster = MockCluster::new();
    cluster.create_topic("events", 1);

    let config = consumer_config(&cluster, "readers");
    let consumer = Consumer::new(&config, cluster.engine(&config)).unwrap();
    assert_eq!(consumer.events().unwrap_err().code(), ErrorCode::InvalidState);
    consumer.close().await.unwrap();
}

#[tokio::test]
async fn paused_partitions_stop_yielding_until_resumed() {
    let cluster = MockCluster::new();
    cluster.create_topic("events", 1);
    produce_values(&cluster, "events", 0, &["a", "b"]).await;

    let config = consumer_config(&cluster, "readers");
    let consumer = Consumer::new(&config, cluster.engine(&config)).unwrap();
    consumer
        .assign(&[TopicPartition::with_offset("events", 0, Offset::Beginning)])
        .await
        .unwrap();

    let first = next_message(&consumer).await;
    assert_eq!(first.offset, 0);

    let partition = [TopicPartition::new("events", 0)];
    consumer.pause(&partition).unwrap();
    assert!(consumer.poll(Duration::from_millis(100)).await.unwrap().is_none());

    consumer.resume(&partition).unwrap();
    assert_eq!(next_message(&consumer).await.offset, 1);
    consumer.close().await.unwrap();
}
