use std::time::{Duration, Instant};

use logbus::admin_types::{
    AclBinding, AclBindingFilter, AclOperation, AclPermissionType, AdminOptions, ConfigEntry,
    ConfigResource, ConsumerGroupState, NewPartitions, OffsetSpec, ResourcePatternType,
    ResourceType, ScramCredentialInfo, ScramMechanism, TopicSpecification,
    UserScramCredentialAlteration,
};
use logbus::testing::MockCluster;
use logbus::{AdminClient, ClientConfig, Consumer, ErrorCode, Offset, Producer, Record, TopicPartition};

mod common;

fn admin_for(cluster: &MockCluster) -> AdminClient {
    common::setup_tracing();
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", cluster.bootstrap_servers());
    AdminClient::new(&config, cluster.engine(&config)).unwrap()
}

async fn produce_values(cluster: &MockCluster, topic: &str, partition: i32, count: usize) {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", cluster.bootstrap_servers());
    let producer: Producer = Producer::new(&config, cluster.engine(&config)).unwrap();
    for i in 0..count {
        producer
            .produce(Record::to(topic).partition(partition).value(format!("m{i}")))
            .unwrap();
    }
    assert_eq!(producer.flush(Duration::from_secs(5)).await, 0);
    producer.close().await;
}

fn read_binding(name: &str, principal: &str) -> AclBinding {
    AclBinding {
        resource_type: ResourceType::Topic,
        name: name.to_string(),
        pattern_type: ResourcePatternType::Literal,
        principal: principal.to_string(),
        host: "*".to_string(),
        operation: AclOperation::Read,
        permission_type: AclPermissionType::Allow,
    }
}

#[tokio::test]
async fn topic_lifecycle_round_trips() {
    let cluster = MockCluster::new();
    let admin = admin_for(&cluster);

    // Validate-only must not create anything.
    let results = admin
        .create_topics(
            vec![TopicSpecification::new("orders", 3, 1)],
            AdminOptions::new().with_validate_only(true),
        )
        .await
        .unwrap();
    assert!(results[0].error.is_none());
    let described = admin
        .describe_topics(vec!["orders".to_string()], AdminOptions::new())
        .await
        .unwrap();
    assert_eq!(
        described[0].error.as_ref().map(|e| e.code()),
        Some(ErrorCode::UnknownTopic)
    );

    let results = admin
        .create_topics(vec![TopicSpecification::new("orders", 3, 1)], AdminOptions::new())
        .await
        .unwrap();
    assert!(results[0].error.is_none());
    let again = admin
        .create_topics(vec![TopicSpecification::new("orders", 3, 1)], AdminOptions::new())
        .await
        .unwrap();
    assert_eq!(
        again[0].error.as_ref().map(|e| e.code()),
        Some(ErrorCode::TopicAlreadyExists)
    );

    let grown = admin
        .create_partitions(
            vec![NewPartitions {
                topic: "orders".to_string(),
                new_total_count: 5,
            }],
            AdminOptions::new(),
        )
        .await
        .unwrap();
    assert!(grown[0].error.is_none());
    let described = admin
        .describe_topics(vec!["orders".to_string()], AdminOptions::new())
        .await
        .unwrap();
    assert_eq!(described[0].partitions.len(), 5);

    let deleted = admin
        .delete_topics(vec!["orders".to_string()], AdminOptions::new())
        .await
        .unwrap();
    assert!(deleted[0].error.is_none());
    let metadata = admin.metadata(Some("orders"), AdminOptions::new()).await.unwrap();
    assert_eq!(
        metadata.topics[0].error.as_ref().map(|e| e.code()),
        Some(ErrorCode::UnknownTopic)
    );
    admin.close().await;
}

#[tokio::test]
async fn cluster_queries_describe_the_mock_broker() {
    let cluster = MockCluster::new();
    cluster.create_topic("events", 2);
    let admin = admin_for(&cluster);

    assert_eq!(
        admin.cluster_id(AdminOptions::new()).await.unwrap().as_deref(),
        Some("mock-cluster")
    );
    assert_eq!(admin.controller_id(AdminOptions::new()).await.unwrap(), 1);

    let metadata = admin.metadata(None, AdminOptions::new()).await.unwrap();
    assert_eq!(metadata.brokers.len(), 1);
    assert_eq!(metadata.topics.len(), 1);
    assert_eq!(metadata.topics[0].partitions.len(), 2);
    admin.close().await;
}

#[tokio::test]
async fn deadline_bounds_an_unresponsive_admin_path() {
    let cluster = MockCluster::new();
    cluster.set_admin_unresponsive(true);
    let admin = admin_for(&cluster);

    let started = Instant::now();
    let err = admin
        .describe_cluster(AdminOptions::new().with_request_timeout(Duration::from_secs(1)))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(err.code(), ErrorCode::DeadlineExceeded);
    assert!(elapsed >= Duration::from_millis(900), "returned early: {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(1200), "deadline overshot: {elapsed:?}");
    admin.close().await;
}

#[tokio::test]
async fn slow_but_responsive_admin_calls_still_complete() {
    let cluster = MockCluster::new();
    cluster.set_admin_latency(Duration::from_millis(100));
    let admin = admin_for(&cluster);

    let description = admin
        .describe_cluster(AdminOptions::new().with_request_timeout(Duration::from_secs(2)))
        .await
        .unwrap();
    assert_eq!(description.cluster_id.as_deref(), Some("mock-cluster"));
    admin.close().await;
}

#[tokio::test]
async fn group_offsets_reflect_the_last_commit_per_partition() {
    let cluster = MockCluster::new();
    cluster.create_topic("events", 2);

    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", cluster.bootstrap_servers())
        .set("group.id", "readers");
    let consumer = Consumer::new(&config, cluster.engine(&config)).unwrap();
    consumer
        .assign(&[
            TopicPartition::new("events", 0),
            TopicPartition::new("events", 1),
        ])
        .await
        .unwrap();

    // Interleave commits across partitions; only the last one per
    // partition may survive.
    for (partition, offset) in [(1, 5), (0, 3), (1, 9)] {
        consumer
            .commit_offsets(vec![TopicPartition::with_offset(
                "events",
                partition,
                Offset::At(offset),
            )])
            .await
            .unwrap();
    }

    let admin = admin_for(&cluster);
    let offsets = admin
        .list_consumer_group_offsets("readers", None, AdminOptions::new())
        .await
        .unwrap();
    assert_eq!(offsets.len(), 2);
    assert_eq!(offsets[0].partition, 0);
    assert_eq!(offsets[0].offset, Offset::At(3));
    assert_eq!(offsets[1].partition, 1);
    assert_eq!(offsets[1].offset, Offset::At(9));

    let altered = admin
        .alter_consumer_group_offsets(
            "readers",
            vec![TopicPartition::with_offset("events", 0, Offset::At(7))],
            AdminOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(altered[0].offset, Offset::At(7));
    assert_eq!(cluster.committed_offset("readers", "events", 0), Some(7));

    let removed = admin
        .delete_consumer_group_offsets(
            "readers",
            vec![TopicPartition::new("events", 1)],
            AdminOptions::new(),
        )
        .await
        .unwrap();
    assert!(removed[0].error.is_none());
    assert_eq!(cluster.committed_offset("readers", "events", 1), None);

    consumer.close().await.unwrap();
    admin.close().await;
}

#[tokio::test]
async fn creating_the_same_acls_twice_leaves_no_duplicates() {
    let cluster = MockCluster::new();
    let admin = admin_for(&cluster);

    let bindings = vec![
        read_binding("events", "User:svc"),
        read_binding("orders", "User:svc"),
    ];
    for _ in 0..2 {
        let results = admin
            .create_acls(bindings.clone(), AdminOptions::new())
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.error.is_none()));
    }

    let described = admin
        .describe_acls(AclBindingFilter::any(), AdminOptions::new())
        .await
        .unwrap();
    assert_eq!(described.len(), 2);

    let mut filter = AclBindingFilter::any();
    filter.name = Some("events".to_string());
    let deleted = admin
        .delete_acls(vec![filter], AdminOptions::new())
        .await
        .unwrap();
    assert_eq!(deleted[0].bindings.len(), 1);
    assert_eq!(deleted[0].bindings[0].name, "events");

    let remaining = admin
        .describe_acls(AclBindingFilter::any(), AdminOptions::new())
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].name, "orders");
    admin.close().await;
}

#[tokio::test]
async fn config_alterations_show_up_in_describe() {
    let cluster = MockCluster::new();
    cluster.create_topic("events", 1);
    let admin = admin_for(&cluster);

    let resource = ConfigResource {
        resource_type: ResourceType::Topic,
        name: "events".to_string(),
        entries: vec![ConfigEntry::new("retention.ms", "60000")],
    };
    let altered = admin
        .alter_configs(vec![resource], AdminOptions::new())
        .await
        .unwrap();
    assert!(altered[0].error.is_none());

    let described = admin
        .describe_configs(
            vec![ConfigResource {
                resource_type: ResourceType::Topic,
                name: "events".to_string(),
                entries: Vec::new(),
            }],
            AdminOptions::new(),
        )
        .await
        .unwrap();
    let entries = &described[0].resource.entries;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "retention.ms");
    assert_eq!(entries[0].value.as_deref(), Some("60000"));
    admin.close().await;
}

#[tokio::test]
async fn delete_records_advances_the_low_watermark() {
    let cluster = MockCluster::new();
    cluster.create_topic("events", 1);
    produce_values(&cluster, "events", 0, 10).await;

    let admin = admin_for(&cluster);
    let results = admin
        .delete_records(
            vec![TopicPartition::with_offset("events", 0, Offset::At(5))],
            AdminOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(results[0].deleted.as_ref().unwrap().low_watermark, 5);

    let listed = admin
        .list_offsets(
            vec![
                (TopicPartition::new("events", 0), OffsetSpec::Earliest),
                (TopicPartition::new("events", 0), OffsetSpec::Latest),
            ],
            AdminOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(listed[0].partition.offset, Offset::At(5));
    assert_eq!(listed[1].partition.offset, Offset::At(10));
    admin.close().await;
}

#[tokio::test]
async fn list_offsets_resolves_timestamps() {
    let cluster = MockCluster::new();
    cluster.create_topic("events", 1);

    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", cluster.bootstrap_servers());
    let producer: Producer = Producer::new(&config, cluster.engine(&config)).unwrap();
    for (value, millis) in [("a", 100), ("b", 200), ("c", 300)] {
        producer
            .produce(Record::to("events").partition(0).value(value).timestamp(millis))
            .unwrap();
    }
    assert_eq!(producer.flush(Duration::from_secs(5)).await, 0);
    producer.close().await;

    let admin = admin_for(&cluster);
    let listed = admin
        .list_offsets(
            vec![(
                TopicPartition::new("events", 0),
                OffsetSpec::ForTimestamp(150),
            )],
            AdminOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(listed[0].partition.offset, Offset::At(1));
    assert_eq!(listed[0].timestamp, 200);
    admin.close().await;
}

#[tokio::test]
async fn scram_describe_sees_prior_alterations() {
    let cluster = MockCluster::new();
    let admin = admin_for(&cluster);

    let results = admin
        .alter_user_scram_credentials(
            vec![UserScramCredentialAlteration::Upsert {
                user: "alice".to_string(),
                info: ScramCredentialInfo {
                    mechanism: ScramMechanism::Sha256,
                    iterations: 4096,
                },
                password: b"secret".to_vec(),
                salt: None,
            }],
            AdminOptions::new(),
        )
        .await
        .unwrap();
    assert!(results[0].error.is_none());

    let described = admin
        .describe_user_scram_credentials(
            vec!["alice".to_string(), "bob".to_string()],
            AdminOptions::new(),
        )
        .await
        .unwrap();
    assert!(described[0].error.is_none());
    assert_eq!(
        described[0].credentials,
        vec![ScramCredentialInfo {
            mechanism: ScramMechanism::Sha256,
            iterations: 4096,
        }]
    );
    assert_eq!(
        described[1].error.as_ref().map(|e| e.code()),
        Some(ErrorCode::NotFound)
    );

    let removed = admin
        .alter_user_scram_credentials(
            vec![UserScramCredentialAlteration::Delete {
                user: "alice".to_string(),
                mechanism: ScramMechanism::Sha256,
            }],
            AdminOptions::new(),
        )
        .await
        .unwrap();
    assert!(removed[0].error.is_none());
    admin.close().await;
}

#[tokio::test]
async fn group_listings_track_known_groups() {
    let cluster = MockCluster::new();
    cluster.create_topic("events", 1);

    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", cluster.bootstrap_servers())
        .set("group.id", "readers");
    let consumer = Consumer::new(&config, cluster.engine(&config)).unwrap();
    consumer.subscribe(&["events"], None).unwrap();

    let admin = admin_for(&cluster);
    let listings = admin.list_consumer_groups(AdminOptions::new()).await.unwrap();
    assert_eq!(listings.len(), 1);
    assert_eq!(listings[0].group_id, "readers");
    assert_eq!(listings[0].state, ConsumerGroupState::Stable);

    let none = admin
        .list_consumer_groups(
            AdminOptions::new().with_match_states(vec![ConsumerGroupState::Empty]),
        )
        .await
        .unwrap();
    assert!(none.is_empty());

    let descriptions = admin
        .describe_consumer_groups(
            vec!["readers".to_string(), "ghost".to_string()],
            AdminOptions::new(),
        )
        .await
        .unwrap();
    assert!(descriptions[0].error.is_none());
    assert_eq!(descriptions[0].state, ConsumerGroupState::Stable);
    assert_eq!(
        descriptions[1].error.as_ref().map(|e| e.code()),
        Some(ErrorCode::UnknownGroup)
    );

    consumer.close().await.unwrap();
    // With the only member gone the group is deletable.
    let deleted = admin
        .delete_consumer_groups(vec!["readers".to_string()], AdminOptions::new())
        .await
        .unwrap();
    assert!(deleted[0].error.is_none());
    assert!(admin.list_consumer_groups(AdminOptions::new()).await.unwrap().is_empty());
    admin.close().await;
}
