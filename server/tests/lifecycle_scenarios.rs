use claims::*;
use server::ServiceBusError;
use server::broker::memory::InMemoryBroker;
use server::broker::{BrokerClient, OutgoingMessage, PropertyValue, RuntimeInfo};
use server::config::EngineConfig;
use server::helper::{QueueHelper, TopicHelper};
use server::model::{ConnectionDescriptor, Message};
use std::sync::Arc;
use std::time::Duration;

// Helper module wiring the helpers to an in-memory namespace
mod lifecycle_helpers {
    use super::*;

    pub const NAMESPACE: &str = "contoso";
    pub const QUEUE: &str = "orders";
    pub const TOPIC: &str = "events";
    pub const SUBSCRIPTION: &str = "audit";
    pub const SUBSCRIPTION_PATH: &str = "events/Subscriptions/audit";

    pub struct Fixture {
        pub broker: InMemoryBroker,
        pub connection: ConnectionDescriptor,
        pub queues: QueueHelper,
        pub topics: TopicHelper,
    }

    pub fn fixture(config: EngineConfig) -> Fixture {
        let broker = InMemoryBroker::new();
        let connection = broker.create_namespace(NAMESPACE);
        broker.create_queue(NAMESPACE, QUEUE);
        broker.create_subscription(NAMESPACE, TOPIC, SUBSCRIPTION);

        let client: Arc<dyn BrokerClient> = Arc::new(broker.clone());
        Fixture {
            queues: QueueHelper::new(Arc::clone(&client), config.clone()),
            topics: TopicHelper::new(client, config),
            broker,
            connection,
        }
    }

    pub fn seed_queue(fixture: &Fixture, ids: impl IntoIterator<Item = String>) {
        for id in ids {
            let message = OutgoingMessage::from_text(&format!("body of {id}")).with_message_id(id);
            assert_ok!(fixture.broker.seed(NAMESPACE, QUEUE, message));
        }
    }

    pub fn active(fixture: &Fixture, path: &str) -> Vec<server::broker::ReceivedMessage> {
        fixture.broker.active_messages(NAMESPACE, path)
    }

    pub fn dead_letters(fixture: &Fixture, path: &str) -> Vec<server::broker::ReceivedMessage> {
        fixture.broker.dead_letter_messages(NAMESPACE, path)
    }

    pub fn bodies(messages: &[server::broker::ReceivedMessage]) -> Vec<String> {
        messages
            .iter()
            .map(|m| String::from_utf8_lossy(&m.body).into_owned())
            .collect()
    }
}

use lifecycle_helpers::*;

mod transfer {
    use super::*;

    #[tokio::test]
    async fn test_transfer_moves_every_dead_letter_to_main_queue() {
        let fixture = fixture(EngineConfig::default());
        for body in ["one", "two", "three"] {
            assert_ok!(fixture.broker.seed_dead_letter(
                NAMESPACE,
                QUEUE,
                OutgoingMessage::from_text(body),
                "MaxDeliveryCountExceeded",
            ));
        }

        let moved = assert_ok!(
            fixture
                .queues
                .transfer_dlq_messages(&fixture.connection, QUEUE)
                .await
        );

        assert_eq!(moved, 3);
        assert_eq!(bodies(&active(&fixture, QUEUE)), vec!["one", "two", "three"]);
        assert!(dead_letters(&fixture, QUEUE).is_empty());
    }

    #[tokio::test]
    async fn test_transfer_clone_preserves_envelope() {
        let fixture = fixture(EngineConfig::default());
        let original = OutgoingMessage {
            body: b"{\"order\":17}".to_vec(),
            message_id: Some("order-17".to_string()),
            correlation_id: Some("corr-9".to_string()),
            content_type: Some("application/json".to_string()),
            subject: Some("OrderPlaced".to_string()),
            session_id: Some("session-3".to_string()),
            transaction_partition_key: Some("session-3".to_string()),
            time_to_live: Some(Duration::from_secs(3600)),
            ..Default::default()
        }
        .with_property("tenant", "a")
        .with_property("attempt", PropertyValue::Int(4));
        assert_ok!(fixture.broker.seed_dead_letter(
            NAMESPACE,
            SUBSCRIPTION_PATH,
            original.clone(),
            "Poison",
        ));

        let moved = assert_ok!(
            fixture
                .topics
                .transfer_dlq_messages(&fixture.connection, TOPIC, SUBSCRIPTION)
                .await
        );
        assert_eq!(moved, 1);

        let resent = active(&fixture, SUBSCRIPTION_PATH);
        assert_eq!(resent.len(), 1);
        let resent = &resent[0];
        assert_eq!(resent.body, original.body);
        assert_eq!(resent.message_id, original.message_id);
        assert_eq!(resent.correlation_id, original.correlation_id);
        assert_eq!(resent.content_type, original.content_type);
        assert_eq!(resent.subject, original.subject);
        assert_eq!(resent.session_id, original.session_id);
        assert_eq!(resent.transaction_partition_key, original.transaction_partition_key);
        assert_eq!(resent.time_to_live, original.time_to_live);
        assert_eq!(
            resent.application_properties.get("attempt"),
            Some(&PropertyValue::Int(4))
        );
        assert_eq!(
            resent.application_properties.get("tenant").and_then(|v| v.as_str()),
            Some("a")
        );
        assert_eq!(resent.delivery_count, 0);
    }
}

mod resubmit {
    use super::*;

    #[tokio::test]
    async fn test_resubmit_by_sequence_number() {
        let fixture = fixture(EngineConfig::default());
        seed_queue(&fixture, (1..=41).map(|i| format!("filler-{i}")));
        let sequence = assert_ok!(fixture.broker.seed_dead_letter(
            NAMESPACE,
            QUEUE,
            OutgoingMessage::from_text("payload").with_message_id("target"),
            "ProcessingFailed",
        ));
        assert_eq!(sequence, 42);

        let dlq = fixture
            .queues
            .peek_messages(&fixture.connection, QUEUE, true)
            .await;
        let target = dlq
            .iter()
            .find(|m| m.sequence_number == 42)
            .cloned()
            .expect("dead-lettered message is visible");
        assert!(target.is_dlq);
        assert_eq!(target.dead_letter_reason, "ProcessingFailed");

        let affected = assert_ok!(
            fixture
                .queues
                .resubmit_dlq_message(&fixture.connection, QUEUE, &target)
                .await
        );
        assert_eq!(affected, 1);

        let dlq_after = fixture
            .queues
            .peek_messages(&fixture.connection, QUEUE, true)
            .await;
        assert!(dlq_after.iter().all(|m| m.sequence_number != 42));

        let main = fixture
            .queues
            .peek_messages(&fixture.connection, QUEUE, false)
            .await;
        let resubmitted: Vec<&Message> = main.iter().filter(|m| m.content() == "payload").collect();
        assert_eq!(resubmitted.len(), 1);
        assert_ne!(resubmitted[0].sequence_number, 42);
        assert_eq!(resubmitted[0].message_id, "target");
    }

    #[tokio::test]
    async fn test_resubmit_of_vanished_sequence_is_not_found() {
        let fixture = fixture(EngineConfig::default());
        assert_ok!(fixture.broker.seed_dead_letter(
            NAMESPACE,
            QUEUE,
            OutgoingMessage::from_text("payload"),
            "ProcessingFailed",
        ));
        let mut stale = fixture
            .queues
            .peek_messages(&fixture.connection, QUEUE, true)
            .await
            .remove(0);
        stale.sequence_number = 999;

        let error = assert_err!(
            fixture
                .queues
                .resubmit_dlq_message(&fixture.connection, QUEUE, &stale)
                .await
        );
        assert_matches!(error, ServiceBusError::MessageNotFound { sequence: 999, .. });
        assert!(active(&fixture, QUEUE).is_empty());
        assert_eq!(dead_letters(&fixture, QUEUE).len(), 1);
    }
}

mod scan {
    use super::*;

    #[tokio::test]
    async fn test_delete_in_fifth_batch_touches_only_preceding_messages() {
        let batch = 3;
        let fixture = fixture(EngineConfig::with_fetch_count(batch));
        seed_queue(&fixture, (0..18).map(|i| format!("m{i}")));

        // Last message of the fifth batch
        let target = Message::from_received(active(&fixture, QUEUE)[14].clone(), false);
        assert_eq!(target.message_id, "m14");

        let affected = assert_ok!(
            fixture
                .queues
                .delete_message(&fixture.connection, QUEUE, &target, false)
                .await
        );
        assert_eq!(affected, 1);

        let remaining = active(&fixture, QUEUE);
        assert_eq!(remaining.len(), 17);
        assert!(remaining.iter().all(|m| m.message_id.as_deref() != Some("m14")));
        for message in &remaining {
            let index: usize = message
                .message_id
                .as_deref()
                .and_then(|id| id.trim_start_matches('m').parse().ok())
                .expect("seeded id");
            let expected = if index < 14 { 1 } else { 0 };
            assert_eq!(message.delivery_count, expected, "delivery count of m{index}");
        }
        // Released messages keep their order
        let ids: Vec<_> = remaining.iter().filter_map(|m| m.message_id.clone()).collect();
        assert_eq!(ids.first().map(String::as_str), Some("m0"));
        assert_eq!(ids.last().map(String::as_str), Some("m17"));
    }

    #[tokio::test]
    async fn test_delete_of_missing_message_affects_nothing() {
        let fixture = fixture(EngineConfig::with_fetch_count(2));
        seed_queue(&fixture, (0..4).map(|i| format!("m{i}")));
        let mut ghost = Message::from_received(active(&fixture, QUEUE)[0].clone(), false);
        ghost.message_id = "missing".to_string();

        let affected = assert_ok!(
            fixture
                .queues
                .delete_message(&fixture.connection, QUEUE, &ghost, false)
                .await
        );

        assert_eq!(affected, 0);
        let remaining = active(&fixture, QUEUE);
        assert_eq!(remaining.len(), 4);
        assert!(remaining.iter().all(|m| m.delivery_count == 1));
    }

    #[tokio::test]
    async fn test_dead_letter_moves_target_to_sub_queue() {
        let fixture = fixture(EngineConfig::with_fetch_count(2));
        seed_queue(&fixture, (0..3).map(|i| format!("m{i}")));
        let target = Message::from_received(active(&fixture, QUEUE)[1].clone(), false);

        let affected = assert_ok!(
            fixture
                .queues
                .dead_letter_message(&fixture.connection, QUEUE, &target)
                .await
        );

        assert_eq!(affected, 1);
        let main: Vec<_> = active(&fixture, QUEUE)
            .into_iter()
            .filter_map(|m| m.message_id)
            .collect();
        assert_eq!(main, vec!["m0", "m2"]);
        let dlq = dead_letters(&fixture, QUEUE);
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].message_id.as_deref(), Some("m1"));
        assert_eq!(dlq[0].sequence_number, target.sequence_number);
    }

    #[tokio::test]
    async fn test_delete_from_subscription_dead_letters() {
        let fixture = fixture(EngineConfig::default());
        assert_ok!(fixture.broker.seed_dead_letter(
            NAMESPACE,
            SUBSCRIPTION_PATH,
            OutgoingMessage::from_text("bad").with_message_id("bad-1"),
            "Poison",
        ));
        let dlq = fixture
            .topics
            .peek_subscription_messages(&fixture.connection, TOPIC, SUBSCRIPTION, true)
            .await;
        assert_eq!(dlq.len(), 1);

        let affected = assert_ok!(
            fixture
                .topics
                .delete_message(&fixture.connection, TOPIC, SUBSCRIPTION, &dlq[0], true)
                .await
        );

        assert_eq!(affected, 1);
        assert!(dead_letters(&fixture, SUBSCRIPTION_PATH).is_empty());
    }
}

mod purge {
    use super::*;

    #[tokio::test]
    async fn test_purge_drains_in_batches() {
        let fixture = fixture(EngineConfig::with_fetch_count(2));
        seed_queue(&fixture, (0..5).map(|i| format!("m{i}")));

        let purged = assert_ok!(
            fixture
                .queues
                .purge_messages(&fixture.connection, QUEUE, false)
                .await
        );

        assert_eq!(purged, 5);
        assert!(active(&fixture, QUEUE).is_empty());
    }

    #[tokio::test]
    async fn test_purge_of_empty_queue_is_idempotent() {
        let fixture = fixture(EngineConfig::default());

        for _ in 0..2 {
            let purged = assert_ok!(
                fixture
                    .queues
                    .purge_messages(&fixture.connection, QUEUE, true)
                    .await
            );
            assert_eq!(purged, 0);
        }

        let runtime = assert_ok!(
            fixture
                .queues
                .get_queue_runtime_info(&fixture.connection, QUEUE)
                .await
        );
        assert_eq!(runtime, RuntimeInfo::default());
    }

    #[tokio::test]
    async fn test_purge_dead_letters_leaves_main_queue() {
        let fixture = fixture(EngineConfig::default());
        seed_queue(&fixture, ["keep".to_string()]);
        assert_ok!(fixture.broker.seed_dead_letter(
            NAMESPACE,
            QUEUE,
            OutgoingMessage::from_text("drop"),
            "Expired",
        ));

        let purged = assert_ok!(
            fixture
                .queues
                .purge_messages(&fixture.connection, QUEUE, true)
                .await
        );

        assert_eq!(purged, 1);
        assert_eq!(active(&fixture, QUEUE).len(), 1);
        assert!(dead_letters(&fixture, QUEUE).is_empty());
    }
}

mod failures {
    use super::*;

    #[tokio::test]
    async fn test_peek_failure_yields_empty_page() {
        let fixture = fixture(EngineConfig::default());
        seed_queue(&fixture, ["m0".to_string()]);
        fixture.broker.fail_peek_on(QUEUE);

        let messages = fixture
            .queues
            .peek_messages(&fixture.connection, QUEUE, false)
            .await;

        assert!(messages.is_empty());
        assert_eq!(active(&fixture, QUEUE).len(), 1);
    }

    #[tokio::test]
    async fn test_peek_of_unknown_multibyte_name_yields_empty_page() {
        let fixture = fixture(EngineConfig::default());

        let page = fixture
            .queues
            .peek_messages(&fixture.connection, "ÄÄÄÄÄÄÄÄÄÄ", false)
            .await;
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn test_destructive_failure_propagates() {
        let fixture = fixture(EngineConfig::default());
        seed_queue(&fixture, ["m0".to_string()]);
        fixture.broker.fail_receive_on(QUEUE);

        let error = assert_err!(
            fixture
                .queues
                .purge_messages(&fixture.connection, QUEUE, false)
                .await
        );

        assert_matches!(error, ServiceBusError::MessageReceiveFailed(_));
        assert_eq!(active(&fixture, QUEUE).len(), 1);
    }

    #[tokio::test]
    async fn test_send_failure_propagates() {
        let fixture = fixture(EngineConfig::default());
        fixture.broker.fail_send_on(QUEUE);

        let error = assert_err!(
            fixture
                .queues
                .send_message(&fixture.connection, QUEUE, "hello")
                .await
        );

        assert_matches!(error, ServiceBusError::MessageSendFailed(_));
    }

    #[tokio::test]
    async fn test_rejected_credentials_are_connection_errors() {
        let fixture = fixture(EngineConfig::default());
        fixture
            .broker
            .reject_credentials(&fixture.connection.connection_string);

        let error = assert_err!(fixture.queues.list_queues(&fixture.connection).await);

        assert_matches!(error, ServiceBusError::Unauthorized(_));
        assert!(error.is_connection_error());
    }

    #[tokio::test]
    async fn test_unknown_namespace_is_connection_failure() {
        let fixture = fixture(EngineConfig::default());
        let elsewhere = InMemoryBroker::new().create_namespace("elsewhere");

        let error = assert_err!(fixture.topics.list_topology(&elsewhere).await);

        assert_matches!(error, ServiceBusError::ConnectionFailed(_));
    }
}

mod listing {
    use super::*;

    #[tokio::test]
    async fn test_queue_listing_stops_at_limit_across_pages() {
        let broker = InMemoryBroker::new().with_page_size(2);
        let connection = broker.create_namespace(NAMESPACE);
        for i in 0..5 {
            broker.create_queue(NAMESPACE, &format!("queue-{i}"));
        }
        let helper = QueueHelper::new(
            Arc::new(broker.clone()),
            EngineConfig::default().set_queue_list_fetch_count(3),
        );

        let queues = assert_ok!(helper.list_queues(&connection).await);

        let names: Vec<_> = queues.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, vec!["queue-0", "queue-1", "queue-2"]);
    }

    #[tokio::test]
    async fn test_topic_cap_leaves_subscription_listing_whole() {
        let broker = InMemoryBroker::new().with_page_size(2);
        let connection = broker.create_namespace(NAMESPACE);
        for i in 0..5 {
            broker.create_subscription(NAMESPACE, "alpha", &format!("sub-{i}"));
        }
        broker.create_subscription(NAMESPACE, "beta", "only");
        broker.create_subscription(NAMESPACE, "gamma", "only");
        let helper = TopicHelper::new(
            Arc::new(broker.clone()),
            EngineConfig::default().set_topic_list_fetch_count(2),
        );

        let topology = assert_ok!(helper.list_topology(&connection).await);
        assert_eq!(topology.len(), 2);
        let alpha = assert_some!(topology.iter().find(|t| t.name == "alpha"));
        assert_eq!(alpha.subscriptions.len(), 5);

        let single = assert_ok!(helper.get_topic(&connection, "alpha", true).await);
        assert_eq!(single.subscriptions.len(), 5);
    }

    #[tokio::test]
    async fn test_topology_carries_subscription_counts() {
        let fixture = fixture(EngineConfig::default());
        fixture
            .broker
            .create_subscription(NAMESPACE, TOPIC, "billing");
        assert_ok!(fixture.broker.seed(NAMESPACE, TOPIC, OutgoingMessage::from_text("fan-out")));
        assert_ok!(fixture.broker.seed_dead_letter(
            NAMESPACE,
            SUBSCRIPTION_PATH,
            OutgoingMessage::from_text("dead"),
            "Poison",
        ));

        let topology = assert_ok!(fixture.topics.list_topology(&fixture.connection).await);

        assert_eq!(topology.len(), 1);
        assert_eq!(topology[0].name, TOPIC);
        let audit = &topology[0].subscriptions[0];
        assert_eq!(audit.name, SUBSCRIPTION);
        assert_eq!(
            audit.runtime,
            RuntimeInfo {
                message_count: 1,
                dlq_count: 1
            }
        );
        let billing = &topology[0].subscriptions[1];
        assert_eq!(billing.runtime.message_count, 1);
        assert_eq!(billing.runtime.dlq_count, 0);
    }

    #[tokio::test]
    async fn test_single_entity_lookups() {
        let fixture = fixture(EngineConfig::default());

        let topic = assert_ok!(
            fixture
                .topics
                .get_topic(&fixture.connection, TOPIC, true)
                .await
        );
        assert_eq!(topic.subscriptions.len(), 1);

        let bare = assert_ok!(
            fixture
                .topics
                .get_topic(&fixture.connection, TOPIC, false)
                .await
        );
        assert!(bare.subscriptions.is_empty());

        let missing = assert_err!(
            fixture
                .topics
                .get_topic(&fixture.connection, "nope", false)
                .await
        );
        assert_matches!(missing, ServiceBusError::EntityNotFound(_));

        let info = assert_ok!(fixture.topics.get_namespace_info(&fixture.connection).await);
        assert_eq!(info.name, NAMESPACE);
    }
}
