//! Tests for the in-memory broker and providers.

use super::*;
use crate::message::{EVENT_TYPE_ATTRIBUTE, NO_TRACING_ATTRIBUTE};

fn text(body: &str) -> Message {
    Message::new(Bytes::from(body.to_string()))
}

fn broker_with_timeout(seconds: u64) -> InMemoryBroker {
    InMemoryBroker::new(InMemorySettings {
        visibility_timeout_seconds: seconds,
    })
}

// ============================================================================
// Queue Management Tests
// ============================================================================

mod queue_management {
    use super::*;

    /// Verify creating a queue twice returns the same URL without losing messages
    #[test]
    fn test_create_queue_is_idempotent() {
        let broker = InMemoryBroker::default();
        let url = broker.create_queue("orders-q").unwrap();
        broker.send(&url, &text("a")).unwrap();

        let again = broker.create_queue("orders-q").unwrap();

        assert_eq!(url, again);
        assert_eq!(broker.message_count(&url).unwrap(), 1);
        assert!(broker.has_queue(&url));
    }

    /// Verify operations on unknown queues fail with QueueNotFound
    #[test]
    fn test_unknown_queue() {
        let broker = InMemoryBroker::default();
        let url = QueueUrl::in_memory("missing").unwrap();

        assert!(matches!(
            broker.send(&url, &text("a")),
            Err(QueueError::QueueNotFound { .. })
        ));
        assert!(matches!(
            broker.receive(&url, 1),
            Err(QueueError::QueueNotFound { .. })
        ));
        assert!(!broker.has_queue(&url));
    }

    /// Verify a redrive policy requires an existing dead letter queue
    #[test]
    fn test_redrive_policy_requires_dead_letter_queue() {
        let broker = InMemoryBroker::default();
        let queue = broker.create_queue("orders-q").unwrap();

        let result = broker.set_redrive_policy(
            &queue,
            RedrivePolicy {
                dead_letter_url: QueueUrl::in_memory("orders-dlq").unwrap(),
                max_receive_count: 3,
            },
        );

        assert!(matches!(result, Err(QueueError::QueueNotFound { .. })));
    }

    /// Verify a zero max receive count is rejected
    #[test]
    fn test_redrive_policy_rejects_zero_count() {
        let broker = InMemoryBroker::default();
        let queue = broker.create_queue("orders-q").unwrap();
        let dlq = broker.create_queue("orders-dlq").unwrap();

        let result = broker.set_redrive_policy(
            &queue,
            RedrivePolicy {
                dead_letter_url: dlq,
                max_receive_count: 0,
            },
        );

        assert!(matches!(result, Err(QueueError::ConfigurationError(_))));
    }
}

// ============================================================================
// Send / Receive / Delete Tests
// ============================================================================

mod message_flow {
    use super::*;

    /// Verify messages come back in send order with body and attributes intact
    #[test]
    fn test_send_then_receive_preserves_content() {
        let broker = InMemoryBroker::default();
        let url = broker.create_queue("q").unwrap();
        let message = text("payload")
            .with_string_attribute(EVENT_TYPE_ATTRIBUTE, "order.created")
            .with_attribute("bin", MessageAttribute::Binary(Bytes::from_static(&[0, 1])));
        let first = broker.send(&url, &message).unwrap();
        broker.send(&url, &text("second")).unwrap();

        let received = broker.receive(&url, 10).unwrap();

        assert_eq!(received.len(), 2);
        assert_eq!(received[0].message_id, first);
        assert_eq!(received[0].body, message.body);
        assert_eq!(received[0].attributes, message.attributes);
        assert_eq!(received[0].receive_count, 1);
        assert_eq!(received[1].body, Bytes::from_static(b"second"));
    }

    /// Verify received messages are hidden but still counted until deleted
    #[test]
    fn test_received_messages_are_in_flight() {
        let broker = InMemoryBroker::default();
        let url = broker.create_queue("q").unwrap();
        broker.send(&url, &text("a")).unwrap();

        let received = broker.receive(&url, 1).unwrap();
        assert!(broker.receive(&url, 1).unwrap().is_empty());
        assert_eq!(broker.message_count(&url).unwrap(), 1);

        broker.delete(&url, &received[0].receipt_handle).unwrap();
        assert_eq!(broker.message_count(&url).unwrap(), 0);
    }

    /// Verify deleting with a stale receipt fails
    #[test]
    fn test_delete_twice_fails() {
        let broker = InMemoryBroker::default();
        let url = broker.create_queue("q").unwrap();
        broker.send(&url, &text("a")).unwrap();
        let received = broker.receive(&url, 1).unwrap();

        broker.delete(&url, &received[0].receipt_handle).unwrap();
        let second = broker.delete(&url, &received[0].receipt_handle);

        assert!(matches!(second, Err(QueueError::MessageNotFound { .. })));
    }

    /// Verify an expired visibility timeout makes the message receivable again
    #[test]
    fn test_visibility_timeout_expiry_redelivers() {
        let broker = broker_with_timeout(0);
        let url = broker.create_queue("q").unwrap();
        broker.send(&url, &text("a")).unwrap();

        let first = broker.receive(&url, 1).unwrap();
        let second = broker.receive(&url, 1).unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].message_id, first[0].message_id);
        assert_eq!(second[0].receive_count, 2);
        assert_ne!(second[0].receipt_handle, first[0].receipt_handle);
    }

    /// Verify receive honours the requested maximum
    #[test]
    fn test_receive_respects_max() {
        let broker = InMemoryBroker::default();
        let url = broker.create_queue("q").unwrap();
        for i in 0..5 {
            broker.send(&url, &text(&format!("m{i}"))).unwrap();
        }

        assert_eq!(broker.receive(&url, 3).unwrap().len(), 3);
        assert_eq!(broker.receive(&url, 3).unwrap().len(), 2);
    }

    /// Verify oversized bodies are rejected
    #[test]
    fn test_message_too_large() {
        let broker = InMemoryBroker::default();
        let url = broker.create_queue("q").unwrap();
        let body = vec![b'x'; ProviderType::InMemory.max_message_size() + 1];

        let result = broker.send(&url, &Message::new(Bytes::from(body)));

        assert!(matches!(result, Err(QueueError::MessageTooLarge { .. })));
    }
}

// ============================================================================
// Redrive Policy Tests
// ============================================================================

mod redrive_policy {
    use super::*;

    /// Verify a message exceeding the max receive count lands on the dead letter queue
    #[test]
    fn test_exceeding_max_receive_count_moves_to_dlq() {
        let broker = broker_with_timeout(0);
        let queue = broker.create_queue("orders-q").unwrap();
        let dlq = broker.create_queue("orders-dlq").unwrap();
        broker
            .set_redrive_policy(
                &queue,
                RedrivePolicy {
                    dead_letter_url: dlq.clone(),
                    max_receive_count: 2,
                },
            )
            .unwrap();
        let message = text("poison").with_string_attribute("k", "v");
        broker.send(&queue, &message).unwrap();

        assert_eq!(broker.receive(&queue, 1).unwrap().len(), 1);
        assert_eq!(broker.receive(&queue, 1).unwrap().len(), 1);
        assert!(broker.receive(&queue, 1).unwrap().is_empty());

        assert_eq!(broker.message_count(&queue).unwrap(), 0);
        assert_eq!(broker.message_count(&dlq).unwrap(), 1);

        let dead = broker.receive(&dlq, 1).unwrap();
        assert_eq!(dead[0].body, message.body);
        assert_eq!(dead[0].attributes, message.attributes);
        assert_eq!(dead[0].receive_count, 1);
    }
}

// ============================================================================
// Topic Tests
// ============================================================================

mod topics {
    use super::*;

    /// Verify raw subscriptions receive the message with attributes as attributes
    #[test]
    fn test_raw_delivery_preserves_attributes() {
        let broker = InMemoryBroker::default();
        let topic = broker.create_topic("payments").unwrap();
        let queue = broker.create_queue("payments-q").unwrap();
        broker.subscribe(&topic, &queue, true).unwrap();
        let message = text("{\"amount\":5}").with_string_attribute(EVENT_TYPE_ATTRIBUTE, "payment.created");

        broker.publish(&topic, &message).unwrap();

        let received = broker.receive(&queue, 1).unwrap();
        assert_eq!(received[0].body, message.body);
        assert_eq!(received[0].attributes, message.attributes);
    }

    /// Verify enveloped subscriptions receive a JSON notification body
    #[test]
    fn test_enveloped_delivery_wraps_message() {
        let broker = InMemoryBroker::default();
        let topic = broker.create_topic("payments").unwrap();
        let queue = broker.create_queue("audit-q").unwrap();
        broker.subscribe(&topic, &queue, false).unwrap();
        let message = text("hello").with_string_attribute(NO_TRACING_ATTRIBUTE, "true");

        let id = broker.publish(&topic, &message).unwrap();

        let received = broker.receive(&queue, 1).unwrap();
        assert!(received[0].attributes.is_empty());
        let envelope = NotificationEnvelope::parse(&received[0].body).unwrap();
        assert_eq!(envelope.message, "hello");
        assert_eq!(envelope.message_id, id.to_string());
        assert_eq!(envelope.topic_arn, topic.to_string());
        assert_eq!(envelope.attributes().unwrap(), message.attributes);
    }

    /// Verify every subscription gets its own copy
    #[test]
    fn test_fan_out_to_multiple_queues() {
        let broker = InMemoryBroker::default();
        let topic = broker.create_topic("events").unwrap();
        let a = broker.create_queue("a").unwrap();
        let b = broker.create_queue("b").unwrap();
        broker.subscribe(&topic, &a, true).unwrap();
        broker.subscribe(&topic, &b, true).unwrap();

        broker.publish(&topic, &text("x")).unwrap();

        assert_eq!(broker.message_count(&a).unwrap(), 1);
        assert_eq!(broker.message_count(&b).unwrap(), 1);
    }

    /// Verify publishing to an unknown topic fails
    #[test]
    fn test_unknown_topic() {
        let broker = InMemoryBroker::default();
        let topic = TopicArn::in_memory("nope").unwrap();

        assert!(matches!(
            broker.publish(&topic, &text("x")),
            Err(QueueError::TopicNotFound { .. })
        ));
    }
}

// ============================================================================
// Provider Trait Tests
// ============================================================================

mod provider_traits {
    use super::*;

    /// Verify the queue provider resolves names by creating queues
    #[tokio::test]
    async fn test_provider_resolves_and_round_trips() {
        let provider = InMemoryProvider::default();
        let url = provider.resolve_queue_url("orders-q").await.unwrap();
        assert_eq!(url.as_str(), "memory://orders-q");

        provider
            .send_messages(&url, &[text("a"), text("b")])
            .await
            .unwrap();
        let received = provider
            .receive_messages(&url, 10, Duration::seconds(5))
            .await
            .unwrap();

        assert_eq!(received.len(), 2);
        assert_eq!(provider.approximate_message_count(&url).await.unwrap(), 2);
        assert_eq!(provider.provider_type(), ProviderType::InMemory);
        assert_eq!(provider.max_batch_size(), 100);
    }

    /// Verify providers built on the same broker share storage
    #[tokio::test]
    async fn test_providers_share_broker() {
        let broker = InMemoryBroker::default();
        let queues = InMemoryProvider::new(broker.clone());
        let topics = InMemoryTopicProvider::new(broker.clone());
        let url = broker.create_queue("q").unwrap();
        let topic = broker.create_topic("t").unwrap();
        broker.subscribe(&topic, &url, true).unwrap();

        topics
            .publish_batch(&topic, &[text("1"), text("2")])
            .await
            .unwrap();

        assert_eq!(queues.approximate_message_count(&url).await.unwrap(), 2);
    }
}
