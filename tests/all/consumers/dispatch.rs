use crate::helpers::{get_consumer_group, random_channel, Counter, Journal, LogCapture, WAIT};
use std::time::Duration;
use switchyard::consumers::{HandlerError, Incoming, Interrupt, MessageHandler, RetryPolicy};
use switchyard::envelope::{BrokerAction, Payload};
use switchyard::protocols::redis::Redis;
use switchyard::publishers::MessageEnvelope;
use switchyard::testing::{InMemoryTransport, Settlement};

fn settlement(message_id: &str, action: BrokerAction) -> Settlement {
    Settlement {
        message_id: message_id.to_owned(),
        action,
    }
}

#[tokio::test]
async fn processed_messages_are_acked_and_replied_to() {
    // Arrange
    let transport = InMemoryTransport::<Redis>::new();
    let channel = random_channel();
    let consumer_group = get_consumer_group(&transport, ())
        .message_handler(
            MessageHandler::builder(channel.as_str())
                .handler(|_: Incoming<()>| async { Ok::<_, HandlerError>("done") }),
        )
        .build()
        .unwrap();
    consumer_group.start().await.unwrap();

    // Act
    consumer_group
        .publish(
            MessageEnvelope::new(channel.as_str(), "hello")
                .with_message_id("m-1")
                .with_reply_to("replies"),
        )
        .await
        .unwrap();

    // Assert
    transport.wait_for_settlements(1, WAIT).await;
    let published = transport.wait_for_published(2, WAIT).await;
    assert_eq!(published.len(), 2);
    let reply = &published[1];
    assert_eq!(reply.route.channel, "replies");
    assert_eq!(reply.correlation_id(), "m-1");
    assert_eq!(reply.payload.body, b"done");
    assert_eq!(
        transport.settlements(),
        vec![settlement("m-1", BrokerAction::Ack)]
    );

    consumer_group.close().await;
    assert_eq!(transport.published().len(), 2);
}

#[tokio::test]
async fn a_message_is_processed_by_the_first_call_that_accepts_it() {
    #[derive(Default)]
    struct Context {
        first: Counter,
        second: Counter,
    }

    // Arrange
    let transport = InMemoryTransport::<Redis>::new();
    let channel = random_channel();
    let consumer_group = get_consumer_group(&transport, Context::default())
        .message_handler(MessageHandler::builder(channel.as_str()).handler(
            |incoming: Incoming<Context>| async move {
                incoming.context.first.increment();
                Ok::<_, HandlerError>(())
            },
        ))
        .message_handler(MessageHandler::builder(channel.as_str()).handler(
            |incoming: Incoming<Context>| async move {
                incoming.context.second.increment();
                Ok::<_, HandlerError>(())
            },
        ))
        .build()
        .unwrap();
    consumer_group.start().await.unwrap();

    // Act
    for id in ["m-1", "m-2"] {
        consumer_group
            .publish(MessageEnvelope::new(channel.as_str(), "hello").with_message_id(id))
            .await
            .unwrap();
    }

    // Assert
    let settlements = transport.wait_for_settlements(2, WAIT).await;
    assert!(settlements.iter().all(|s| s.action == BrokerAction::Ack));
    let context = consumer_group.context();
    assert_eq!(context.first.get(), 2);
    assert_eq!(context.second.get(), 0);

    consumer_group.close().await;
}

#[tokio::test]
async fn a_message_accepted_by_two_calls_is_rejected() {
    // Arrange
    let transport = InMemoryTransport::<Redis>::new();
    let channel = random_channel();
    let consumer_group = get_consumer_group(&transport, Counter::default())
        .message_handler(MessageHandler::builder(channel.as_str()).handler(
            |incoming: Incoming<Counter>| async move {
                incoming.context.increment();
                Ok::<_, HandlerError>(())
            },
        ))
        .message_handler(
            MessageHandler::builder(channel.as_str())
                .filter(|_| true)
                .handler(|incoming: Incoming<Counter>| async move {
                    incoming.context.increment();
                    Ok::<_, HandlerError>(())
                }),
        )
        .build()
        .unwrap();
    consumer_group.start().await.unwrap();

    // Act
    consumer_group
        .publish(MessageEnvelope::new(channel.as_str(), "hello").with_message_id("m-1"))
        .await
        .unwrap();

    // Assert
    let settlements = transport.wait_for_settlements(1, WAIT).await;
    assert_eq!(settlements, vec![settlement("m-1", BrokerAction::Reject)]);
    // The first call ran before the ambiguity was detected, the second one never did.
    assert_eq!(consumer_group.context().get(), 1);

    consumer_group.close().await;
}

#[tokio::test]
async fn transient_failures_are_retried_until_the_policy_is_exhausted() {
    // Arrange
    let transport = InMemoryTransport::<Redis>::new();
    let channel = random_channel();
    let consumer_group = get_consumer_group(&transport, Counter::default())
        .message_handler(
            MessageHandler::builder(channel.as_str())
                .retry(RetryPolicy::Times(2))
                .handler(|incoming: Incoming<Counter>| async move {
                    incoming.context.increment();
                    Err::<(), _>(HandlerError::transient(anyhow::anyhow!("Downstream is down")))
                }),
        )
        .build()
        .unwrap();
    consumer_group.start().await.unwrap();

    // Act
    consumer_group
        .publish(MessageEnvelope::new(channel.as_str(), "hello").with_message_id("m-1"))
        .await
        .unwrap();

    // Assert
    let settlements = transport.wait_for_settlements(3, WAIT).await;
    assert_eq!(
        settlements,
        vec![
            settlement("m-1", BrokerAction::Nack),
            settlement("m-1", BrokerAction::Nack),
            settlement("m-1", BrokerAction::Reject),
        ]
    );
    assert_eq!(consumer_group.context().get(), 3);
    assert_eq!(consumer_group.subscribers()[0].watcher().attempts("m-1"), 0);

    consumer_group.close().await;
}

#[tokio::test]
async fn fatal_failures_are_rejected_regardless_of_the_retry_policy() {
    // Arrange
    let transport = InMemoryTransport::<Redis>::new();
    let channel = random_channel();
    let consumer_group = get_consumer_group(&transport, ())
        .message_handler(
            MessageHandler::builder(channel.as_str())
                .retry(RetryPolicy::Always)
                .handler(|_: Incoming<()>| async {
                    Err::<(), _>(HandlerError::fatal(anyhow::anyhow!("Unknown account")))
                }),
        )
        .build()
        .unwrap();
    consumer_group.start().await.unwrap();

    // Act
    consumer_group
        .publish(MessageEnvelope::new(channel.as_str(), "hello").with_message_id("m-1"))
        .await
        .unwrap();

    // Assert
    let settlements = transport.wait_for_settlements(1, WAIT).await;
    assert_eq!(settlements, vec![settlement("m-1", BrokerAction::Reject)]);

    consumer_group.close().await;
}

#[tokio::test]
async fn skipped_messages_are_left_unsettled() {
    // Arrange
    let transport = InMemoryTransport::<Redis>::new();
    let channel = random_channel();
    let consumer_group = get_consumer_group(&transport, ())
        .message_handler(
            MessageHandler::builder(channel.as_str())
                .with_max_workers(1)
                .handler(|incoming: Incoming<()>| async move {
                    if incoming.decoded().as_text() == Some("skip me") {
                        return Err(HandlerError::from(Interrupt::Skip));
                    }
                    Ok::<_, HandlerError>(())
                }),
        )
        .build()
        .unwrap();
    consumer_group.start().await.unwrap();

    // Act
    consumer_group
        .publish(MessageEnvelope::new(channel.as_str(), "skip me").with_message_id("skipped"))
        .await
        .unwrap();
    consumer_group
        .publish(MessageEnvelope::new(channel.as_str(), "keep me").with_message_id("kept"))
        .await
        .unwrap();

    // Assert
    // Messages are processed in order: once the second one is settled, the first one is done.
    let settlements = transport.wait_for_settlements(1, WAIT).await;
    assert_eq!(settlements, vec![settlement("kept", BrokerAction::Ack)]);

    consumer_group.close().await;
}

#[tokio::test]
async fn stop_consuming_closes_the_subscriber_only() {
    #[derive(Default)]
    struct Context {
        stopped: Counter,
        other: Counter,
    }

    // Arrange
    let transport = InMemoryTransport::<Redis>::new();
    let stopping = random_channel();
    let other = random_channel();
    let consumer_group = get_consumer_group(&transport, Context::default())
        .message_handler(MessageHandler::builder(stopping.as_str()).handler(
            |incoming: Incoming<Context>| async move {
                incoming.context.stopped.increment();
                Err::<(), HandlerError>(Interrupt::StopConsuming.into())
            },
        ))
        .message_handler(MessageHandler::builder(other.as_str()).handler(
            |incoming: Incoming<Context>| async move {
                incoming.context.other.increment();
                Ok::<_, HandlerError>(())
            },
        ))
        .build()
        .unwrap();
    consumer_group.start().await.unwrap();

    // Act
    consumer_group
        .publish(MessageEnvelope::new(stopping.as_str(), "stop").with_message_id("m-1"))
        .await
        .unwrap();
    let settlements = transport.wait_for_settlements(1, WAIT).await;
    consumer_group
        .publish(MessageEnvelope::new(stopping.as_str(), "stop").with_message_id("m-2"))
        .await
        .unwrap();
    consumer_group
        .publish(MessageEnvelope::new(other.as_str(), "hello").with_message_id("m-3"))
        .await
        .unwrap();

    // Assert
    assert_eq!(settlements, vec![settlement("m-1", BrokerAction::Ack)]);
    let settlements = transport.wait_for_settlements(2, WAIT).await;
    assert_eq!(settlements[1], settlement("m-3", BrokerAction::Ack));

    let subscribers = consumer_group.subscribers();
    assert!(subscribers[0].is_closed());
    assert!(!subscribers[1].is_closed());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(consumer_group.context().stopped.get(), 1);
    assert_eq!(consumer_group.context().other.get(), 1);

    consumer_group.close().await;
}

#[tokio::test]
async fn dispatching_resumes_after_the_subscription_is_lost() {
    // Arrange
    let transport = InMemoryTransport::<Redis>::new();
    let channel = random_channel();
    let consumer_group = get_consumer_group(&transport, ())
        .message_handler(
            MessageHandler::builder(channel.as_str())
                .handler(|_: Incoming<()>| async { Ok::<_, HandlerError>(()) }),
        )
        .build()
        .unwrap();
    transport.fail_subscriptions(2);
    consumer_group.start().await.unwrap();
    assert_eq!(transport.wait_for_subscriptions(1, WAIT).await, 1);

    // Act
    transport.fail_receives(1);
    consumer_group
        .publish(MessageEnvelope::new(channel.as_str(), "hello").with_message_id("m-1"))
        .await
        .unwrap();

    // Assert
    let settlements = transport.wait_for_settlements(1, WAIT).await;
    assert_eq!(settlements, vec![settlement("m-1", BrokerAction::Ack)]);
    assert_eq!(transport.wait_for_subscriptions(2, WAIT).await, 2);

    consumer_group.close().await;
}

#[tokio::test]
async fn a_lost_subscription_is_logged_once_until_messages_flow_again() {
    // Arrange
    let logs = LogCapture::default();
    let _guard = logs.install();
    let transport = InMemoryTransport::<Redis>::new();
    let channel = random_channel();
    let consumer_group = get_consumer_group(&transport, ())
        .message_handler(
            MessageHandler::builder(channel.as_str())
                .handler(|_: Incoming<()>| async { Ok::<_, HandlerError>(()) }),
        )
        .build()
        .unwrap();
    consumer_group.start().await.unwrap();

    // Act
    transport.fail_receives(5);
    consumer_group
        .publish(MessageEnvelope::new(channel.as_str(), "hello").with_message_id("m-1"))
        .await
        .unwrap();
    let settlements = transport.wait_for_settlements(1, WAIT).await;
    consumer_group.close().await;

    // Assert
    assert_eq!(settlements, vec![settlement("m-1", BrokerAction::Ack)]);
    assert_eq!(transport.subscriptions(), 6);
    assert_eq!(logs.count("Lost the subscription with the broker"), 1);
    assert_eq!(logs.count("Subscription restored"), 1);
}

#[tokio::test]
async fn undecodable_bodies_fail_even_when_no_call_accepts_them() {
    // Arrange
    let transport = InMemoryTransport::<Redis>::new();
    let channel = random_channel();
    let consumer_group = get_consumer_group(&transport, Counter::default())
        .message_handler(
            MessageHandler::builder(channel.as_str())
                .filter(|envelope| envelope.decoded_body.is_some())
                .handler(|incoming: Incoming<Counter>| async move {
                    incoming.context.increment();
                    Ok::<_, HandlerError>(())
                }),
        )
        .build()
        .unwrap();
    consumer_group.start().await.unwrap();

    // Act
    consumer_group
        .publish(
            MessageEnvelope::new(
                channel.as_str(),
                Payload::bytes("{not json").with_header("content-type", "application/json"),
            )
            .with_message_id("m-1"),
        )
        .await
        .unwrap();

    // Assert
    let settlements = transport.wait_for_settlements(1, WAIT).await;
    assert_eq!(settlements, vec![settlement("m-1", BrokerAction::Reject)]);
    assert_eq!(consumer_group.context().get(), 0);

    consumer_group.close().await;
}

#[tokio::test]
async fn replies_are_forwarded_to_chained_publishers() {
    // Arrange
    let transport = InMemoryTransport::<Redis>::new();
    let orders = random_channel();
    let audit = random_channel();
    let consumer_group = get_consumer_group(&transport, Journal::default())
        .message_handler(
            MessageHandler::builder(orders.as_str())
                .publishes_to(audit.as_str())
                .handler(|_: Incoming<Journal>| async {
                    Ok::<_, HandlerError>("order processed")
                }),
        )
        .message_handler(MessageHandler::builder(audit.as_str()).handler(
            |incoming: Incoming<Journal>| async move {
                let text = incoming.decoded().as_text().unwrap_or_default().to_owned();
                incoming.context.record(text);
                Ok::<_, HandlerError>(())
            },
        ))
        .build()
        .unwrap();
    consumer_group.start().await.unwrap();

    // Act
    consumer_group
        .publish(MessageEnvelope::new(orders.as_str(), "order").with_message_id("m-1"))
        .await
        .unwrap();

    // Assert
    transport.wait_for_settlements(2, WAIT).await;
    assert_eq!(consumer_group.context().entries(), vec!["order processed"]);
    let forwarded = &transport.published()[1];
    assert_eq!(forwarded.route.channel, audit);
    assert_eq!(forwarded.correlation_id(), "m-1");

    consumer_group.close().await;
}
