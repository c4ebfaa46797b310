use crate::helpers::Journal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant};
use switchyard::consumers::{
    ConsumerGroup, ErrorType, HandlerError, Incoming, Interrupt, MessageHandler,
};
use switchyard::envelope::{Decoded, Payload};
use switchyard::protocols::amqp::{Amqp, AmqpBinding, AmqpExchange, AmqpRoute};
use switchyard::protocols::redis::{Redis, RedisBinding};
use switchyard::publishers::MessageEnvelope;
use switchyard::rpc::RpcOptions;
use switchyard::testing::{InMemoryTransport, TestBroker, TestPublishError};

fn redis_broker() -> TestBroker<Redis, Journal> {
    let consumer_group =
        ConsumerGroup::<Redis, Journal>::builder(InMemoryTransport::new(), Journal::default())
            .build();
    TestBroker::new(consumer_group)
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Order {
    id: u64,
    amount: u64,
}

#[tokio::test]
async fn call_mocks_record_the_decoded_bodies() {
    let broker = redis_broker();
    let handle = broker
        .register(MessageHandler::builder("orders").typed_handler(
            |order: Order, incoming: Incoming<Journal>| async move {
                incoming.context.record(format!("order {}", order.id));
                Ok::<_, HandlerError>(())
            },
        ))
        .unwrap();

    broker
        .publish(MessageEnvelope::new(
            "orders",
            Payload::json(&Order { id: 7, amount: 100 }).unwrap(),
        ))
        .await
        .unwrap();

    assert_eq!(
        handle.mock().calls(),
        vec![Decoded::Json(json!({"id": 7, "amount": 100}))]
    );
    assert_eq!(broker.group().context().entries(), vec!["order 7"]);
}

#[tokio::test]
async fn chained_publishers_and_reply_destinations_are_served_in_process() {
    let broker = redis_broker();
    let orders = broker
        .register(
            MessageHandler::builder("orders")
                .publishes_to("audit")
                .handler(|_: Incoming<Journal>| async { Ok::<_, HandlerError>("processed") }),
        )
        .unwrap();
    for channel in ["audit", "replies"] {
        broker
            .register(MessageHandler::builder(channel).handler(
                move |incoming: Incoming<Journal>| async move {
                    let text = incoming.decoded().as_text().unwrap_or_default();
                    incoming.context.record(format!("{channel}: {text}"));
                    Ok::<_, HandlerError>(())
                },
            ))
            .unwrap();
    }

    broker
        .publish(MessageEnvelope::new("orders", "order").with_reply_to("replies"))
        .await
        .unwrap();

    assert_eq!(
        orders.publishers()[0].mock().published(),
        vec![Payload::text("processed")]
    );
    assert_eq!(
        broker.group().context().entries(),
        vec!["audit: processed", "replies: processed"]
    );
}

#[tokio::test]
async fn handler_failures_propagate_and_interrupts_do_not() {
    let broker = redis_broker();
    broker
        .register(MessageHandler::builder("orders").handler(
            |incoming: Incoming<Journal>| async move {
                if incoming.decoded().as_text() == Some("nack") {
                    return Err(HandlerError::from(Interrupt::Nack));
                }
                Err::<(), _>(HandlerError::transient(anyhow::anyhow!("Database unavailable")))
            },
        ))
        .unwrap();

    broker
        .publish(MessageEnvelope::new("orders", "nack"))
        .await
        .unwrap();
    let error = broker
        .publish(MessageEnvelope::new("orders", "boom"))
        .await
        .unwrap_err();

    match error {
        TestPublishError::Handler(e) => assert_eq!(e.error_type(), Some(ErrorType::Transient)),
        e => panic!("Unexpected error: {e}"),
    }
}

#[tokio::test]
async fn undecodable_bodies_fail_typed_handlers_with_a_validation_error() {
    let broker = redis_broker();
    broker
        .register(MessageHandler::builder("orders").typed_handler(
            |_: Order, _: Incoming<Journal>| async { Ok::<_, HandlerError>(()) },
        ))
        .unwrap();

    let error = broker
        .publish(MessageEnvelope::new("orders", "not an order"))
        .await
        .unwrap_err();

    match error {
        TestPublishError::Handler(e) => assert_eq!(e.error_type(), Some(ErrorType::Validation)),
        e => panic!("Unexpected error: {e}"),
    }
}

#[tokio::test]
async fn requests_are_answered_in_process() {
    let broker = redis_broker();
    broker
        .register(
            MessageHandler::builder(RedisBinding::pattern("rpc.*")).handler(
                |incoming: Incoming<Journal>| async move {
                    let amount: u64 = incoming.body::<Order>()?.amount;
                    Ok::<_, HandlerError>(json!({ "approved": amount < 1_000 }))
                },
            ),
        )
        .unwrap();

    let reply = broker
        .request(
            MessageEnvelope::new(
                "rpc.approve",
                Payload::json(&Order { id: 1, amount: 10 }).unwrap(),
            ),
            RpcOptions::with_timeout(Duration::from_secs(1)),
        )
        .await
        .unwrap();

    assert_eq!(reply, Some(Decoded::Json(json!({"approved": true}))));
}

#[tokio::test]
async fn amqp_topic_exchanges_route_by_pattern() {
    let consumer_group = ConsumerGroup::<Amqp, Journal>::builder(
        InMemoryTransport::new(),
        Journal::default(),
    )
    .message_handler(
        MessageHandler::builder(
            AmqpBinding::queue("info-logs")
                .with_exchange(AmqpExchange::topic("logs"))
                .with_routing_key("*.info"),
        )
        .handler(|incoming: Incoming<Journal>| async move {
            let text = incoming.decoded().as_text().unwrap_or_default();
            incoming.context.record(text);
            Ok::<_, HandlerError>(())
        }),
    )
    .build()
    .unwrap();
    let broker = TestBroker::new(consumer_group);

    for (routing_key, body) in [
        ("billing.info", "delivered"),
        ("billing.audit.info", "too deep"),
        ("billing.warn", "wrong level"),
    ] {
        broker
            .publish(MessageEnvelope::new(
                AmqpRoute::exchange("logs", routing_key),
                body,
            ))
            .await
            .unwrap();
    }

    assert_eq!(broker.group().context().entries(), vec!["delivered"]);
}

#[tokio::test]
async fn closed_subscribers_receive_nothing() {
    let broker = redis_broker();
    broker
        .register(MessageHandler::builder("orders").handler(
            |incoming: Incoming<Journal>| async move {
                incoming.context.record("stopping");
                Err::<(), HandlerError>(Interrupt::StopConsuming.into())
            },
        ))
        .unwrap();

    for _ in 0..2 {
        broker
            .publish(MessageEnvelope::new("orders", "hello"))
            .await
            .unwrap();
    }

    assert_eq!(broker.group().context().entries(), vec!["stopping"]);
    assert!(broker.group().subscribers()[0].is_closed());
}

#[tokio::test]
async fn undecodable_bodies_fail_the_publish_even_when_filtered_out() {
    let broker = redis_broker();
    broker
        .register(
            MessageHandler::builder("orders")
                .filter(|envelope| envelope.decoded_body.is_some())
                .handler(|_: Incoming<Journal>| async { Ok::<_, HandlerError>(()) }),
        )
        .unwrap();

    let error = broker
        .publish(MessageEnvelope::new(
            "orders",
            Payload::bytes("{not json").with_header("content-type", "application/json"),
        ))
        .await
        .unwrap_err();

    match error {
        TestPublishError::Handler(e) => assert_eq!(e.error_type(), Some(ErrorType::Validation)),
        e => panic!("Unexpected error: {e}"),
    }
}

#[tokio::test]
async fn requests_to_slow_handlers_give_up_after_the_timeout() {
    let broker = redis_broker();
    broker
        .register(MessageHandler::builder("slow").handler(
            |_: Incoming<Journal>| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, HandlerError>("too late")
            },
        ))
        .unwrap();
    let options = RpcOptions::with_timeout(Duration::from_millis(50));

    let started = Instant::now();
    let reply = broker
        .request(MessageEnvelope::new("slow", "ping"), options)
        .await
        .unwrap();
    assert_eq!(reply, None);

    let error = broker
        .request(MessageEnvelope::new("slow", "ping"), options.raise_timeout())
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        TestPublishError::Timeout(timeout) if timeout == Duration::from_millis(50)
    ));
    assert!(started.elapsed() < Duration::from_secs(2));
}
