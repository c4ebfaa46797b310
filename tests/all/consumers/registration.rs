use crate::helpers::get_dispatch_settings;
use serde::Deserialize;
use switchyard::consumers::{
    CallInfo, ConsumerGroup, HandlerError, Incoming, MessageHandler, RegistrationError,
    RetryPolicy,
};
use switchyard::protocols::kafka::Kafka;
use switchyard::protocols::redis::Redis;
use switchyard::testing::InMemoryTransport;
use switchyard::DispatchSettings;

async fn noop(_incoming: Incoming<()>) -> Result<(), HandlerError> {
    Ok(())
}

#[test]
fn handlers_with_equal_bindings_share_a_subscriber() {
    let consumer_group = ConsumerGroup::<Redis, ()>::builder(InMemoryTransport::new(), ())
        .message_handler(MessageHandler::builder("orders").name("create").handler(noop))
        .message_handler(MessageHandler::builder("orders").name("update").handler(noop))
        .message_handler(MessageHandler::builder("refunds").handler(noop))
        .build()
        .unwrap();

    let info = consumer_group.info();
    assert_eq!(info.len(), 2);
    assert_eq!(info[0].name, "orders");
    let names: Vec<_> = info[0].calls.iter().map(|call| call.name.as_str()).collect();
    assert_eq!(names, vec!["create", "update"]);
    assert_eq!(info[1].calls.len(), 1);
}

#[test]
fn a_handler_cannot_change_the_retry_policy_of_an_existing_subscriber() {
    let consumer_group = ConsumerGroup::<Redis, ()>::builder(InMemoryTransport::new(), ())
        .default_retry(RetryPolicy::Times(3))
        .build();
    consumer_group
        .register(MessageHandler::builder("orders").handler(noop))
        .unwrap();

    // Asking for the same policy explicitly is fine.
    consumer_group
        .register(
            MessageHandler::builder("orders")
                .retry(RetryPolicy::Times(3))
                .handler(noop),
        )
        .unwrap();

    let error = consumer_group
        .register(
            MessageHandler::builder("orders")
                .retry(RetryPolicy::Always)
                .handler(noop),
        )
        .unwrap_err();
    assert!(matches!(
        error,
        RegistrationError::ConflictingRetryPolicy {
            existing: RetryPolicy::Times(3),
            requested: RetryPolicy::Always,
            ..
        }
    ));
    assert_eq!(consumer_group.info()[0].calls.len(), 2);
}

#[test]
fn concurrency_falls_back_from_handler_to_group_to_protocol() {
    let kafka = ConsumerGroup::<Kafka, ()>::builder(InMemoryTransport::new(), ())
        .message_handler(MessageHandler::builder("payments").handler(noop))
        .message_handler(
            MessageHandler::builder("refunds")
                .with_max_workers(8)
                .handler(noop),
        )
        .build()
        .unwrap();
    let subscribers = kafka.subscribers();
    assert_eq!(subscribers[0].max_workers(), Some(1));
    assert_eq!(subscribers[1].max_workers(), Some(8));

    let redis = ConsumerGroup::<Redis, ()>::builder(InMemoryTransport::new(), ())
        .with_settings(DispatchSettings {
            max_workers: Some(4),
            ..get_dispatch_settings()
        })
        .message_handler(MessageHandler::builder("orders").handler(noop))
        .build()
        .unwrap();
    assert_eq!(redis.subscribers()[0].max_workers(), Some(4));

    let unbounded = ConsumerGroup::<Redis, ()>::builder(InMemoryTransport::new(), ())
        .message_handler(MessageHandler::builder("orders").handler(noop))
        .build()
        .unwrap();
    assert_eq!(unbounded.subscribers()[0].max_workers(), None);
}

#[test]
fn typed_handlers_document_their_payload() {
    #[derive(Deserialize)]
    struct Order {
        #[allow(dead_code)]
        id: u64,
    }

    let consumer_group = ConsumerGroup::<Redis, ()>::builder(InMemoryTransport::new(), ())
        .build();
    let handle = consumer_group
        .register(
            MessageHandler::builder("orders")
                .name("create_order")
                .description("Creates an order")
                .typed_handler(|_order: Order, _: Incoming<()>| async { Ok::<_, HandlerError>(()) }),
        )
        .unwrap();

    assert_eq!(handle.subscription(), "orders");
    let info: &CallInfo = handle.info();
    assert_eq!(info.name, "create_order");
    assert_eq!(info.description.as_deref(), Some("Creates an order"));
    assert!(info.payload.unwrap().ends_with("Order"));
}
